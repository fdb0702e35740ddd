//! Input resolution: normalise a user-supplied path or URL to bytes.
//!
//! The import variant is chosen by file extension alone (`.doc`/`.docx` →
//! Word, `.pdf` → PDF); no content sniffing happens beyond the `%PDF` magic
//! check, which turns an obviously wrong payload into a clear error instead
//! of a renderer crash.

use crate::error::PagesmithError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Foreign formats accepted by import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Word,
    Pdf,
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::Word => f.write_str("Word"),
            InputFormat::Pdf => f.write_str("PDF"),
        }
    }
}

/// Pick the import variant from a file name or URL path.
pub fn detect_format(name: &str) -> Result<InputFormat, PagesmithError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("doc") | Some("docx") => Ok(InputFormat::Word),
        Some("pdf") => Ok(InputFormat::Pdf),
        _ => Err(PagesmithError::UnsupportedFormat {
            name: name.to_string(),
        }),
    }
}

/// A fully loaded input document.
#[derive(Debug, Clone)]
pub struct ResolvedInput {
    /// File name the format was detected from.
    pub name: String,
    pub format: InputFormat,
    pub bytes: Vec<u8>,
}

impl ResolvedInput {
    /// Wrap bytes already in memory, detecting the format from `name`.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PagesmithError> {
        let name = name.into();
        let format = detect_format(&name)?;
        let input = Self {
            name,
            format,
            bytes,
        };
        input.validate()?;
        Ok(input)
    }

    fn validate(&self) -> Result<(), PagesmithError> {
        if self.format == InputFormat::Pdf && self.bytes.len() >= 4 && &self.bytes[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&self.bytes[..4]);
            return Err(PagesmithError::NotAPdf {
                name: self.name.clone(),
                magic,
            });
        }
        Ok(())
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to bytes.
///
/// If the input is a URL, download it; otherwise read the local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, PagesmithError> {
    if input.trim().is_empty() {
        return Err(PagesmithError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<ResolvedInput, PagesmithError> {
    let path = PathBuf::from(path_str);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_str.to_string());
    // Fail on the extension before touching the file system.
    detect_format(&name)?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PagesmithError::PermissionDenied { path: path.clone() },
        _ => PagesmithError::FileNotFound { path: path.clone() },
    })?;

    debug!("Read {} bytes from {}", bytes.len(), path.display());
    ResolvedInput::from_bytes(name, bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PagesmithError> {
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PagesmithError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PagesmithError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PagesmithError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PagesmithError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(url);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| PagesmithError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes as '{}'", bytes.len(), filename);
    ResolvedInput::from_bytes(filename, bytes.to_vec())
}

/// Last path segment of the URL if it has an extension, else `downloaded.pdf`.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
