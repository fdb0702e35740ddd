//! Results returned by session operations.

use crate::error::PagesmithError;
use crate::pipeline::input::InputFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the paged raster export.
pub const PDF_FILE_NAME: &str = "document.pdf";

/// MIME type of the paged raster export.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// File name of the structured export.
pub const DOCX_FILE_NAME: &str = "document.docx";

/// MIME type of the structured export.
pub const DOCX_MIME_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Summary of a committed import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub format: Option<InputFormat>,
    /// Page blocks committed (PDF) or pages delimited by markers (Word).
    pub pages: usize,
    /// Page-break markers in the committed markup.
    pub page_breaks: usize,
    /// Embedded image references rewritten to local references.
    pub images_rewritten: usize,
    /// Resolves answered from the blob cache during this import.
    pub cache_hits: usize,
    /// Distinct payloads held by the blob cache after this import.
    pub cached_blobs: usize,
    /// Byte length of the committed markup.
    pub markup_len: usize,
    pub duration_ms: u64,
}

/// An exported document, ready to be written or downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub file_name: &'static str,
    pub mime_type: &'static str,
    /// Pages (raster export) or paragraphs (structured export).
    pub units: usize,
    pub bytes: Vec<u8>,
}

impl ExportedFile {
    /// Write into `dir` under [`Self::file_name`].
    ///
    /// Uses atomic write (temp file + rename) so a failed write never leaves
    /// a truncated document behind.
    pub async fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf, PagesmithError> {
        let dir = dir.as_ref();
        let path = dir.join(self.file_name);

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PagesmithError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        let tmp_path = dir.join(format!(".{}.tmp", self.file_name));
        tokio::fs::write(&tmp_path, &self.bytes)
            .await
            .map_err(|e| PagesmithError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| PagesmithError::OutputWriteFailed {
                path: path.clone(),
                source: e,
            })?;

        Ok(path)
    }
}
