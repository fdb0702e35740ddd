//! Session-scoped de-duplicating store for embedded image payloads.
//!
//! Vector page images produced on PDF import embed raster images as inline
//! `data:` URIs. A logo or watermark repeated on every page would otherwise
//! be decoded and carried once per page. [`BlobCache::resolve`] decodes each
//! distinct payload once, writes it to the session's scratch directory and
//! hands back the same [`LocalRef`] for every later occurrence.
//!
//! Entries are never evicted. By default the scratch directory, and every
//! file in it, is removed when the cache is dropped with its session;
//! [`BlobCache::in_dir`] keeps the files for documents that outlive the
//! session. Files are named after the payload digest, so a kept directory
//! shared by several documents stores each payload once.

use crate::error::PagesmithError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::debug;

/// A locally resolvable reference to a materialised payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalRef {
    path: PathBuf,
    href: String,
}

impl LocalRef {
    /// File holding the decoded payload.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `file://` URL suitable for an `href` attribute.
    pub fn href(&self) -> &str {
        &self.href
    }
}

enum ScratchDir {
    Temp(TempDir),
    Kept(PathBuf),
}

impl ScratchDir {
    fn path(&self) -> &Path {
        match self {
            ScratchDir::Temp(dir) => dir.path(),
            ScratchDir::Kept(path) => path,
        }
    }
}

/// Payload identifier → [`LocalRef`], unbounded, for one session.
pub struct BlobCache {
    dir: ScratchDir,
    // One cell per identifier digest: the map lock is held only to find or
    // create the cell, the cell serialises materialisation of that payload.
    entries: Mutex<HashMap<String, Arc<OnceCell<LocalRef>>>>,
    hits: AtomicUsize,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("dir", &self.dir.path())
            .field("entries", &self.len())
            .field("hits", &self.hits())
            .finish()
    }
}

impl BlobCache {
    /// Create a cache with a fresh scratch directory.
    pub fn new() -> Result<Self, PagesmithError> {
        let dir = tempfile::Builder::new()
            .prefix("pagesmith-blobs-")
            .tempdir()
            .map_err(|e| PagesmithError::Internal(format!("blob scratch dir: {e}")))?;
        Ok(Self::with_scratch(ScratchDir::Temp(dir)))
    }

    /// Create a cache that materialises into `dir` and leaves the files there.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self, PagesmithError> {
        let dir = dir.into();
        let write_err = |source| PagesmithError::BlobWriteFailed {
            path: dir.clone(),
            source,
        };
        std::fs::create_dir_all(&dir).map_err(write_err)?;
        // Saved documents carry file:// URLs, so the directory must be absolute.
        let dir = std::path::absolute(&dir).map_err(write_err)?;
        Ok(Self::with_scratch(ScratchDir::Kept(dir)))
    }

    fn with_scratch(dir: ScratchDir) -> Self {
        Self {
            dir,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
        }
    }

    /// Directory holding every materialised payload.
    pub fn scratch_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Number of distinct payloads seen so far.
    pub fn len(&self) -> usize {
        self.lock_entries().values().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resolves answered from the cache.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    /// Resolve a `data:` URI to its local reference, materialising it on first sight.
    pub async fn resolve(&self, payload_id: &str) -> Result<LocalRef, PagesmithError> {
        let key = hex::encode(Sha256::digest(payload_id.as_bytes()));
        let cell = Arc::clone(
            self.lock_entries()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        );

        if let Some(found) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found.clone());
        }

        let local = cell
            .get_or_try_init(|| self.materialise(&key, payload_id))
            .await?;
        Ok(local.clone())
    }

    async fn materialise(&self, key: &str, payload_id: &str) -> Result<LocalRef, PagesmithError> {
        let (mime, bytes) = parse_data_uri(payload_id)?;
        let path = self
            .dir
            .path()
            .join(format!("blob-{}.{}", &key[..16], extension_for(&mime)));

        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|source| PagesmithError::BlobWriteFailed {
                path: path.clone(),
                source,
            })?;

        let href = reqwest::Url::from_file_path(&path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| path.display().to_string());
        debug!("Materialised {} ({} bytes) → {}", mime, bytes.len(), href);
        Ok(LocalRef { path, href })
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<LocalRef>>>> {
        // A poisoned map is still structurally valid: cells are only ever added.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Split a `data:` URI into its MIME type and decoded bytes.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>), PagesmithError> {
    let invalid = |detail: &str| PagesmithError::InvalidDataUri {
        detail: detail.to_string(),
    };
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| invalid("missing 'data:' scheme"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("missing ',' separator"))?;

    let is_base64 = meta
        .rsplit(';')
        .next()
        .is_some_and(|p| p.eq_ignore_ascii_case("base64"));
    let mime = match meta.split(';').next() {
        Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };

    let bytes = if is_base64 {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map_err(|e| invalid(&format!("bad base64: {e}")))?
    } else {
        percent_decode(payload)
    };
    Ok((mime, bytes))
}

fn percent_decode(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            if let Some(&[hi, lo]) = hex {
                if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() {
                    out.push(hex_value(hi) << 4 | hex_value(lo));
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/svg+xml" => "svg",
        _ => "bin",
    }
}
