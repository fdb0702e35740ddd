//! Error types for the pagesmith library.
//!
//! A single fatal error type, [`PagesmithError`], covers every pipeline.
//! Imports and exports are all-or-nothing: a failure on page 7 of a PDF
//! import discards pages 1–6 as well and leaves the editing surface exactly
//! as it was, so there is no per-page error type to collect.
//!
//! The three failure families that callers usually surface to a user are:
//!
//! * [`PagesmithError::ConversionFailed`] — a foreign format could not be
//!   parsed or rendered (import, or DOCX serialisation on export).
//! * [`PagesmithError::DuplicatePlaceholder`] — rejected at the registry
//!   boundary, no state change.
//! * [`PagesmithError::RasterisationFailed`] — a page fragment could not be
//!   turned into a bitmap; the whole paged export is aborted.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pagesmith library.
#[derive(Debug, Error)]
pub enum PagesmithError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The file extension is not one of `.doc`, `.docx` or `.pdf`.
    #[error("Unsupported input format '{name}': expected .doc, .docx or .pdf")]
    UnsupportedFormat { name: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The payload was announced as a PDF but does not start with `%PDF`.
    #[error("Input '{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// A foreign document could not be converted. The document is unchanged.
    #[error("Could not convert {format} document: {detail}")]
    ConversionFailed { format: &'static str, detail: String },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf --decrypt input.pdf output.pdf")]
    CorruptPdf { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF")]
    WrongPassword,

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// A page fragment could not be rasterised; the export was aborted.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Blob cache errors ─────────────────────────────────────────────────
    /// An embedded image reference is not a decodable `data:` URI.
    #[error("Malformed data URI ({detail})")]
    InvalidDataUri { detail: String },

    /// A decoded image payload could not be written to the scratch directory.
    #[error("Failed to materialise image blob at '{path}': {source}")]
    BlobWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Placeholder errors ────────────────────────────────────────────────
    /// The placeholder token is already visible in the registry.
    #[error("Placeholder {token} already exists")]
    DuplicatePlaceholder { token: String },

    /// The placeholder label is empty after normalisation.
    #[error("Invalid placeholder label '{label}'")]
    InvalidPlaceholder { label: String },

    /// The persisted placeholder lists could not be read or written.
    #[error("Placeholder store error: {0}")]
    StoreFailed(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// Another operation of the same class is still running on this document.
    #[error("An {kind} is already in progress for this document")]
    OperationInProgress { kind: &'static str },

    /// No resizable image with this id is held by the session.
    #[error("No image with id '{id}'")]
    ImageNotFound { id: String },

    /// Images must keep a non-zero display size.
    #[error("Invalid image size {width}x{height}: both sides must be at least 1px")]
    InvalidImageSize { width: u32, height: u32 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an exported file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform, or set PDFIUM_LIB_PATH to the\n\
directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PagesmithError {
    /// Shorthand for a [`PagesmithError::ConversionFailed`] with any displayable cause.
    pub(crate) fn conversion(format: &'static str, detail: impl std::fmt::Display) -> Self {
        PagesmithError::ConversionFailed {
            format,
            detail: detail.to_string(),
        }
    }
}
