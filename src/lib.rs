//! # pagesmith
//!
//! Paginated document editing support: import PDF and Word files into
//! editable markup, keep explicit page breaks in that markup, and export the
//! result either as a paged PDF or as a structured Word document.
//!
//! ## Why this crate?
//!
//! An editor that shows a document page by page needs one notion of "page"
//! that survives every round trip. Here a page break is a single marker
//! element ([`PAGE_BREAK_HTML`]) stored in the markup itself. Imported PDFs
//! get one marker between consecutive pages, Word page breaks become markers,
//! and both exporters cut the document on the same markers through one
//! splitter ([`split_pages`]), so the page count you edit is the page count
//! you export.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / DOCX
//!  │
//!  ├─ 1. Input    resolve local file or download from URL, detect format
//!  ├─ 2. Convert  PDF pages → SVG via pdfium (spawn_blocking)
//!  │              DOCX → markup with page-break markers
//!  ├─ 3. Images   embedded data: URIs → de-duplicated local files (blob cache)
//!  ├─ 4. Commit   markup replaces the editing surface atomically
//!  └─ 5. Export   paged: split → rasterise → assemble document.pdf
//!                 structured: tree walk → paragraphs → document.docx
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagesmith::{DocumentSession, MemorySurface, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = DocumentSession::new(MemorySurface::default(), SessionConfig::default())?;
//!     let report = session.import_from("report.pdf").await?;
//!     eprintln!("{} pages, {} images", report.pages, report.images_rewritten);
//!
//!     let pdf = session.export_pdf().await?;
//!     pdf.write_to_dir(".").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagesmith` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pagesmith = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! PDF import and paged export bind the pdfium shared library at run time.
//! Set `PDFIUM_LIB_PATH` to the directory holding the library, or install it
//! where the system loader finds it. Word import, structured export and the
//! placeholder registry work without pdfium.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod blob_cache;
pub mod config;
pub mod error;
pub mod images;
pub mod markup;
pub mod output;
pub mod pipeline;
pub mod placeholders;
pub mod progress;
pub mod session;
pub mod surface;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use blob_cache::{BlobCache, LocalRef};
pub use config::{PageSelection, SessionConfig, SessionConfigBuilder};
pub use error::PagesmithError;
pub use images::ImageDescriptor;
pub use markup::{inspect_pages, split_pages, PageFragment, PAGE_BREAK_HTML};
pub use output::{ExportedFile, ImportReport};
pub use pipeline::input::{InputFormat, ResolvedInput};
pub use pipeline::raster::{
    FragmentRasterizer, ImageFragmentRasterizer, PdfAssembler, PdfiumAssembler, PlacedPage,
};
pub use pipeline::render::{PdfRenderer, PdfiumRenderer, RenderOptions, SvgPage};
pub use pipeline::word::{DocxConverter, WordConverter};
pub use placeholders::{
    JsonFileStore, KeyValueStore, MemoryStore, Placeholder, PlaceholderOrigin,
    PlaceholderRegistry,
};
pub use progress::{ImportProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::DocumentSession;
pub use surface::{EditorSurface, MemorySurface};
