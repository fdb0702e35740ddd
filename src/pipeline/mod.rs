//! Pipeline stages for importing and exporting paginated documents.
//!
//! Each submodule implements one transformation step and depends only on
//! markup strings and the collaborator traits, never on a live editor.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─ word ───────────────────────────┐
//! input ─────┤                                  ├──▶ markup (surface)
//!            └─ render ──▶ encode ──▶ import ───┘        │
//!               (pdfium)   (data URI)  (blob cache)      │
//!                                                        ├──▶ raster ──▶ document.pdf
//!                                                        └──▶ docx   ──▶ document.docx
//! ```
//!
//! 1. [`input`]  — canonicalise a path or URL to bytes plus a detected format
//! 2. [`word`]   — Word package → markup with page-break markers
//! 3. [`render`] — PDF pages → SVG; pdfium runs in `spawn_blocking`
//! 4. [`encode`] — bitmap → PNG `data:` URI for embedding in SVG
//! 5. [`import`] — resolve embedded images through the blob cache, wrap
//!    pages, join them with markers
//! 6. [`raster`] — split on markers, rasterise fragments, assemble a PDF
//! 7. [`docx`]   — walk the markup tree into paragraphs and write a DOCX
//!
//! [`dom`] holds the html5ever parsing helpers shared by `raster` and `docx`.

pub mod docx;
pub mod dom;
pub mod encode;
pub mod import;
pub mod input;
pub mod raster;
pub mod render;
pub mod word;
