//! Progress-callback trait for per-page import events.
//!
//! Inject an [`Arc<dyn ImportProgressCallback>`] via
//! [`crate::config::SessionConfigBuilder::progress_callback`] to receive
//! events while a PDF import walks its pages. The CLI drives an `indicatif`
//! progress bar from it.
//!
//! # Example
//!
//! ```rust
//! use pagesmith::{ImportProgressCallback, SessionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ImportProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, images: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Page {}/{} imported ({} images)", page_num, total_pages, images);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = SessionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ImportProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the PDF import pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Pages are reported in document order.
pub trait ImportProgressCallback: Send + Sync {
    /// Called once, after rendering, before the first page is post-processed.
    fn on_import_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called before a page's image references are resolved.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called once a page block has been assembled.
    ///
    /// # Arguments
    /// * `page_num`    — 1-indexed source page number
    /// * `total_pages` — pages selected for import
    /// * `images`      — embedded image references rewritten on this page
    fn on_page_complete(&self, page_num: usize, total_pages: usize, images: usize) {
        let _ = (page_num, total_pages, images);
    }

    /// Called when a page fails. The import is aborted right after.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the new content has been committed to the surface.
    fn on_import_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ImportProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SessionConfig`].
pub type ProgressCallback = Arc<dyn ImportProgressCallback>;
