//! Configuration for a document session.
//!
//! Every knob of the import and export pipelines lives in
//! [`SessionConfig`], built via [`SessionConfigBuilder`]. A session clones
//! the config once at creation; it is never mutated afterwards.

use crate::error::PagesmithError;
use crate::progress::{ImportProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a [`crate::session::DocumentSession`].
///
/// # Example
/// ```rust
/// use pagesmith::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .pdf_scale(2.0)
///     .image_concurrency(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.pdf_scale, 2.0);
/// ```
#[derive(Clone)]
pub struct SessionConfig {
    /// Scale factor applied to the PDF viewport on import. Range: 0.25–4.0. Default: 1.5.
    ///
    /// 1.5 keeps small print legible on screen while holding the size of the
    /// produced page images down.
    pub pdf_scale: f32,

    /// Ask the PDF renderer to render embedded fonts itself. Default: true.
    pub embed_fonts: bool,

    /// Upper bound on concurrent blob-cache resolves within one page. Default: 8.
    pub image_concurrency: usize,

    /// Device pixel ratio used when rasterising page fragments. Range: 1.0–4.0. Default: 2.0.
    pub pixel_ratio: f32,

    /// Physical page width in millimetres for paged export. Default: 210 (A4).
    pub page_width_mm: f32,

    /// Physical page height in millimetres for paged export. Default: 297 (A4).
    pub page_height_mm: f32,

    /// Margin on every side of an exported page, in millimetres. Default: 10.
    pub page_margin_mm: f32,

    /// Which PDF pages to import. Default: all.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory that keeps materialised image payloads after the session
    /// ends. Default: a scratch directory removed with the session.
    pub blob_dir: Option<PathBuf>,

    /// Optional per-page import progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pdf_scale: 1.5,
            embed_fonts: true,
            image_concurrency: 8,
            pixel_ratio: 2.0,
            page_width_mm: 210.0,
            page_height_mm: 297.0,
            page_margin_mm: 10.0,
            pages: PageSelection::default(),
            password: None,
            download_timeout_secs: 120,
            blob_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("pdf_scale", &self.pdf_scale)
            .field("embed_fonts", &self.embed_fonts)
            .field("image_concurrency", &self.image_concurrency)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("page_width_mm", &self.page_width_mm)
            .field("page_height_mm", &self.page_height_mm)
            .field("page_margin_mm", &self.page_margin_mm)
            .field("pages", &self.pages)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("blob_dir", &self.blob_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ImportProgressCallback>"),
            )
            .finish()
    }
}

impl SessionConfig {
    /// Create a new builder for `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Width available to page content once both margins are removed.
    pub fn content_width_mm(&self) -> f32 {
        self.page_width_mm - 2.0 * self.page_margin_mm
    }
}

/// Builder for [`SessionConfig`].
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl fmt::Debug for SessionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl SessionConfigBuilder {
    pub fn pdf_scale(mut self, scale: f32) -> Self {
        self.config.pdf_scale = scale.clamp(0.25, 4.0);
        self
    }

    pub fn embed_fonts(mut self, v: bool) -> Self {
        self.config.embed_fonts = v;
        self
    }

    pub fn image_concurrency(mut self, n: usize) -> Self {
        self.config.image_concurrency = n.max(1);
        self
    }

    pub fn pixel_ratio(mut self, ratio: f32) -> Self {
        self.config.pixel_ratio = ratio.clamp(1.0, 4.0);
        self
    }

    pub fn page_size_mm(mut self, width: f32, height: f32) -> Self {
        self.config.page_width_mm = width;
        self.config.page_height_mm = height;
        self
    }

    pub fn page_margin_mm(mut self, margin: f32) -> Self {
        self.config.page_margin_mm = margin.max(0.0);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn blob_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.blob_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn ImportProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SessionConfig, PagesmithError> {
        let c = &self.config;
        for (name, value) in [
            ("pdf_scale", c.pdf_scale),
            ("pixel_ratio", c.pixel_ratio),
            ("page_width_mm", c.page_width_mm),
            ("page_height_mm", c.page_height_mm),
            ("page_margin_mm", c.page_margin_mm),
        ] {
            if !value.is_finite() {
                return Err(PagesmithError::InvalidConfig(format!(
                    "{name} must be a finite number, got {value}"
                )));
            }
        }
        if !(c.page_width_mm > 0.0 && c.page_height_mm > 0.0) {
            return Err(PagesmithError::InvalidConfig(format!(
                "page size must be positive, got {}×{} mm",
                c.page_width_mm, c.page_height_mm
            )));
        }
        if c.content_width_mm() <= 0.0 {
            return Err(PagesmithError::InvalidConfig(format!(
                "margins of {} mm leave no room on a {} mm wide page",
                c.page_margin_mm, c.page_width_mm
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Specifies which pages of a PDF to import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Import all pages (default).
    #[default]
    All,
    /// Import a single page (1-indexed).
    Single(usize),
    /// Import a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Import specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let c = SessionConfig::default();
        assert_eq!(c.pdf_scale, 1.5);
        assert_eq!(c.pixel_ratio, 2.0);
        assert!(c.embed_fonts);
        assert_eq!(c.content_width_mm(), 190.0);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = SessionConfig::builder()
            .pdf_scale(40.0)
            .pixel_ratio(0.1)
            .image_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(c.pdf_scale, 4.0);
        assert_eq!(c.pixel_ratio, 1.0);
        assert_eq!(c.image_concurrency, 1);
    }

    #[test]
    fn margins_wider_than_page_are_rejected() {
        let err = SessionConfig::builder()
            .page_size_mm(100.0, 100.0)
            .page_margin_mm(60.0)
            .build()
            .unwrap_err();
        assert!(matches!(err, PagesmithError::InvalidConfig(_)));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        for builder in [
            SessionConfig::builder().pdf_scale(f32::NAN),
            SessionConfig::builder().pixel_ratio(f32::NAN),
            SessionConfig::builder().page_margin_mm(f32::NAN),
            SessionConfig::builder().page_size_mm(f32::INFINITY, 297.0),
        ] {
            let err = builder.build().unwrap_err();
            assert!(matches!(err, PagesmithError::InvalidConfig(_)), "{err}");
        }
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageSelection::Single(2).to_indices(3), vec![1]);
        assert_eq!(PageSelection::Single(9).to_indices(3), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 10).to_indices(4), vec![1, 2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(5), vec![0, 2]);
    }

    #[test]
    fn debug_redacts_password() {
        let c = SessionConfig::builder().password("hunter2").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("hunter2"));
    }
}
