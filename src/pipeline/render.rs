//! PDF page rendering: binary PDF → one SVG image per page.
//!
//! The import pipeline treats the PDF engine as a black box behind
//! [`PdfRenderer`]: given the document bytes it returns, for every selected
//! page, an SVG image and the viewport it was drawn in. [`PdfiumRenderer`]
//! is the built-in implementation.
//!
//! ## Why spawn_blocking?
//!
//! pdfium uses thread-local state internally and is not safe to call from
//! async contexts. Callers run [`PdfRenderer::render_svg_pages`] inside
//! `tokio::task::spawn_blocking`; this module itself is fully synchronous.

use crate::config::PageSelection;
use crate::error::PagesmithError;
use crate::pipeline::encode;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Parameters handed to a [`PdfRenderer`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Viewport scale factor relative to PDF points.
    pub scale: f32,
    /// Render embedded fonts instead of relying on locally installed ones.
    pub embed_fonts: bool,
    pub password: Option<String>,
    pub pages: PageSelection,
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgPage {
    /// 1-indexed page number in the source PDF.
    pub page_number: usize,
    /// Viewport width in CSS pixels.
    pub width: f32,
    /// Viewport height in CSS pixels.
    pub height: f32,
    /// Standalone SVG document for the page.
    pub svg: String,
}

/// Black-box PDF engine: document bytes → per-page vector images.
pub trait PdfRenderer: Send + Sync {
    /// Render the selected pages, in ascending page order.
    fn render_svg_pages(
        &self,
        pdf: &[u8],
        options: &RenderOptions,
    ) -> Result<Vec<SvgPage>, PagesmithError>;
}

/// [`PdfRenderer`] backed by pdfium.
///
/// pdfium has no vector output, so each page is drawn to a bitmap at the
/// requested scale and embedded in an SVG that matches the viewport. Fonts
/// are always rasterised by pdfium itself, which satisfies `embed_fonts`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRenderer;

impl PdfRenderer for PdfiumRenderer {
    fn render_svg_pages(
        &self,
        pdf: &[u8],
        options: &RenderOptions,
    ) -> Result<Vec<SvgPage>, PagesmithError> {
        let pdfium = bind_pdfium()?;
        let password = options.password.as_deref();

        let document = pdfium
            .load_pdf_from_byte_slice(pdf, password)
            .map_err(|e| classify_load_error(&e, password.is_some()))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices = options.pages.to_indices(total_pages);
        if indices.is_empty() {
            return Err(PagesmithError::PageOutOfRange {
                page: 0,
                total: total_pages,
            });
        }
        if !options.embed_fonts {
            debug!("embed_fonts=false has no effect on the pdfium backend");
        }

        let render_config = PdfRenderConfig::new().scale_page_by_factor(options.scale);
        let mut results = Vec::with_capacity(indices.len());

        for idx in indices {
            let page_number = idx + 1;
            let page = pages
                .get(idx as u16)
                .map_err(|e| PagesmithError::conversion("PDF", format!("page {page_number}: {e:?}")))?;

            let width = page.width().value * options.scale;
            let height = page.height().value * options.scale;

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| PagesmithError::conversion("PDF", format!("page {page_number}: {e:?}")))?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px (viewport {:.1}x{:.1})",
                page_number,
                image.width(),
                image.height(),
                width,
                height
            );

            let data_uri = encode::png_data_uri(&image).map_err(|e| {
                PagesmithError::conversion("PDF", format!("page {page_number}: PNG encoding: {e}"))
            })?;

            results.push(SvgPage {
                page_number,
                width,
                height,
                svg: bitmap_page_svg(width, height, &data_uri),
            });
        }

        Ok(results)
    }
}

/// SVG document holding one full-viewport raster image.
pub fn bitmap_page_svg(width: f32, height: f32, href: &str) -> String {
    let (w, h) = (format_px(width), format_px(height));
    format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" "#,
            r#"width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            r#"<image x="0" y="0" width="{w}" height="{h}" xlink:href="{href}"/>"#,
            "</svg>"
        ),
        w = w,
        h = h,
        href = href
    )
}

/// Pixel value with at most two decimals and no trailing zeros.
pub fn format_px(v: f32) -> String {
    let s = format!("{v:.2}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Bind to a pdfium shared library.
///
/// `PDFIUM_LIB_PATH` names the directory holding the library; otherwise the
/// working directory is tried before the system library path.
pub fn bind_pdfium() -> Result<Pdfium, PagesmithError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| PagesmithError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

fn classify_load_error(e: &PdfiumError, had_password: bool) -> PagesmithError {
    let err_str = format!("{e:?}");
    if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            PagesmithError::WrongPassword
        } else {
            PagesmithError::PasswordRequired
        }
    } else {
        PagesmithError::CorruptPdf { detail: err_str }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_formatting_drops_trailing_zeros() {
        assert_eq!(format_px(918.0), "918");
        assert_eq!(format_px(612.25), "612.25");
        assert_eq!(format_px(841.5), "841.5");
        assert_eq!(format_px(0.0), "0");
    }

    #[test]
    fn bitmap_svg_matches_viewport() {
        let svg = bitmap_page_svg(918.0, 1188.0, "data:image/png;base64,AAAA");
        assert!(svg.starts_with("<svg "));
        assert!(svg.contains(r#"viewBox="0 0 918 1188""#));
        assert!(svg.contains(r#"xlink:href="data:image/png;base64,AAAA""#));
        assert!(svg.ends_with("</svg>"));
    }
}
