//! Import assembly: rendered pages and converted Word markup → editor markup.
//!
//! A PDF import turns every selected page into one block:
//!
//! ```text
//! <div class="pdf-page" data-page-number="N" style="width: Wpx; height: Hpx;">
//!   <svg …>…</svg>
//! </div>
//! ```
//!
//! with a page-break marker between consecutive blocks. Before wrapping,
//! every `data:` URI inside the page SVG is resolved through the
//! [`BlobCache`] and rewritten to its local reference. The resolves of one
//! page run concurrently and are joined before the next page starts.
//!
//! Nothing here touches the editing surface: the caller commits the returned
//! markup in one step, so a failure on any page discards the whole import.

use crate::blob_cache::{BlobCache, LocalRef};
use crate::config::SessionConfig;
use crate::error::PagesmithError;
use crate::markup::{count_page_breaks, escape_html, join_with_breaks};
use crate::output::ImportReport;
use crate::pipeline::input::InputFormat;
use crate::pipeline::render::{format_px, PdfRenderer, RenderOptions, SvgPage};
use crate::pipeline::word::WordConverter;
use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Markup produced by an import, not yet committed.
#[derive(Debug, Clone)]
pub struct ImportedDocument {
    pub markup: String,
    pub report: ImportReport,
}

/// `href="data:…"` or `href='data:…'`; the payload is group 2 or 3.
static RE_DATA_HREF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"((?:xlink:)?href)\s*=\s*(?:"(data:[^"]*)"|'(data:[^']*)')"#).unwrap()
});

fn data_payload<'h>(caps: &Captures<'h>) -> Option<&'h str> {
    caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str())
}

/// Render a PDF and assemble its pages into editor markup.
pub async fn import_pdf(
    pdf: Vec<u8>,
    renderer: Arc<dyn PdfRenderer>,
    cache: &BlobCache,
    config: &SessionConfig,
) -> Result<ImportedDocument, PagesmithError> {
    let start = Instant::now();
    let hits_before = cache.hits();
    let options = RenderOptions {
        scale: config.pdf_scale,
        embed_fonts: config.embed_fonts,
        password: config.password.clone(),
        pages: config.pages.clone(),
    };

    let pages = tokio::task::spawn_blocking(move || renderer.render_svg_pages(&pdf, &options))
        .await
        .map_err(|e| PagesmithError::Internal(format!("Render task panicked: {e}")))??;

    let total = pages.len();
    info!("Rendered {} PDF pages in {}ms", total, start.elapsed().as_millis());
    if let Some(ref cb) = config.progress_callback {
        cb.on_import_start(total);
    }

    let mut blocks = Vec::with_capacity(total);
    let mut images_rewritten = 0;
    for page in &pages {
        if let Some(ref cb) = config.progress_callback {
            cb.on_page_start(page.page_number, total);
        }

        let (svg, rewritten) =
            match rewrite_embedded_images(&page.svg, cache, config.image_concurrency).await {
                Ok(done) => done,
                Err(e) => {
                    warn!("Import aborted on page {}: {}", page.page_number, e);
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_page_error(page.page_number, total, &e.to_string());
                    }
                    return Err(e);
                }
            };
        images_rewritten += rewritten;
        blocks.push(wrap_page(page, &svg));

        if let Some(ref cb) = config.progress_callback {
            cb.on_page_complete(page.page_number, total, rewritten);
        }
    }

    let markup = join_with_breaks(&blocks);
    let report = ImportReport {
        format: Some(InputFormat::Pdf),
        pages: total,
        page_breaks: total.saturating_sub(1),
        images_rewritten,
        cache_hits: cache.hits() - hits_before,
        cached_blobs: cache.len(),
        markup_len: markup.len(),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    debug!("PDF import assembled: {:?}", report);

    Ok(ImportedDocument { markup, report })
}

/// Convert a Word package to editor markup.
pub async fn import_word(
    bytes: Vec<u8>,
    converter: Arc<dyn WordConverter>,
) -> Result<ImportedDocument, PagesmithError> {
    let start = Instant::now();
    let markup = tokio::task::spawn_blocking(move || converter.convert(&bytes))
        .await
        .map_err(|e| PagesmithError::Internal(format!("Word conversion task panicked: {e}")))??;

    let page_breaks = count_page_breaks(&markup);
    let report = ImportReport {
        format: Some(InputFormat::Word),
        pages: page_breaks + 1,
        page_breaks,
        markup_len: markup.len(),
        duration_ms: start.elapsed().as_millis() as u64,
        ..Default::default()
    };
    Ok(ImportedDocument { markup, report })
}

/// Rewrite every `data:` URI in `svg` to its blob-cache reference.
///
/// Returns the rewritten SVG and the number of references replaced.
pub async fn rewrite_embedded_images(
    svg: &str,
    cache: &BlobCache,
    concurrency: usize,
) -> Result<(String, usize), PagesmithError> {
    let mut seen = HashSet::new();
    let ids: Vec<&str> = RE_DATA_HREF
        .captures_iter(svg)
        .filter_map(|c| data_payload(&c))
        .filter(|id| seen.insert(*id))
        .collect();
    if ids.is_empty() {
        return Ok((svg.to_string(), 0));
    }

    let resolved: HashMap<&str, LocalRef> = stream::iter(ids)
        .map(|id| async move { cache.resolve(id).await.map(|local| (id, local)) })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut rewritten = 0;
    let out = RE_DATA_HREF.replace_all(svg, |caps: &Captures| {
        match data_payload(caps).and_then(|id| resolved.get(id)) {
            Some(local) => {
                rewritten += 1;
                format!(r#"{}="{}""#, &caps[1], escape_html(local.href()))
            }
            None => caps[0].to_string(),
        }
    });
    Ok((out.into_owned(), rewritten))
}

/// Container block for one rendered page, sized to its viewport.
pub fn wrap_page(page: &SvgPage, svg: &str) -> String {
    format!(
        r#"<div class="pdf-page" data-page-number="{}" style="width: {}px; height: {}px;">{}</div>"#,
        page.page_number,
        format_px(page.width),
        format_px(page.height),
        svg
    )
}
