//! Paged raster export: editor markup → one bitmap per page → PDF.
//!
//! ```text
//! markup ──split_pages──► fragments ──FragmentRasterizer──► bitmaps
//!                                                              │
//!                              document.pdf ◄──PdfAssembler── place_page
//! ```
//!
//! Every fragment becomes exactly one output page, blank fragments included.
//! The bitmap is drawn at the top-left margin with the content width of the
//! page; its height follows the bitmap's aspect ratio. Content taller than
//! the page is neither clipped nor continued on a new page.
//!
//! Both stages are synchronous and CPU-bound; [`export_paged`] runs them on
//! the blocking pool.

use crate::blob_cache::parse_data_uri;
use crate::config::SessionConfig;
use crate::error::PagesmithError;
use crate::markup::{split_pages, PageFragment};
use crate::output::{ExportedFile, PDF_FILE_NAME, PDF_MIME_TYPE};
use crate::pipeline::dom::{attr, parse_markup};
use crate::pipeline::render::bind_pdfium;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use markup5ever_rcdom::{Handle, NodeData};
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Turns one page fragment into a bitmap.
pub trait FragmentRasterizer: Send + Sync {
    fn rasterize(
        &self,
        fragment: &PageFragment,
        pixel_ratio: f32,
    ) -> Result<DynamicImage, PagesmithError>;
}

/// Writes placed page bitmaps into a PDF file.
pub trait PdfAssembler: Send + Sync {
    fn assemble(&self, pages: &[PlacedPage]) -> Result<Vec<u8>, PagesmithError>;
}

/// Physical page used by the paged export, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width_mm: f32,
    pub height_mm: f32,
    pub margin_mm: f32,
}

impl PageGeometry {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            width_mm: config.page_width_mm,
            height_mm: config.page_height_mm,
            margin_mm: config.page_margin_mm,
        }
    }
}

impl Default for PageGeometry {
    /// A4 portrait with 10 mm margins.
    fn default() -> Self {
        Self {
            width_mm: 210.0,
            height_mm: 297.0,
            margin_mm: 10.0,
        }
    }
}

/// A page bitmap and where it goes on its output page.
///
/// `x_mm`/`y_mm` are measured from the top-left corner of the page.
#[derive(Debug, Clone)]
pub struct PlacedPage {
    pub image: DynamicImage,
    pub page_width_mm: f32,
    pub page_height_mm: f32,
    pub x_mm: f32,
    pub y_mm: f32,
    pub width_mm: f32,
    pub height_mm: f32,
}

/// Place a bitmap at the top-left margin, scaled to the content width.
pub fn place_page(image: DynamicImage, geometry: PageGeometry) -> PlacedPage {
    let width_mm = geometry.width_mm - 2.0 * geometry.margin_mm;
    let (px_w, px_h) = image.dimensions();
    let height_mm = if px_w == 0 {
        0.0
    } else {
        width_mm * px_h as f32 / px_w as f32
    };
    PlacedPage {
        image,
        page_width_mm: geometry.width_mm,
        page_height_mm: geometry.height_mm,
        x_mm: geometry.margin_mm,
        y_mm: geometry.margin_mm,
        width_mm,
        height_mm,
    }
}

/// Split the markup and rasterise every fragment, in order.
///
/// The first failing fragment aborts the layout; its 1-indexed page number
/// is reported in [`PagesmithError::RasterisationFailed`].
pub fn layout_pages(
    markup: &str,
    rasterizer: &dyn FragmentRasterizer,
    config: &SessionConfig,
) -> Result<Vec<PlacedPage>, PagesmithError> {
    let geometry = PageGeometry::from_config(config);
    let fragments = split_pages(markup);
    let total = fragments.len();
    let mut placed = Vec::with_capacity(total);

    for fragment in &fragments {
        let page = fragment.index + 1;
        let image = rasterizer
            .rasterize(fragment, config.pixel_ratio)
            .map_err(|e| match e {
                PagesmithError::RasterisationFailed { .. } => e,
                other => PagesmithError::RasterisationFailed {
                    page,
                    detail: other.to_string(),
                },
            })?;
        debug!(
            "Rasterised page {}/{} → {}x{} px",
            page,
            total,
            image.width(),
            image.height()
        );
        placed.push(place_page(image, geometry));
    }
    Ok(placed)
}

/// Produce `document.pdf` from the editor markup.
pub async fn export_paged(
    markup: String,
    rasterizer: Arc<dyn FragmentRasterizer>,
    assembler: Arc<dyn PdfAssembler>,
    config: SessionConfig,
) -> Result<ExportedFile, PagesmithError> {
    let start = Instant::now();
    let (units, bytes) = tokio::task::spawn_blocking(move || {
        let pages = layout_pages(&markup, rasterizer.as_ref(), &config)?;
        let bytes = assembler.assemble(&pages)?;
        Ok::<_, PagesmithError>((pages.len(), bytes))
    })
    .await
    .map_err(|e| PagesmithError::Internal(format!("Export task panicked: {e}")))??;

    info!(
        "Exported {} pages → {} bytes in {}ms",
        units,
        bytes.len(),
        start.elapsed().as_millis()
    );
    Ok(ExportedFile {
        file_name: PDF_FILE_NAME,
        mime_type: PDF_MIME_TYPE,
        units,
        bytes,
    })
}

// ── Built-in rasterizer ──────────────────────────────────────────────────

/// Canvas used when a fragment declares no size: A4 at 96 dpi.
const DEFAULT_CANVAS_PX: (f32, f32) = (794.0, 1123.0);

/// Largest canvas edge, in device pixels.
const MAX_CANVAS_PX: f32 = 16_384.0;

static RE_STYLE_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"width:\s*([\d.]+)px;\s*height:\s*([\d.]+)px").unwrap()
});

/// [`FragmentRasterizer`] that composites the images of a fragment onto a
/// white canvas.
///
/// Imported PDF pages are a wrapper `div` sized in pixels around an SVG whose
/// `image` elements carry explicit positions, which is all this needs to
/// reproduce them. `img` elements elsewhere are stacked top to bottom. Text
/// is not laid out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFragmentRasterizer;

#[derive(Debug)]
struct Layer {
    source: String,
    x: f32,
    /// `None` for flow images, which stack below the previous one.
    y: Option<f32>,
    width: Option<f32>,
    height: Option<f32>,
}

#[derive(Debug, Default)]
struct Scene {
    size: Option<(f32, f32)>,
    layers: Vec<Layer>,
}

fn parse_px(value: Option<String>) -> Option<f32> {
    value?
        .trim()
        .trim_end_matches("px")
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn collect_scene(handle: &Handle, scene: &mut Scene) {
    if let NodeData::Element { name, attrs, .. } = &handle.data {
        match &*name.local {
            "script" | "style" => return,
            "div" if scene.size.is_none() => {
                if let Some(caps) = attr(attrs, "style").and_then(|s| {
                    RE_STYLE_SIZE
                        .captures(&s)
                        .map(|c| (c[1].to_string(), c[2].to_string()))
                }) {
                    if let (Ok(w), Ok(h)) = (caps.0.parse(), caps.1.parse()) {
                        scene.size = Some((w, h));
                    }
                }
            }
            "svg" if scene.size.is_none() => {
                if let (Some(w), Some(h)) =
                    (parse_px(attr(attrs, "width")), parse_px(attr(attrs, "height")))
                {
                    scene.size = Some((w, h));
                }
            }
            "image" => {
                if let Some(source) = attr(attrs, "href") {
                    scene.layers.push(Layer {
                        source,
                        x: parse_px(attr(attrs, "x")).unwrap_or(0.0),
                        y: Some(parse_px(attr(attrs, "y")).unwrap_or(0.0)),
                        width: parse_px(attr(attrs, "width")),
                        height: parse_px(attr(attrs, "height")),
                    });
                }
            }
            "img" => {
                if let Some(source) = attr(attrs, "src") {
                    scene.layers.push(Layer {
                        source,
                        x: 0.0,
                        y: None,
                        width: parse_px(attr(attrs, "width")),
                        height: parse_px(attr(attrs, "height")),
                    });
                }
            }
            _ => {}
        }
    }
    for child in handle.children.borrow().iter() {
        collect_scene(child, scene);
    }
}

/// Decode an image reference: `data:` URI, `file://` URL or local path.
fn load_source(source: &str) -> Result<DynamicImage, String> {
    if source.starts_with("data:") {
        let (_, bytes) = parse_data_uri(source).map_err(|e| e.to_string())?;
        return image::load_from_memory(&bytes).map_err(|e| format!("decode: {e}"));
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return Err(format!("remote image '{source}' is not fetched during export"));
    }
    let path = if source.starts_with("file:") {
        reqwest::Url::parse(source)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| format!("bad file URL '{source}'"))?
    } else {
        std::path::PathBuf::from(source)
    };
    image::open(&path).map_err(|e| format!("{}: {e}", path.display()))
}

fn device_px(css_px: f32, ratio: f32) -> u32 {
    (css_px * ratio).round().max(1.0) as u32
}

impl FragmentRasterizer for ImageFragmentRasterizer {
    fn rasterize(
        &self,
        fragment: &PageFragment,
        pixel_ratio: f32,
    ) -> Result<DynamicImage, PagesmithError> {
        let page = fragment.index + 1;
        let fail = |detail: String| PagesmithError::RasterisationFailed { page, detail };

        let mut scene = Scene::default();
        if !fragment.is_blank() {
            let dom = parse_markup(&fragment.markup);
            collect_scene(&dom.document, &mut scene);
        }

        // Resolve every layer to a box in CSS pixels before sizing the canvas.
        let mut placed = Vec::with_capacity(scene.layers.len());
        let mut flow_y = 0.0f32;
        for layer in scene.layers {
            let img = load_source(&layer.source).map_err(fail)?;
            let (nat_w, nat_h) = (img.width() as f32, img.height() as f32);
            let width = layer.width.unwrap_or(nat_w);
            let height = layer
                .height
                .unwrap_or(if nat_w > 0.0 { width * nat_h / nat_w } else { 0.0 });
            let y = match layer.y {
                Some(y) => y,
                None => {
                    let y = flow_y;
                    flow_y += height;
                    y
                }
            };
            placed.push((img, layer.x, y, width, height));
        }

        let (css_w, css_h) = scene
            .size
            .unwrap_or((DEFAULT_CANVAS_PX.0, DEFAULT_CANVAS_PX.1.max(flow_y)));
        if css_w * pixel_ratio > MAX_CANVAS_PX || css_h * pixel_ratio > MAX_CANVAS_PX {
            return Err(fail(format!(
                "canvas {css_w}x{css_h} at ratio {pixel_ratio} exceeds {MAX_CANVAS_PX} px"
            )));
        }

        let mut canvas = RgbaImage::from_pixel(
            device_px(css_w, pixel_ratio),
            device_px(css_h, pixel_ratio),
            Rgba([255, 255, 255, 255]),
        );
        let (canvas_w, canvas_h) = (canvas.width() as f32, canvas.height() as f32);
        for (img, x, y, w, h) in placed {
            if w <= 0.0 || h <= 0.0 {
                warn!("Skipping zero-sized image on page {}", page);
                continue;
            }
            let (left, top) = (x * pixel_ratio, y * pixel_ratio);
            if left >= canvas_w || top >= canvas_h {
                debug!("Skipping image outside the canvas on page {}", page);
                continue;
            }
            if w * pixel_ratio > MAX_CANVAS_PX || h * pixel_ratio > MAX_CANVAS_PX {
                return Err(fail(format!(
                    "image {w}x{h} at ratio {pixel_ratio} exceeds {MAX_CANVAS_PX} px"
                )));
            }
            let scaled = imageops::resize(
                &img,
                device_px(w, pixel_ratio),
                device_px(h, pixel_ratio),
                FilterType::Triangle,
            );
            imageops::overlay(&mut canvas, &scaled, left.round() as i64, top.round() as i64);
        }
        Ok(DynamicImage::ImageRgba8(canvas))
    }
}

// ── Built-in assembler ───────────────────────────────────────────────────

/// [`PdfAssembler`] backed by pdfium: one PDF page per placed bitmap.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumAssembler;

impl PdfAssembler for PdfiumAssembler {
    fn assemble(&self, pages: &[PlacedPage]) -> Result<Vec<u8>, PagesmithError> {
        let pdfium = bind_pdfium()?;
        let mut document = pdfium
            .create_new_pdf()
            .map_err(|e| PagesmithError::conversion("PDF", format!("{e:?}")))?;

        for (idx, placed) in pages.iter().enumerate() {
            let fail = |e: PdfiumError| PagesmithError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            };
            let mut page = document
                .pages_mut()
                .create_page_at_end(PdfPagePaperSize::Custom(
                    PdfPoints::from_mm(placed.page_width_mm),
                    PdfPoints::from_mm(placed.page_height_mm),
                ))
                .map_err(fail)?;

            // PDF user space has its origin at the bottom-left corner.
            let bottom_mm = placed.page_height_mm - placed.y_mm - placed.height_mm;
            page.objects_mut()
                .create_image_object(
                    PdfPoints::from_mm(placed.x_mm),
                    PdfPoints::from_mm(bottom_mm),
                    &placed.image,
                    Some(PdfPoints::from_mm(placed.width_mm)),
                    Some(PdfPoints::from_mm(placed.height_mm)),
                )
                .map_err(fail)?;
        }

        document
            .save_to_bytes()
            .map_err(|e| PagesmithError::conversion("PDF", format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markup::PAGE_BREAK_HTML;
    use crate::pipeline::encode::png_data_uri;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn solid(w: u32, h: u32, rgba: [u8; 4]) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba(rgba)))
    }

    struct FixedRasterizer;

    impl FragmentRasterizer for FixedRasterizer {
        fn rasterize(
            &self,
            fragment: &PageFragment,
            _pixel_ratio: f32,
        ) -> Result<DynamicImage, PagesmithError> {
            if fragment.markup.contains("boom") {
                return Err(PagesmithError::Internal("boom".into()));
            }
            Ok(solid(100, 200, [0, 0, 0, 255]))
        }
    }

    #[derive(Default)]
    struct CountingAssembler(AtomicUsize);

    impl PdfAssembler for CountingAssembler {
        fn assemble(&self, pages: &[PlacedPage]) -> Result<Vec<u8>, PagesmithError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("%PDF pages={}", pages.len()).into_bytes())
        }
    }

    #[test]
    fn placement_uses_margins_and_aspect_ratio() {
        let placed = place_page(solid(1000, 500, [0; 4]), PageGeometry::default());
        assert_eq!(placed.x_mm, 10.0);
        assert_eq!(placed.y_mm, 10.0);
        assert_eq!(placed.width_mm, 190.0);
        assert_eq!(placed.height_mm, 95.0);
        assert_eq!(placed.page_height_mm, 297.0);
    }

    #[test]
    fn tall_content_is_not_clipped() {
        let placed = place_page(solid(100, 400, [0; 4]), PageGeometry::default());
        assert_eq!(placed.height_mm, 760.0);
    }

    #[test]
    fn every_fragment_becomes_a_page_blank_ones_included() {
        let markup = format!("<p>a</p>{PAGE_BREAK_HTML}{PAGE_BREAK_HTML}<p>c</p>");
        let pages = layout_pages(&markup, &FixedRasterizer, &SessionConfig::default()).unwrap();
        assert_eq!(pages.len(), 3);
    }

    #[test]
    fn failing_fragment_reports_its_page() {
        let markup = format!("<p>a</p>{PAGE_BREAK_HTML}<p>boom</p>");
        let err = layout_pages(&markup, &FixedRasterizer, &SessionConfig::default()).unwrap_err();
        assert!(matches!(err, PagesmithError::RasterisationFailed { page: 2, .. }));
    }

    #[tokio::test]
    async fn failed_export_never_reaches_the_assembler() {
        let assembler = Arc::new(CountingAssembler::default());
        let err = export_paged(
            format!("<p>ok</p>{PAGE_BREAK_HTML}<p>boom</p>"),
            Arc::new(FixedRasterizer),
            assembler.clone(),
            SessionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PagesmithError::RasterisationFailed { .. }));
        assert_eq!(assembler.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn export_names_the_file_and_counts_pages() {
        let file = export_paged(
            format!("<p>1</p>{PAGE_BREAK_HTML}<p>2</p>"),
            Arc::new(FixedRasterizer),
            Arc::new(CountingAssembler::default()),
            SessionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(file.file_name, "document.pdf");
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.units, 2);
    }

    #[test]
    fn rasterizer_composites_positioned_svg_images() {
        let red = png_data_uri(&solid(4, 4, [255, 0, 0, 255])).unwrap();
        let fragment = PageFragment {
            index: 0,
            markup: format!(
                r#"<div class="pdf-page" data-page-number="1" style="width: 100px; height: 50px;"><svg width="100" height="50"><image x="50" y="0" width="50" height="50" xlink:href="{red}"/></svg></div>"#
            ),
        };
        let img = ImageFragmentRasterizer.rasterize(&fragment, 2.0).unwrap();
        assert_eq!(img.dimensions(), (200, 100));
        let rgba = img.to_rgba8();
        assert_eq!(rgba.get_pixel(10, 10).0, [255, 255, 255, 255]);
        assert_eq!(rgba.get_pixel(150, 50).0, [255, 0, 0, 255]);
    }

    #[test]
    fn unsized_fragment_gets_the_default_canvas() {
        let fragment = PageFragment {
            index: 0,
            markup: "<p>just text</p>".into(),
        };
        let img = ImageFragmentRasterizer.rasterize(&fragment, 1.0).unwrap();
        assert_eq!(img.dimensions(), (794, 1123));
    }

    #[test]
    fn image_files_are_loaded_from_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blue.png");
        solid(2, 2, [0, 0, 255, 255]).save(&path).unwrap();
        let href = reqwest::Url::from_file_path(&path).unwrap().to_string();
        let fragment = PageFragment {
            index: 0,
            markup: format!(r#"<img src="{href}" width="794" height="100">"#),
        };
        let img = ImageFragmentRasterizer.rasterize(&fragment, 1.0).unwrap();
        assert_eq!(img.to_rgba8().get_pixel(400, 50).0, [0, 0, 255, 255]);
    }

    #[test]
    fn missing_image_fails_the_page() {
        let fragment = PageFragment {
            index: 4,
            markup: r#"<img src="/no/such/image.png">"#.into(),
        };
        let err = ImageFragmentRasterizer.rasterize(&fragment, 1.0).unwrap_err();
        assert!(matches!(err, PagesmithError::RasterisationFailed { page: 5, .. }));
    }

    #[test]
    fn oversized_image_fails_the_page_instead_of_allocating() {
        let red = png_data_uri(&solid(1, 1, [255, 0, 0, 255])).unwrap();
        let fragment = PageFragment {
            index: 1,
            markup: format!(
                r#"<svg width="100" height="100"><image x="0" y="0" width="100000" height="100000" href="{red}"/></svg>"#
            ),
        };
        let err = ImageFragmentRasterizer.rasterize(&fragment, 2.0).unwrap_err();
        assert!(matches!(err, PagesmithError::RasterisationFailed { page: 2, .. }));

        let flow = PageFragment {
            index: 0,
            markup: format!(r#"<img src="{red}" width="100000" height="100000">"#),
        };
        assert!(ImageFragmentRasterizer.rasterize(&flow, 2.0).is_err());
    }

    #[test]
    fn image_outside_the_canvas_is_skipped() {
        let red = png_data_uri(&solid(1, 1, [255, 0, 0, 255])).unwrap();
        let fragment = PageFragment {
            index: 0,
            markup: format!(
                r#"<svg width="100" height="100"><image x="500" y="0" width="100000" height="10" href="{red}"/></svg>"#
            ),
        };
        let img = ImageFragmentRasterizer.rasterize(&fragment, 1.0).unwrap();
        assert_eq!(img.dimensions(), (100, 100));
        assert_eq!(img.to_rgba8().get_pixel(50, 5).0, [255, 255, 255, 255]);
    }
}
