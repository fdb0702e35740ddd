//! Integration tests for the import → edit → export pipeline.
//!
//! The pdfium-backed collaborators are swapped for in-process fakes, so
//! these run without the pdfium shared library.

use image::{DynamicImage, RgbaImage};
use pagesmith::pipeline::docx::{collect_paragraphs, EMPTY_DOCUMENT_TEXT};
use pagesmith::{
    DocumentSession, FragmentRasterizer, ImageFragmentRasterizer, ImportProgressCallback,
    JsonFileStore, MemorySurface, PageFragment, PagesmithError, PdfAssembler, PdfRenderer,
    PlaceholderRegistry, PlacedPage, RenderOptions, ResolvedInput, SessionConfig, SvgPage,
    PAGE_BREAK_HTML,
};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;

// ── Fakes ────────────────────────────────────────────────────────────────────

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const PIXEL: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

/// Renders `pages` fixed pages, each optionally carrying the same image.
struct FakeRenderer {
    pages: usize,
    with_image: bool,
}

impl PdfRenderer for FakeRenderer {
    fn render_svg_pages(
        &self,
        _pdf: &[u8],
        options: &RenderOptions,
    ) -> Result<Vec<SvgPage>, PagesmithError> {
        let indices = options.pages.to_indices(self.pages);
        Ok(indices
            .into_iter()
            .map(|i| {
                let body = if self.with_image {
                    format!(r#"<image x="0" y="0" width="1" height="1" href="{PIXEL}"/>"#)
                } else {
                    String::new()
                };
                SvgPage {
                    page_number: i + 1,
                    width: 612.0,
                    height: 792.0,
                    svg: format!(r#"<svg width="612" height="792">{body}</svg>"#),
                }
            })
            .collect())
    }
}

/// A blank 40×60 bitmap per fragment; fails on the fragment index given.
struct FakeRasterizer {
    fail_on: Option<usize>,
    seen: Mutex<Vec<String>>,
}

impl FakeRasterizer {
    fn new(fail_on: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            fail_on,
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl FragmentRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        fragment: &PageFragment,
        pixel_ratio: f32,
    ) -> Result<DynamicImage, PagesmithError> {
        assert_eq!(pixel_ratio, 2.0);
        self.seen.lock().unwrap().push(fragment.markup.clone());
        if self.fail_on == Some(fragment.index) {
            return Err(PagesmithError::Internal("canvas exploded".into()));
        }
        Ok(DynamicImage::ImageRgba8(RgbaImage::new(40, 60)))
    }
}

/// Records how many pages it was asked to assemble.
#[derive(Default)]
struct CountingAssembler {
    calls: AtomicUsize,
    pages: AtomicUsize,
    heights_mm: Mutex<Vec<f32>>,
}

impl PdfAssembler for CountingAssembler {
    fn assemble(&self, pages: &[PlacedPage]) -> Result<Vec<u8>, PagesmithError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pages.store(pages.len(), Ordering::SeqCst);
        *self.heights_mm.lock().unwrap() = pages.iter().map(|p| p.height_mm).collect();
        Ok(format!("%PDF-fake {} pages", pages.len()).into_bytes())
    }
}

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<String>>,
}

impl ImportProgressCallback for RecordingProgress {
    fn on_import_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_complete(&self, page_num: usize, _total: usize, images: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("page {page_num} {images}"));
    }
    fn on_import_complete(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("done {total_pages}"));
    }
}

fn docx(body: &str) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    write!(
        zip,
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="{W_NS}"><w:body>{body}</w:body></w:document>"#
    )
    .unwrap();
    zip.finish().unwrap().into_inner()
}

fn document_xml(docx_bytes: &[u8]) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(docx_bytes)).unwrap();
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .unwrap()
        .read_to_string(&mut xml)
        .unwrap();
    xml
}

/// Route library logs to the test harness; `RUST_LOG=debug` shows them.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn empty_session() -> DocumentSession<MemorySurface> {
    init_logging();
    DocumentSession::new(MemorySurface::default(), SessionConfig::default()).unwrap()
}

// ── Placeholders ─────────────────────────────────────────────────────────────

#[test]
fn added_placeholder_is_listed_once_and_first() {
    let session = empty_session();
    session.add_placeholder("client").unwrap();
    let token = session.add_placeholder("  {{Invoice No}} ").unwrap();
    assert_eq!(token, "{{Invoice No}}");

    let tokens: Vec<String> = session.placeholders().into_iter().map(|p| p.token).collect();
    assert_eq!(tokens[0], token);
    assert_eq!(tokens.iter().filter(|t| **t == token).count(), 1);

    assert!(matches!(
        session.add_placeholder("Invoice No"),
        Err(PagesmithError::DuplicatePlaceholder { .. })
    ));
}

#[test]
fn removed_builtin_stays_hidden_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");

    let mut registry = PlaceholderRegistry::new(JsonFileStore::new(&path)).unwrap();
    assert!(registry.remove("{{date}}").unwrap());
    assert!(!registry.tokens().contains(&"{{date}}".to_string()));
    drop(registry);

    let reloaded = PlaceholderRegistry::new(JsonFileStore::new(&path)).unwrap();
    assert!(!reloaded.tokens().contains(&"{{date}}".to_string()));
    assert!(reloaded.tokens().contains(&"{{name}}".to_string()));

    let session = empty_session().with_store(JsonFileStore::new(&path)).unwrap();
    assert!(session.restore_placeholder("{{date}}").unwrap());
    let again = PlaceholderRegistry::new(JsonFileStore::new(&path)).unwrap();
    assert!(again.tokens().contains(&"{{date}}".to_string()));
}

// ── Blob cache ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn blob_resolves_are_idempotent_and_distinct() {
    let session = empty_session();
    let cache = session.blob_cache();
    let other = "data:text/plain;base64,aGVsbG8=";

    let a = cache.resolve(PIXEL).await.unwrap();
    let b = cache.resolve(PIXEL).await.unwrap();
    let c = cache.resolve(other).await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(cache.len(), 2);
    assert!(a.path().starts_with(cache.scratch_dir()));
}

// ── Pagination ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn n_markers_make_n_plus_one_pages() {
    init_logging();
    let markup = format!(
        "{PAGE_BREAK_HTML}<p>one</p>{PAGE_BREAK_HTML}{PAGE_BREAK_HTML}<p>two</p>"
    );
    let rasterizer = FakeRasterizer::new(None);
    let assembler = Arc::new(CountingAssembler::default());
    let session = DocumentSession::new(MemorySurface::new(markup), SessionConfig::default())
        .unwrap()
        .with_rasterizer(rasterizer.clone())
        .with_assembler(assembler.clone());

    assert_eq!(session.page_count(), 4);
    let file = session.export_pdf().await.unwrap();
    assert_eq!(file.units, 4);
    assert_eq!(assembler.pages.load(Ordering::SeqCst), 4);

    let seen = rasterizer.seen.lock().unwrap().clone();
    assert_eq!(seen, vec!["", "<p>one</p>", "", "<p>two</p>"]);
    // 190 mm content width, 40×60 px bitmap.
    for h in assembler.heights_mm.lock().unwrap().iter() {
        assert!((h - 285.0).abs() < 1e-3);
    }
}

#[tokio::test]
async fn failing_page_aborts_the_whole_export() {
    let markup = format!("<p>a</p>{PAGE_BREAK_HTML}<p>b</p>{PAGE_BREAK_HTML}<p>c</p>");
    let assembler = Arc::new(CountingAssembler::default());
    let session = DocumentSession::new(MemorySurface::new(markup), SessionConfig::default())
        .unwrap()
        .with_rasterizer(FakeRasterizer::new(Some(1)))
        .with_assembler(assembler.clone());

    let err = session.export_pdf().await.unwrap_err();
    assert!(matches!(
        err,
        PagesmithError::RasterisationFailed { page: 2, .. }
    ));
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 0);

    // The slot is free again.
    let session = session.with_rasterizer(FakeRasterizer::new(None));
    assert_eq!(session.export_pdf().await.unwrap().units, 3);
}

// ── Structured export ────────────────────────────────────────────────────────

#[tokio::test]
async fn textless_document_exports_placeholder_paragraph() {
    let session = DocumentSession::new(
        MemorySurface::new("<div>  </div><p></p>"),
        SessionConfig::default(),
    )
    .unwrap();
    let file = session.export_docx().await.unwrap();
    assert_eq!(file.units, 1);
    let xml = document_xml(&file.bytes);
    assert!(xml.contains(EMPTY_DOCUMENT_TEXT));
}

#[test]
fn one_marker_flags_one_paragraph() {
    let markup = format!("<p>before</p>{PAGE_BREAK_HTML}<p>after</p>");
    let paragraphs = collect_paragraphs(&markup);
    let flagged: Vec<usize> = paragraphs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.page_break_before)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![1]);
    assert_eq!(paragraphs[0].runs[0].text, "before");
    assert_eq!(paragraphs[2].runs[0].text, "after");
}

// ── End to end ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_pdf_round_trips_to_two_pages() {
    init_logging();
    let progress = Arc::new(RecordingProgress::default());
    let config = SessionConfig::builder()
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let assembler = Arc::new(CountingAssembler::default());
    let session = DocumentSession::new(MemorySurface::new("<p>old</p>"), config)
        .unwrap()
        .with_pdf_renderer(Arc::new(FakeRenderer {
            pages: 2,
            with_image: false,
        }))
        .with_rasterizer(FakeRasterizer::new(None))
        .with_assembler(assembler.clone());

    let input = ResolvedInput::from_bytes("two.pdf", b"%PDF-1.7 fake".to_vec()).unwrap();
    let report = session.import(input).await.unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.page_breaks, 1);

    let markup = session.markup();
    assert_eq!(markup.matches(PAGE_BREAK_HTML).count(), 1);
    assert_eq!(markup.matches(r#"class="pdf-page""#).count(), 2);
    assert!(!markup.contains("old"));

    let file = session.export_pdf().await.unwrap();
    assert_eq!(file.file_name, "document.pdf");
    assert_eq!(file.units, 2);
    assert_eq!(assembler.pages.load(Ordering::SeqCst), 2);

    assert_eq!(
        *progress.events.lock().unwrap(),
        vec!["start 2", "page 1 0", "page 2 0", "done 2"]
    );
}

#[tokio::test]
async fn repeated_page_images_share_one_blob() {
    let session = empty_session().with_pdf_renderer(Arc::new(FakeRenderer {
        pages: 3,
        with_image: true,
    }));
    let report = session.import_pdf(b"%PDF".to_vec()).await.unwrap();
    assert_eq!(report.images_rewritten, 3);
    assert_eq!(report.cached_blobs, 1);
    assert_eq!(report.cache_hits, 2);
    assert!(!session.markup().contains("data:image"));
}

#[tokio::test]
async fn page_selection_reaches_the_renderer() {
    let config = SessionConfig::builder()
        .pages(pagesmith::PageSelection::Set(vec![2, 4]))
        .build()
        .unwrap();
    let session = DocumentSession::new(MemorySurface::default(), config)
        .unwrap()
        .with_pdf_renderer(Arc::new(FakeRenderer {
            pages: 5,
            with_image: false,
        }));
    session.import_pdf(b"%PDF".to_vec()).await.unwrap();
    let markup = session.markup();
    assert!(markup.contains(r#"data-page-number="2""#));
    assert!(markup.contains(r#"data-page-number="4""#));
    assert!(!markup.contains(r#"data-page-number="1""#));
}

#[tokio::test]
async fn word_heading_and_nested_run_export_with_innermost_flags() {
    let body = concat!(
        r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Quarterly report</w:t></w:r></w:p>"#,
        r#"<w:p><w:r><w:rPr><w:b/><w:i/><w:u w:val="single"/></w:rPr><w:t>all three</w:t></w:r></w:p>"#,
    );
    let session = empty_session();
    let input = ResolvedInput::from_bytes("report.docx", docx(body)).unwrap();
    session.import(input).await.unwrap();

    let paragraphs = collect_paragraphs(&session.markup());
    assert_eq!(paragraphs.len(), 2);

    let heading = &paragraphs[0].runs[0];
    assert_eq!(heading.text, "Quarterly report");
    assert!(heading.bold);
    assert_eq!(heading.size_half_points, Some(32));

    let run = &paragraphs[1].runs[0];
    assert_eq!(run.text, "all three");
    assert!(run.underline);
    assert!(!run.bold);
    assert!(!run.italic);

    let file = session.export_docx().await.unwrap();
    let xml = document_xml(&file.bytes);
    assert!(xml.contains(r#"<w:sz w:val="32"/>"#));
    assert!(xml.contains(r#"<w:u w:val="single"/>"#));
}

#[tokio::test]
async fn word_page_break_survives_to_both_exports() {
    let body = concat!(
        r#"<w:p><w:r><w:t>first</w:t></w:r></w:p>"#,
        r#"<w:p><w:r><w:br w:type="page"/><w:t>second</w:t></w:r></w:p>"#,
    );
    let session = empty_session()
        .with_rasterizer(FakeRasterizer::new(None))
        .with_assembler(Arc::new(CountingAssembler::default()));
    let report = session.import_word(docx(body)).await.unwrap();
    assert_eq!(report.page_breaks, 1);

    assert_eq!(session.export_pdf().await.unwrap().units, 2);
    let flagged = collect_paragraphs(&session.markup())
        .iter()
        .filter(|p| p.page_break_before)
        .count();
    assert_eq!(flagged, 1);
}

#[tokio::test]
async fn kept_blob_dir_outlives_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let assets = dir.path().join("assets");
    let config = SessionConfig::builder().blob_dir(&assets).build().unwrap();
    let session = DocumentSession::new(MemorySurface::default(), config)
        .unwrap()
        .with_pdf_renderer(Arc::new(FakeRenderer {
            pages: 1,
            with_image: true,
        }));
    session.import_pdf(b"%PDF".to_vec()).await.unwrap();
    drop(session);

    let files: Vec<_> = std::fs::read_dir(&assets).unwrap().collect();
    assert_eq!(files.len(), 1);
}

#[tokio::test]
async fn saved_import_exports_after_reopening() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let saved = dir.path().join("report.html");
    let config = SessionConfig::builder()
        .blob_dir(saved.with_extension("assets"))
        .build()
        .unwrap();
    let importer = DocumentSession::new(MemorySurface::default(), config)
        .unwrap()
        .with_pdf_renderer(Arc::new(FakeRenderer {
            pages: 1,
            with_image: true,
        }));
    importer.import_pdf(b"%PDF".to_vec()).await.unwrap();
    std::fs::write(&saved, importer.markup()).unwrap();
    drop(importer);

    let markup = std::fs::read_to_string(&saved).unwrap();
    assert!(markup.contains("file://"));
    let assembler = Arc::new(CountingAssembler::default());
    let exporter = DocumentSession::new(MemorySurface::new(markup), SessionConfig::default())
        .unwrap()
        .with_rasterizer(Arc::new(ImageFragmentRasterizer))
        .with_assembler(assembler.clone());
    let pdf = exporter.export_pdf().await.unwrap();
    assert_eq!(pdf.units, 1);
    assert_eq!(assembler.calls.load(Ordering::SeqCst), 1);
}
