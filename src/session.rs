//! One open document and everything scoped to it.
//!
//! A [`DocumentSession`] owns the editing surface, the blob cache, the
//! placeholder registry, pending image descriptors and the pipeline
//! collaborators. Dropping the session releases all of them, including the
//! blob scratch directory unless [`SessionConfig::blob_dir`] is set.
//!
//! ## Concurrency
//!
//! At most one import and one export run at a time per session. A second
//! call of the same class while one is in flight fails immediately with
//! [`PagesmithError::OperationInProgress`]; it is never queued. An import and
//! an export may overlap: the export works on the snapshot it took when it
//! started.

use crate::blob_cache::BlobCache;
use crate::config::SessionConfig;
use crate::error::PagesmithError;
use crate::images::{ImageDescriptor, ImageSet};
use crate::markup::{inspect_pages, split_pages};
use crate::output::{ExportedFile, ImportReport};
use crate::pipeline::docx::export_structured;
use crate::pipeline::import::{self, ImportedDocument};
use crate::pipeline::input::{self, InputFormat, ResolvedInput};
use crate::pipeline::raster::{
    export_paged, FragmentRasterizer, ImageFragmentRasterizer, PdfAssembler, PdfiumAssembler,
};
use crate::pipeline::render::{PdfRenderer, PdfiumRenderer};
use crate::pipeline::word::{DocxConverter, WordConverter};
use crate::placeholders::{KeyValueStore, MemoryStore, Placeholder, PlaceholderRegistry};
use crate::surface::EditorSurface;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{error, info, warn};

/// Placeholder persistence as held by a session.
pub type DynStore = Box<dyn KeyValueStore + Send>;

/// An open document.
pub struct DocumentSession<S: EditorSurface> {
    config: SessionConfig,
    surface: Mutex<S>,
    placeholders: Mutex<PlaceholderRegistry<DynStore>>,
    images: Mutex<ImageSet>,
    blobs: BlobCache,
    pdf_renderer: Arc<dyn PdfRenderer>,
    word_converter: Arc<dyn WordConverter>,
    rasterizer: Arc<dyn FragmentRasterizer>,
    assembler: Arc<dyn PdfAssembler>,
    import_guard: AsyncMutex<()>,
    export_guard: AsyncMutex<()>,
}

impl<S: EditorSurface> std::fmt::Debug for DocumentSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("config", &self.config)
            .field("blobs", &self.blobs)
            .finish_non_exhaustive()
    }
}

/// A poisoned lock only means a panic happened elsewhere; the data is intact.
fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Claim the single slot of an operation class without waiting.
fn begin<'a>(
    slot: &'a AsyncMutex<()>,
    kind: &'static str,
) -> Result<AsyncMutexGuard<'a, ()>, PagesmithError> {
    slot.try_lock().map_err(|_| {
        warn!("Rejected {}: another one is in progress", kind);
        PagesmithError::OperationInProgress { kind }
    })
}

impl<S: EditorSurface> DocumentSession<S> {
    /// Open a session over `surface` with the built-in collaborators and a
    /// volatile placeholder store.
    pub fn new(surface: S, config: SessionConfig) -> Result<Self, PagesmithError> {
        let store: DynStore = Box::new(MemoryStore::new());
        let blobs = match config.blob_dir {
            Some(ref dir) => BlobCache::in_dir(dir)?,
            None => BlobCache::new()?,
        };
        Ok(Self {
            config,
            surface: Mutex::new(surface),
            placeholders: Mutex::new(PlaceholderRegistry::new(store)?),
            images: Mutex::new(ImageSet::default()),
            blobs,
            pdf_renderer: Arc::new(PdfiumRenderer),
            word_converter: Arc::new(DocxConverter),
            rasterizer: Arc::new(ImageFragmentRasterizer),
            assembler: Arc::new(PdfiumAssembler),
            import_guard: AsyncMutex::new(()),
            export_guard: AsyncMutex::new(()),
        })
    }

    /// Persist placeholders in `store`, loading whatever it already holds.
    pub fn with_store(
        mut self,
        store: impl KeyValueStore + Send + 'static,
    ) -> Result<Self, PagesmithError> {
        let store: DynStore = Box::new(store);
        self.placeholders = Mutex::new(PlaceholderRegistry::new(store)?);
        Ok(self)
    }

    pub fn with_pdf_renderer(mut self, renderer: Arc<dyn PdfRenderer>) -> Self {
        self.pdf_renderer = renderer;
        self
    }

    pub fn with_word_converter(mut self, converter: Arc<dyn WordConverter>) -> Self {
        self.word_converter = converter;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn FragmentRasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn PdfAssembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn blob_cache(&self) -> &BlobCache {
        &self.blobs
    }

    /// Serialized snapshot of the document.
    pub fn markup(&self) -> String {
        lock(&self.surface).markup()
    }

    /// Non-blank pages keyed by their position; see [`inspect_pages`].
    pub fn pages(&self) -> BTreeMap<usize, String> {
        inspect_pages(&self.markup())
    }

    /// Pages a paged export would produce.
    pub fn page_count(&self) -> usize {
        split_pages(&self.markup()).len()
    }

    /// Give back the surface, dropping everything else.
    pub fn into_surface(self) -> S {
        self.surface.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    // ── Import ───────────────────────────────────────────────────────────

    /// Import a local path or HTTP(S) URL, replacing the document.
    pub async fn import_from(&self, input: &str) -> Result<ImportReport, PagesmithError> {
        let resolved = input::resolve_input(input, self.config.download_timeout_secs)
            .await
            .inspect_err(|e| error!("Import of '{}' failed: {}", input, e))?;
        self.import(resolved).await
    }

    /// Import an already loaded document, replacing the current content.
    pub async fn import(&self, input: ResolvedInput) -> Result<ImportReport, PagesmithError> {
        info!("Importing '{}' as {}", input.name, input.format);
        match input.format {
            InputFormat::Pdf => self.import_pdf(input.bytes).await,
            InputFormat::Word => self.import_word(input.bytes).await,
        }
    }

    /// Import a PDF. Either every selected page is committed or nothing is.
    pub async fn import_pdf(&self, bytes: Vec<u8>) -> Result<ImportReport, PagesmithError> {
        let _guard = begin(&self.import_guard, "import")?;
        let result = import::import_pdf(
            bytes,
            Arc::clone(&self.pdf_renderer),
            &self.blobs,
            &self.config,
        )
        .await;
        self.commit(InputFormat::Pdf, result)
    }

    /// Import a Word document. On failure the document is left as it was.
    pub async fn import_word(&self, bytes: Vec<u8>) -> Result<ImportReport, PagesmithError> {
        let _guard = begin(&self.import_guard, "import")?;
        let result = import::import_word(bytes, Arc::clone(&self.word_converter)).await;
        self.commit(InputFormat::Word, result)
    }

    fn commit(
        &self,
        format: InputFormat,
        result: Result<ImportedDocument, PagesmithError>,
    ) -> Result<ImportReport, PagesmithError> {
        let doc = result.inspect_err(|e| error!("{} import failed: {}", format, e))?;
        lock(&self.surface)
            .set_markup(doc.markup)
            .inspect_err(|e| error!("{} import could not be committed: {}", format, e))?;

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_import_complete(doc.report.pages);
        }
        info!(
            "{} import committed: {} pages, {} images, {}ms",
            format, doc.report.pages, doc.report.images_rewritten, doc.report.duration_ms
        );
        Ok(doc.report)
    }

    // ── Export ───────────────────────────────────────────────────────────

    /// Paged raster export of the current document.
    pub async fn export_pdf(&self) -> Result<ExportedFile, PagesmithError> {
        let _guard = begin(&self.export_guard, "export")?;
        export_paged(
            self.markup(),
            Arc::clone(&self.rasterizer),
            Arc::clone(&self.assembler),
            self.config.clone(),
        )
        .await
        .inspect_err(|e| error!("PDF export failed: {}", e))
    }

    /// Structured export of the current document.
    pub async fn export_docx(&self) -> Result<ExportedFile, PagesmithError> {
        let _guard = begin(&self.export_guard, "export")?;
        let markup = self.markup();
        tokio::task::spawn_blocking(move || export_structured(&markup))
            .await
            .map_err(|e| PagesmithError::Internal(format!("Export task panicked: {e}")))?
            .inspect_err(|e| error!("DOCX export failed: {}", e))
    }

    // ── Placeholders ─────────────────────────────────────────────────────

    pub fn placeholders(&self) -> Vec<Placeholder> {
        lock(&self.placeholders).list()
    }

    pub fn add_placeholder(&self, label: &str) -> Result<String, PagesmithError> {
        lock(&self.placeholders).add(label)
    }

    pub fn remove_placeholder(&self, token: &str) -> Result<bool, PagesmithError> {
        lock(&self.placeholders).remove(token)
    }

    pub fn restore_placeholder(&self, token: &str) -> Result<bool, PagesmithError> {
        lock(&self.placeholders).restore(token)
    }

    pub fn restore_all_placeholders(&self) -> Result<(), PagesmithError> {
        lock(&self.placeholders).restore_all()
    }

    /// Insert `token` at the cursor. Tokens outside the registry are allowed.
    pub fn insert_placeholder(&self, token: &str) -> Result<(), PagesmithError> {
        let registry = lock(&self.placeholders);
        let mut surface = lock(&self.surface);
        registry.insert(token, &mut *surface)
    }

    // ── Images ───────────────────────────────────────────────────────────

    pub fn add_image(
        &self,
        source: impl Into<String>,
        width: u32,
        height: u32,
    ) -> Result<ImageDescriptor, PagesmithError> {
        lock(&self.images).add(source, width, height)
    }

    pub fn resize_image(
        &self,
        id: &str,
        width: u32,
        height: u32,
    ) -> Result<ImageDescriptor, PagesmithError> {
        lock(&self.images).resize(id, width, height)
    }

    pub fn remove_image(&self, id: &str) -> Result<ImageDescriptor, PagesmithError> {
        lock(&self.images).remove(id)
    }

    pub fn images(&self) -> Vec<ImageDescriptor> {
        lock(&self.images).list()
    }

    /// Insert the image at the cursor and stop tracking it.
    pub fn commit_image(&self, id: &str) -> Result<ImageDescriptor, PagesmithError> {
        let mut images = lock(&self.images);
        let markup = images
            .get(id)
            .map(ImageDescriptor::to_markup)
            .ok_or_else(|| PagesmithError::ImageNotFound { id: id.to_string() })?;
        lock(&self.surface).insert_at_cursor(&markup)?;
        images.remove(id)
    }
}
