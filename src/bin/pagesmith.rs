//! CLI binary for pagesmith.
//!
//! A thin shim over the library crate. The editable document lives in an
//! HTML file between invocations: `import` writes it, the export and edit
//! subcommands read it back into a [`MemorySurface`].

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagesmith::{
    DocumentSession, ExportedFile, ImportProgressCallback, JsonFileStore, MemorySurface,
    PageSelection, ProgressCallback, SessionConfig,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per imported page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    images: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_import_start` tells us how many pages there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            images: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Importing");
        self.bar.reset_eta();
    }

    fn start_times(&self) -> MutexGuard<'_, HashMap<usize, Instant>> {
        self.start_times.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times()
            .remove(&page_num)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0) as f64
            / 1000.0
    }
}

impl ImportProgressCallback for CliProgressCallback {
    fn on_import_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Importing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        self.start_times().insert(page_num, Instant::now());
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, images: usize) {
        let elapsed = self.elapsed_secs(page_num);
        self.images.fetch_add(images, Ordering::Relaxed);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{images:>3} images")),
            dim(&format!("{elapsed:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let elapsed = self.elapsed_secs(page_num);

        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
        // The import is abandoned after the first failing page.
        self.bar.abandon();
    }

    fn on_import_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages imported, {} images",
            green("✔"),
            bold(&total_pages.to_string()),
            self.images.load(Ordering::Relaxed)
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Import a PDF into an editable document
  pagesmith import report.pdf -o report.html

  # Import selected pages only, keep extracted images next to the document
  pagesmith import --pages 1-5 --assets report_assets scan.pdf -o scan.html

  # Import a Word document from a URL
  pagesmith import https://example.com/letter.docx -o letter.html

  # Show the pages of a document
  pagesmith pages report.html

  # Export as a paged PDF or a structured Word document
  pagesmith export-pdf report.html -o out/
  pagesmith export-docx report.html -o out/

  # Placeholders
  pagesmith placeholders list
  pagesmith placeholders add "Invoice Number"
  pagesmith placeholders insert letter.html "{{invoice_number}}" --at 120
  pagesmith placeholders restore --all

  # Insert an image at the end of the document
  pagesmith image letter.html logo.png --width 120 --height 40

ENVIRONMENT VARIABLES:
  PDFIUM_LIB_PATH         Directory holding libpdfium
  PAGESMITH_STORE         Placeholder store file
  RUST_LOG                Overrides the log filter chosen by -v / -q

NOTES:
  PDF pages are imported as one vector image per page; their text is not
  editable. Extracted images are written next to the output file, in
  <output>.assets/ unless --assets names another directory.
"#;

/// Import, paginate and export documents.
#[derive(Parser, Debug)]
#[command(
    name = "pagesmith",
    version,
    about = "Import PDF and Word files into paginated markup and export them back",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAGESMITH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAGESMITH_QUIET")]
    quiet: bool,

    /// Print results as JSON.
    #[arg(long, global = true, env = "PAGESMITH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "PAGESMITH_NO_PROGRESS")]
    no_progress: bool,

    /// File persisting the placeholder registry.
    #[arg(
        long,
        global = true,
        env = "PAGESMITH_STORE",
        default_value = ".pagesmith/placeholders.json"
    )]
    store: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a PDF or DOCX file (or URL) into an HTML document.
    Import(ImportArgs),
    /// Export a document as a paged PDF (document.pdf).
    ExportPdf(ExportPdfArgs),
    /// Export a document as a structured Word file (document.docx).
    ExportDocx(ExportArgs),
    /// List the pages of a document.
    Pages {
        /// HTML document written by `import`.
        document: PathBuf,
    },
    /// Manage and insert placeholders.
    #[command(subcommand)]
    Placeholders(PlaceholderCommand),
    /// Insert an image into a document.
    Image(ImageArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Local PDF/DOCX path or HTTP/HTTPS URL.
    input: String,

    /// HTML file receiving the imported document.
    #[arg(short, long)]
    output: PathBuf,

    /// Directory for extracted images [default: <output>.assets].
    #[arg(long, env = "PAGESMITH_ASSETS")]
    assets: Option<PathBuf>,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PAGESMITH_PAGES", default_value = "all")]
    pages: String,

    /// PDF viewport scale (0.25–4.0).
    #[arg(long, env = "PAGESMITH_SCALE", default_value_t = 1.5)]
    scale: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGESMITH_PASSWORD")]
    password: Option<String>,

    /// Concurrent image resolves per page.
    #[arg(long, env = "PAGESMITH_IMAGE_CONCURRENCY", default_value_t = 8)]
    image_concurrency: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGESMITH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// HTML document written by `import`.
    document: PathBuf,

    /// Directory receiving the exported file.
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ExportPdfArgs {
    #[command(flatten)]
    export: ExportArgs,

    /// Device pixel ratio used when rasterising pages (1.0–4.0).
    #[arg(long, env = "PAGESMITH_PIXEL_RATIO", default_value_t = 2.0)]
    pixel_ratio: f32,

    /// Page margin in millimetres.
    #[arg(long, env = "PAGESMITH_MARGIN_MM", default_value_t = 10.0)]
    margin: f32,
}

#[derive(Subcommand, Debug)]
enum PlaceholderCommand {
    /// List active placeholders.
    List,
    /// Add a custom placeholder from a label.
    Add { label: String },
    /// Remove a placeholder (built-ins are suppressed, not deleted).
    Remove { token: String },
    /// Bring back a suppressed built-in, or all of them with --all.
    Restore {
        token: Option<String>,
        #[arg(long, conflicts_with = "token")]
        all: bool,
    },
    /// Insert a placeholder token into a document.
    Insert {
        document: PathBuf,
        token: String,
        /// Byte offset of the cursor. Default: end of document.
        #[arg(long)]
        at: Option<usize>,
    },
}

#[derive(Args, Debug)]
struct ImageArgs {
    document: PathBuf,

    /// Image path, URL or data: URI.
    source: String,

    #[arg(long)]
    width: u32,

    #[arg(long)]
    height: u32,

    /// Byte offset of the cursor. Default: end of document.
    #[arg(long)]
    at: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO logs would interleave with the progress bar, which already says
    // everything that matters.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && matches!(cli.command, Command::Import(_));
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Import(ref args) => run_import(&cli, args, show_progress).await,
        Command::ExportPdf(ref args) => run_export_pdf(&cli, args).await,
        Command::ExportDocx(ref args) => run_export_docx(&cli, args).await,
        Command::Pages { ref document } => run_pages(&cli, document).await,
        Command::Placeholders(PlaceholderCommand::Insert {
            ref document,
            ref token,
            at,
        }) => run_insert_placeholder(&cli, document, token, at).await,
        Command::Placeholders(ref cmd) => run_placeholders(&cli, cmd).await,
        Command::Image(ref args) => run_image(&cli, args).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────────

async fn run_import(cli: &Cli, args: &ImportArgs, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ImportProgressCallback>)
    } else {
        None
    };

    let mut builder = SessionConfig::builder()
        .pdf_scale(args.scale)
        .image_concurrency(args.image_concurrency)
        .pages(parse_pages(&args.pages)?)
        .download_timeout_secs(args.download_timeout);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    builder = builder.blob_dir(assets_dir(args));
    if let Some(cb) = progress_cb {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let session = DocumentSession::new(MemorySurface::default(), config)
        .context("Failed to open session")?;
    let report = session
        .import_from(&args.input)
        .await
        .context("Import failed")?;
    write_document(&args.output, &session.markup()).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} pages  {} breaks  {} images ({} cached)  {}ms  →  {}",
            green("✔"),
            report.pages,
            report.page_breaks,
            report.images_rewritten,
            report.cache_hits,
            report.duration_ms,
            bold(&args.output.display().to_string()),
        );
        if report.images_rewritten > 0 {
            eprintln!(
                "   {}",
                dim(&format!("images  →  {}", assets_dir(args).display()))
            );
        }
    }
    Ok(())
}

/// Where imported images live: `--assets`, or `<output>.assets` beside the output.
fn assets_dir(args: &ImportArgs) -> PathBuf {
    args.assets
        .clone()
        .unwrap_or_else(|| args.output.with_extension("assets"))
}

async fn run_export_pdf(cli: &Cli, args: &ExportPdfArgs) -> Result<()> {
    let config = SessionConfig::builder()
        .pixel_ratio(args.pixel_ratio)
        .page_margin_mm(args.margin)
        .build()
        .context("Invalid configuration")?;
    let session = open_document(&args.export.document, None, config).await?;
    let file = session.export_pdf().await.context("PDF export failed")?;
    report_export(cli, &file, &args.export.out_dir, "pages").await
}

async fn run_export_docx(cli: &Cli, args: &ExportArgs) -> Result<()> {
    let session = open_document(&args.document, None, SessionConfig::default()).await?;
    let file = session.export_docx().await.context("DOCX export failed")?;
    report_export(cli, &file, &args.out_dir, "paragraphs").await
}

async fn run_pages(cli: &Cli, document: &Path) -> Result<()> {
    let session = open_document(document, None, SessionConfig::default()).await?;
    let pages = session.pages();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&pages).context("Failed to serialise pages")?
        );
        return Ok(());
    }

    println!("Document:     {}", document.display());
    println!("Pages:        {}", session.page_count());
    for (index, content) in &pages {
        println!("  {:>3}  {}", index + 1, dim(&format!("{} bytes", content.len())));
    }
    Ok(())
}

async fn run_insert_placeholder(
    cli: &Cli,
    document: &Path,
    token: &str,
    at: Option<usize>,
) -> Result<()> {
    let session = open_document(document, at, SessionConfig::default()).await?;
    let session = with_store(session, &cli.store)?;
    session
        .insert_placeholder(token)
        .context("Failed to insert placeholder")?;
    write_document(document, &session.markup()).await?;
    if !cli.quiet {
        eprintln!("{} inserted {}", green("✔"), bold(token));
    }
    Ok(())
}

async fn run_placeholders(cli: &Cli, cmd: &PlaceholderCommand) -> Result<()> {
    let session = DocumentSession::new(MemorySurface::default(), SessionConfig::default())
        .context("Failed to open session")?;
    let session = with_store(session, &cli.store)?;

    match cmd {
        PlaceholderCommand::List | PlaceholderCommand::Insert { .. } => {}
        PlaceholderCommand::Add { label } => {
            let token = session
                .add_placeholder(label)
                .context("Failed to add placeholder")?;
            if !cli.quiet && !cli.json {
                eprintln!("{} added {}", green("✔"), bold(&token));
            }
        }
        PlaceholderCommand::Remove { token } => {
            let removed = session
                .remove_placeholder(token)
                .context("Failed to remove placeholder")?;
            if !removed {
                anyhow::bail!("No placeholder '{}'", token);
            }
        }
        PlaceholderCommand::Restore { token, all } => match token {
            Some(token) => {
                let restored = session
                    .restore_placeholder(token)
                    .context("Failed to restore placeholder")?;
                if !restored {
                    anyhow::bail!("'{}' is not a suppressed built-in placeholder", token);
                }
            }
            None if *all => session
                .restore_all_placeholders()
                .context("Failed to restore placeholders")?,
            None => anyhow::bail!("Give a token to restore, or --all"),
        },
    }

    let list = session.placeholders();
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&list).context("Failed to serialise placeholders")?
        );
    } else if !cli.quiet {
        for p in &list {
            println!("{:<28} {}", p.token, dim(&format!("{:?}", p.origin)));
        }
    }
    Ok(())
}

async fn run_image(cli: &Cli, args: &ImageArgs) -> Result<()> {
    let session = open_document(&args.document, args.at, SessionConfig::default()).await?;
    let pending = session
        .add_image(args.source.clone(), args.width, args.height)
        .context("Invalid image")?;
    let committed = session
        .commit_image(&pending.id)
        .context("Failed to insert image")?;
    write_document(&args.document, &session.markup()).await?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&committed).context("Failed to serialise image")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{} inserted {} ({}×{})",
            green("✔"),
            bold(&committed.source),
            committed.width,
            committed.height
        );
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Load an HTML document into a fresh session, cursor at `at` or the end.
async fn open_document(
    path: &Path,
    at: Option<usize>,
    config: SessionConfig,
) -> Result<DocumentSession<MemorySurface>> {
    let markup = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read document {:?}", path))?;
    let mut surface = MemorySurface::new(markup);
    if let Some(offset) = at {
        surface.set_cursor(offset);
    }
    DocumentSession::new(surface, config).context("Failed to open session")
}

fn with_store(
    session: DocumentSession<MemorySurface>,
    path: &Path,
) -> Result<DocumentSession<MemorySurface>> {
    session
        .with_store(JsonFileStore::new(path))
        .with_context(|| format!("Failed to load placeholder store {:?}", path))
}

async fn write_document(path: &Path, markup: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    tokio::fs::write(path, markup)
        .await
        .with_context(|| format!("Failed to write document {:?}", path))
}

async fn report_export(cli: &Cli, file: &ExportedFile, out_dir: &Path, unit: &str) -> Result<()> {
    let path = file
        .write_to_dir(out_dir)
        .await
        .context("Failed to write export")?;

    if cli.json {
        let summary = serde_json::json!({
            "path": path,
            "mime_type": file.mime_type,
            "unit": unit,
            "units": file.units,
            "bytes": file.bytes.len(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  {} {}  {}  →  {}",
            green("✔"),
            file.units,
            unit,
            dim(&format!("{} bytes", file.bytes.len())),
            bold(&path.display().to_string()),
        );
    }
    Ok(())
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!(
                "Invalid page range '{}-{}': start must be <= end",
                start,
                end
            );
        }

        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .context(format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(&p) = pages.iter().find(|&&p| p < 1) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", p);
        }

        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }

    Ok(PageSelection::Single(page))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pages_forms() {
        assert_eq!(parse_pages("all").unwrap(), PageSelection::All);
        assert_eq!(parse_pages(" ALL ").unwrap(), PageSelection::All);
        assert_eq!(parse_pages("5").unwrap(), PageSelection::Single(5));
        assert_eq!(parse_pages("3-15").unwrap(), PageSelection::Range(3, 15));
        assert_eq!(
            parse_pages("1, 3,5").unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
    }

    #[test]
    fn parse_pages_rejects_bad_input() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("9-3").is_err());
        assert!(parse_pages("1,x").is_err());
        assert!(parse_pages("0,2").is_err());
        assert!(parse_pages("many").is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "pagesmith",
            "import",
            "doc.pdf",
            "-o",
            "doc.html",
            "--pages",
            "1-2",
        ])
        .unwrap();
        match cli.command {
            Command::Import(args) => {
                assert_eq!(args.input, "doc.pdf");
                assert_eq!(args.pages, "1-2");
                assert_eq!(args.scale, 1.5);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["pagesmith", "placeholders", "restore", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Placeholders(PlaceholderCommand::Restore { token: None, all: true })
        ));
    }

    #[test]
    fn import_assets_default_beside_the_output() {
        let import = |argv: &[&str]| match Cli::try_parse_from(argv).unwrap().command {
            Command::Import(args) => assets_dir(&args),
            other => panic!("unexpected command {other:?}"),
        };
        assert_eq!(
            import(&["pagesmith", "import", "a.pdf", "-o", "out/report.html"]),
            PathBuf::from("out/report.assets")
        );
        assert_eq!(
            import(&["pagesmith", "import", "a.pdf", "-o", "r.html", "--assets", "imgs"]),
            PathBuf::from("imgs")
        );
    }

    #[test]
    fn restore_token_conflicts_with_all() {
        assert!(
            Cli::try_parse_from(["pagesmith", "placeholders", "restore", "{{x}}", "--all"])
                .is_err()
        );
    }
}
