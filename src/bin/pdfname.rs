//! CLI binary for pdf-autoname.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `RenameConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_autoname::backend::provider::ProviderBackend;
use pdf_autoname::{
    load_documents, rename_batch_with_cancel, save_renamed_copies, AssetState, Backoff,
    BatchProgressCallback, BatchReport, CancellationToken, Credential, InferenceBackend,
    IngestStrategy, ModelPolicy, ProgressCallback, RenameConfig,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
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

/// Terminal progress callback: one bar for the batch plus a log line per
/// finished document. Documents may finish out of order when
/// `--concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Display name and start time per in-flight document.
    started: Mutex<HashMap<usize, (String, Instant)>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving model…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(HashMap::new()),
        })
    }

    fn finish_line(&self, index: usize) -> (String, f64) {
        self.started
            .lock()
            .unwrap()
            .remove(&index)
            .map(|(name, t)| (name, t.elapsed().as_secs_f64()))
            .unwrap_or_else(|| (format!("#{}", index + 1), 0.0))
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize, model: &str) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Renaming");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Renaming {total} documents with {model}…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        self.started
            .lock()
            .unwrap()
            .insert(index, (name.to_string(), Instant::now()));
        self.bar.set_message(name.to_string());
    }

    fn on_asset_state(&self, index: usize, state: AssetState) {
        if state == AssetState::Processing {
            self.bar.set_message(format!("#{} processing on server…", index + 1));
        }
    }

    fn on_retry_wait(&self, index: usize, attempt: u32, remaining: Duration) {
        self.bar.set_message(format!(
            "#{} backend busy (attempt {attempt}), retrying in {}s",
            index + 1,
            remaining.as_secs()
        ));
    }

    fn on_document_renamed(&self, index: usize, _total: usize, new_name: &str) {
        let (name, secs) = self.finish_line(index);
        self.bar.println(format!(
            "  {} {}  →  {}  {}",
            green("✓"),
            name,
            bold(new_name),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_failed(&self, index: usize, _total: usize, error: &str) {
        let (name, secs) = self.finish_line(index);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            name,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, renamed: usize) {
        let failed = total.saturating_sub(renamed);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!("{} {} documents renamed", green("✔"), bold(&renamed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} documents renamed  ({} not renamed)",
                if renamed == 0 { red("✘") } else { cyan("⚠") },
                bold(&renamed.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rename every PDF in a folder, copies go to ./renamed
  pdfname inbox/ -o renamed/

  # Also produce a zip of the renamed originals
  pdfname inbox/*.pdf --archive renamed.zip

  # Large scans: upload only the first 3 pages
  pdfname --strategy sample --sample-pages 3 inbox/

  # Problematic PDFs (encryption quirks, signature wrappers): send page one as an image
  pdfname --strategy snapshot inbox/

  # Any edgequake-llm provider instead of the Gemini file API
  pdfname --backend provider --provider openai --model gpt-4.1-mini --strategy snapshot inbox/

  # Machine-readable report
  pdfname --json inbox/ > report.json

NAMING GRAMMAR:
  <DATE8>_<DOCTYPE>_<DOCNUMBER>_<SUMMARY>_<STATUS>.pdf
  e.g. 20250101_QD_125-UBND_Ke_hoach_phong_chong_thien_tai_Signed.pdf

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Gemini API key (gemini backend)
  OPENAI_API_KEY, …       Provider keys (provider backend)
  EDGEQUAKE_LLM_PROVIDER  Provider name when --provider is not given
  EDGEQUAKE_MODEL         Provider model when --model is not given
  PDFIUM_LIB_PATH         Path to libpdfium (sample / snapshot / excerpt strategies)
  RUST_LOG                Override log filter (e.g. pdf_autoname=debug)
"#;

/// Rename PDF documents from their content using a generative model.
#[derive(Parser, Debug)]
#[command(
    name = "pdfname",
    version,
    about = "Rename PDF documents from their content using a generative model",
    long_about = "Send each PDF to a multimodal model, ask for a structured file name \
(date, document type, number, summary, status), and save renamed copies or a zip archive. \
A failing document never stops the batch.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files or directories containing PDFs.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Copy renamed documents into this directory.
    #[arg(short, long, env = "PDFNAME_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Write a zip of the renamed originals to this path.
    #[arg(long, env = "PDFNAME_ARCHIVE")]
    archive: Option<PathBuf>,

    /// Include failed documents in the archive as ERROR_<original name>.
    #[arg(long)]
    keep_failed: bool,

    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Inference backend.
    #[arg(long, env = "PDFNAME_BACKEND", value_enum, default_value = "gemini")]
    backend: BackendArg,

    /// edgequake-llm provider for `--backend provider` (openai, anthropic, gemini, ollama, …).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Model to use; skips model discovery.
    #[arg(short, long, env = "PDFNAME_MODEL")]
    model: Option<String>,

    /// Fail instead of using the built-in fallback model when discovery finds nothing.
    #[arg(long, conflicts_with = "fallback_on_listing_error")]
    no_fallback: bool,

    /// Also use the fallback model when model discovery itself fails.
    #[arg(long)]
    fallback_on_listing_error: bool,

    /// How each document is sent to the backend.
    #[arg(long, env = "PDFNAME_STRATEGY", value_enum, default_value = "direct")]
    strategy: StrategyArg,

    /// Pages kept by `--strategy sample` (1–10).
    #[arg(long, default_value_t = IngestStrategy::DEFAULT_SAMPLE_PAGES,
          value_parser = clap::value_parser!(u16).range(1..=10))]
    sample_pages: u16,

    /// Characters of page-one text sent by `--strategy excerpt`.
    #[arg(long, default_value_t = IngestStrategy::DEFAULT_EXCERPT_CHARS)]
    excerpt_chars: usize,

    /// Documents processed at once.
    #[arg(short, long, env = "PDFNAME_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Generation attempts per document when the backend is busy.
    #[arg(long, env = "PDFNAME_MAX_ATTEMPTS", default_value_t = 4)]
    max_attempts: u32,

    /// Fixed wait between attempts in seconds (default: 30 s doubling to 65 s).
    #[arg(long, env = "PDFNAME_RETRY_WAIT")]
    retry_wait: Option<u64>,

    /// Seconds between upload readiness checks.
    #[arg(long, default_value_t = 3)]
    poll_interval: u64,

    /// Give up on an upload that is not ready after this many seconds.
    #[arg(long, default_value_t = 300)]
    max_wait: u64,

    /// Path to a text file with a custom extraction instruction.
    #[arg(long, env = "PDFNAME_INSTRUCTION")]
    instruction: Option<PathBuf>,

    /// Keep uploaded files on the server instead of deleting them afterwards.
    #[arg(long)]
    keep_remote: bool,

    /// HTTP timeout per API call in seconds.
    #[arg(long, env = "PDFNAME_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Output the full report as JSON.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFNAME_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFNAME_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFNAME_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Gemini,
    Provider,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    Direct,
    Sample,
    Snapshot,
    Excerpt,
}

impl StrategyArg {
    fn into_strategy(self, cli: &Cli) -> IngestStrategy {
        match self {
            StrategyArg::Direct => IngestStrategy::DirectUpload,
            StrategyArg::Sample => IngestStrategy::TruncatedSample {
                pages: cli.sample_pages,
            },
            StrategyArg::Snapshot => IngestStrategy::Snapshot,
            StrategyArg::Excerpt => IngestStrategy::TextExcerpt {
                max_chars: cli.excerpt_chars,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    // ── Load inputs ──────────────────────────────────────────────────────
    let documents = load_documents(&cli.inputs).context("Failed to read input files")?;
    if documents.is_empty() {
        bail!("No PDF files found in the given inputs");
    }

    // ── PDF engine ───────────────────────────────────────────────────────
    // Only the sample, snapshot and excerpt strategies touch pdfium. Fetch it
    // here, once, instead of inside the first document's ingestion.
    let strategy = cli.strategy.into_strategy(&cli);
    if strategy.needs_pdfium() && !pdfium_auto::is_pdfium_cached() {
        ensure_pdfium(cli.quiet || cli.json)?;
    }

    // ── Backend and credential ───────────────────────────────────────────
    let (backend, credential, model): (
        Option<Arc<dyn InferenceBackend>>,
        Credential,
        Option<String>,
    ) = match cli.backend {
        BackendArg::Gemini => {
            let key = cli
                .api_key
                .clone()
                .context("No API key: pass --api-key or set GEMINI_API_KEY")?;
            (None, Credential::new(key), cli.model.clone())
        }
        BackendArg::Provider => {
            let provider =
                ProviderBackend::detect(cli.provider.as_deref(), cli.model.as_deref())
                    .context("Failed to configure provider")?;
            let model = provider.model().to_string();
            let backend: Arc<dyn InferenceBackend> = Arc::new(provider);
            (Some(backend), ProviderBackend::ambient_credential(), Some(model))
        }
    };

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, backend, model, progress_cb).await?;

    // ── Ctrl-C cancels the run but still reports finished documents ─────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work…");
            on_signal.cancel();
        }
    });

    // ── Run ──────────────────────────────────────────────────────────────
    let report = rename_batch_with_cancel(&documents, &credential, &config, cancel)
        .await
        .context("Renaming failed")?;

    if let Some(ref dir) = cli.output_dir {
        let written = save_renamed_copies(&report, &documents, dir)
            .context("Failed to save renamed copies")?;
        if !cli.quiet {
            let dir = bold(&dir.display().to_string());
            eprintln!("   {} files written to {}", written.len(), dir);
        }
    }

    if let (Some(path), Some(bytes)) = (&cli.archive, &report.archive) {
        write_atomic(path, bytes)
            .with_context(|| format!("Failed to write archive {}", path.display()))?;
        if !cli.quiet {
            eprintln!("   archive written to {}", bold(&path.display().to_string()));
        }
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_table(&report).context("Failed to write to stdout")?;
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Renamed {}/{} documents in {}ms ({} attempts)",
            report.stats.renamed,
            report.stats.total,
            report.stats.duration_ms,
            report.stats.total_attempts
        );
    }

    if report.was_cancelled() {
        std::process::exit(130);
    }
    Ok(())
}

/// Download pdfium into its cache, with a byte progress bar unless `silent`.
fn ensure_pdfium(silent: bool) -> Result<()> {
    if silent {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length() != Some(t) {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;

    dl_bar.finish_with_message("ready ✓");
    Ok(())
}

/// Map CLI args to `RenameConfig`.
async fn build_config(
    cli: &Cli,
    backend: Option<Arc<dyn InferenceBackend>>,
    model: Option<String>,
    progress: Option<ProgressCallback>,
) -> Result<RenameConfig> {
    let instruction = if let Some(ref path) = cli.instruction {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read instruction from {:?}", path))?,
        )
    } else {
        None
    };

    let policy = if cli.no_fallback {
        ModelPolicy::default().without_fallback()
    } else if cli.fallback_on_listing_error {
        ModelPolicy::default().with_fallback_on_error()
    } else {
        ModelPolicy::default()
    };

    let mut builder = RenameConfig::builder()
        .strategy(cli.strategy.into_strategy(cli))
        .concurrency(cli.concurrency)
        .max_attempts(cli.max_attempts)
        .poll_interval(Duration::from_secs(cli.poll_interval))
        .max_ingest_wait(Duration::from_secs(cli.max_wait))
        .model_policy(policy)
        .api_timeout_secs(cli.api_timeout)
        .release_assets(!cli.keep_remote)
        .build_archive(cli.archive.is_some())
        .keep_failed_in_archive(cli.keep_failed);

    if let Some(secs) = cli.retry_wait {
        builder = builder.backoff(Backoff::Fixed(Duration::from_secs(secs)));
    }
    if let Some(model) = model {
        builder = builder.model(model);
    }
    if let Some(instruction) = instruction {
        builder = builder.instruction(instruction);
    }
    if let Some(backend) = backend {
        builder = builder.backend(backend);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_table(report: &BatchReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for r in &report.results {
        match (&r.new_name, &r.error) {
            (Some(new_name), _) => writeln!(out, "{}\t{}", r.original_name, new_name)?,
            (None, Some(e)) => writeln!(out, "{}\tERROR: {}", r.original_name, e)?,
            (None, None) => writeln!(out, "{}\t-", r.original_name)?,
        }
    }
    Ok(())
}

/// Atomic write: temp file in the target directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
