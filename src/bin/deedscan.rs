//! CLI binary for deedscan.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig`, wires Ctrl-C to the cancel token, and prints or
//! writes the run report.

use anyhow::{Context, Result};
use clap::Parser;
use deedscan::{
    load_ordered, run_pipeline_http, CancelToken, ExtractionConfig, PipelineProgressCallback,
    PipelineRun, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the batch plan plus a log line
/// per resolved batch. The pipeline is sequential, so no out-of-order
/// handling is needed.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(spinner_style);
        bar.set_prefix("Planning");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_batches: usize, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>2}/{len} batches  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        self.bar.set_length(total_batches as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Submitting {total_pages} pages in {total_batches} batches…"
            ))
        ));
    }

    fn on_batch_start(&self, batch_index: usize, _total: usize, pages: usize) {
        self.bar
            .set_message(format!("batch {batch_index} ({pages} pages)"));
    }

    fn on_batch_complete(
        &self,
        batch_index: usize,
        total: usize,
        contacts: usize,
        degraded: bool,
    ) {
        let marker = if degraded {
            yellow("◐ degraded")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Batch {:>2}/{:<2}  {}",
            marker,
            batch_index + 1,
            total,
            dim(&format!("{contacts} contacts")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_error(&self, batch_index: usize, total: usize, error: &str) {
        let msg = clip_message(error, 80);
        self.bar.println(format!(
            "  {} Batch {:>2}/{:<2}  {}",
            red("✗"),
            batch_index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_batches: usize, succeeded: usize, degraded: usize) {
        self.bar.finish_and_clear();
        let resolved = succeeded + degraded;
        if resolved == total_batches {
            eprintln!(
                "{} {} batches resolved ({} degraded)",
                green("✔"),
                bold(&resolved.to_string()),
                degraded
            );
        } else {
            eprintln!(
                "{} {}/{} batches resolved  ({} failed)",
                if resolved == 0 { red("✘") } else { cyan("⚠") },
                bold(&resolved.to_string()),
                total_batches,
                red(&(total_batches - resolved).to_string()),
            );
        }
    }
}

/// Clip a message to roughly `max` bytes for one-line display. Error text
/// can carry arbitrary UTF-8 from API bodies, so the cut must land on a
/// char boundary.
fn clip_message(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max.saturating_sub('…'.len_utf8());
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract from pre-rasterised pages, report to stdout
  deedscan pages/page_*.png --source-file deed_0142.pdf

  # Write the JSON report to a file
  deedscan pages/*.png --source-file deed_0142.pdf -o report.json

  # Lower the batch ceiling for a provider with a small request limit
  deedscan pages/*.png --max-batch-bytes 4194304

  # Slow down for a heavily rate-limited account
  deedscan pages/*.png --inter-batch-delay-ms 5000 --backoff-base-ms 3000

PAGE ORDER:
  Images are processed in the order given on the command line. Shell globs
  sort lexicographically, so zero-padded names (page_000.png, page_001.png)
  preserve page order.

ENVIRONMENT VARIABLES:
  DEEDSCAN_API_KEY     Extraction API key (checked first)
  ANTHROPIC_API_KEY    Fallback API key

EXIT STATUS:
  0  every batch resolved
  1  fatal error before submission (bad input, no API key)
  2  partial success — some batches failed; report still written
  3  total failure — no batch resolved
"#;

/// Extract contact/ownership records from scanned page images.
#[derive(Parser, Debug)]
#[command(
    name = "deedscan",
    version,
    about = "Extract contact/ownership records from scanned page images using vision LLMs",
    long_about = "Submit pre-rasterised page images of a scanned document to a vision LLM in \
size-capped, order-preserving batches, with exponential backoff and per-image degradation, \
and assemble one deduplicated contact list.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page image files (PNG/JPEG), in page order.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Write the JSON run report to this file instead of stdout.
    #[arg(short, long, env = "DEEDSCAN_OUTPUT")]
    output: Option<PathBuf>,

    /// Source document name stamped into each record's provenance.
    #[arg(long, env = "DEEDSCAN_SOURCE_FILE")]
    source_file: Option<String>,

    /// Extraction API endpoint.
    #[arg(long, env = "DEEDSCAN_API_URL")]
    api_url: Option<String>,

    /// Vision model identifier.
    #[arg(long, env = "DEEDSCAN_MODEL")]
    model: Option<String>,

    /// Maximum cumulative bytes per batch.
    #[arg(long, env = "DEEDSCAN_MAX_BATCH_BYTES", default_value_t = 8 * 1024 * 1024)]
    max_batch_bytes: usize,

    /// Delay between batch submissions in milliseconds.
    #[arg(long, env = "DEEDSCAN_INTER_BATCH_DELAY_MS", default_value_t = 2000)]
    inter_batch_delay_ms: u64,

    /// Initial backoff delay in milliseconds (doubles per retry).
    #[arg(long, env = "DEEDSCAN_BACKOFF_BASE_MS", default_value_t = 1500)]
    backoff_base_ms: u64,

    /// Maximum submission attempts per batch.
    #[arg(long, env = "DEEDSCAN_BACKOFF_MAX_ATTEMPTS", default_value_t = 5)]
    backoff_max_attempts: u32,

    /// Per-request timeout in seconds.
    #[arg(long, env = "DEEDSCAN_REQUEST_TIMEOUT", default_value_t = 90)]
    request_timeout: u64,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "DEEDSCAN_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Print only the merged contacts array, not the full run report.
    #[arg(long)]
    contacts_only: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DEEDSCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DEEDSCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the report.
    #[arg(short, long, env = "DEEDSCAN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the progress bar is active;
    // the bar provides the per-batch feedback that matters interactively.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli, show_progress).await?;

    // ── Load pages ───────────────────────────────────────────────────────
    let pages = load_ordered(&cli.images)
        .await
        .context("Failed to load page images")?;

    // ── Wire Ctrl-C to the cancel token ──────────────────────────────────
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} cancelling after the current batch…", cyan("◆"));
                cancel.cancel();
            }
        });
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let run = run_pipeline_http(&pages, &config, &cancel)
        .await
        .context("Extraction failed to start")?;

    // ── Emit report ──────────────────────────────────────────────────────
    let payload = if cli.contacts_only {
        serde_json::to_string_pretty(&run.contacts)
    } else {
        serde_json::to_string_pretty(&run)
    }
    .context("Failed to serialise run report")?;

    if let Some(ref path) = cli.output {
        write_atomic(path, &payload).await?;
        if !cli.quiet {
            print_summary(&run, Some(path));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(payload.as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
        if !cli.quiet {
            print_summary(&run, None);
        }
    }

    // Exit status distinguishes complete / partial / total failure so shell
    // pipelines can branch without parsing the report.
    if run.is_total_failure() {
        std::process::exit(3);
    }
    if !run.errors.is_empty() || run.cancelled {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, show_progress: bool) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .max_batch_bytes(cli.max_batch_bytes)
        .inter_batch_delay_ms(cli.inter_batch_delay_ms)
        .backoff_base_ms(cli.backoff_base_ms)
        .backoff_max_attempts(cli.backoff_max_attempts)
        .request_timeout_secs(cli.request_timeout);

    if let Some(ref url) = cli.api_url {
        builder = builder.api_url(url.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref name) = cli.source_file {
        builder = builder.source_file(name.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {path:?}"))?;
        builder = builder.extraction_prompt(prompt);
    }
    if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Atomic write: temp file in the target directory, then rename.
async fn write_atomic(path: &PathBuf, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {parent:?}"))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, payload)
        .await
        .with_context(|| format!("Failed to write {tmp:?}"))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move report into place at {path:?}"))?;
    Ok(())
}

fn print_summary(run: &PipelineRun, out: Option<&PathBuf>) {
    let status = if run.cancelled {
        yellow("cancelled")
    } else if run.is_complete_success() {
        green("complete")
    } else if run.is_total_failure() {
        red("failed")
    } else {
        yellow("partial")
    };

    eprintln!(
        "{}  {} contacts  {}/{} batches ({} degraded)  {}ms{}",
        status,
        bold(&run.total_contacts.to_string()),
        run.batches_succeeded + run.batches_degraded,
        run.batches_planned,
        run.batches_degraded,
        run.duration_ms,
        out.map(|p| format!("  →  {}", bold(&p.display().to_string())))
            .unwrap_or_default(),
    );
    for err in &run.errors {
        eprintln!("   {} {}", red("✗"), err);
    }
}
