//! CLI binary for edgequake-form2sheet.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints or writes the result table.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_form2sheet::{
    extract, extract_to_file, CancellationFlag, ExtractionConfig, ExtractionProgressCallback,
    Form2SheetError, ProgressCallback, ResultTable, ServiceCredentials,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress callback: a live bar plus one log line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the image in flight; images run one at a time.
    started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_batch_start` tells us the image count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading images…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_images: usize) {
        self.activate_bar(total_images);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_images} forms…"))
        ));
    }

    fn on_image_start(&self, _index: usize, _total: usize, file_name: &str) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(file_name.to_string());
    }

    fn on_image_complete(&self, index: usize, total: usize, file_name: &str) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            green("✓"),
            index + 1,
            total,
            file_name,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, _file_name: &str, error: &str) {
        let secs = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_images: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();

        if failed == 0 && success_count == total_images {
            eprintln!(
                "{} {} forms extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} forms extracted  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract a folder of scans to stdout (CSV)
  form2sheet extract scans/ --model-id fichas-v1

  # Write the table to a file
  form2sheet extract scans/ img_001.jpg --model-id fichas-v1 -o fichas.csv

  # Skip binarization (already clean scans)
  form2sheet extract scans/ --model-id fichas-v1 --no-preprocess

  # JSON rows instead of CSV
  form2sheet extract https://example.com/ficha.jpg --model-id fichas-v1 --json

  # Merge tables from previous runs, dropping duplicate rows
  form2sheet merge monday.csv tuesday.csv -o week.csv

OUTPUT COLUMNS:
  Arquivo  Nome  Data  Fone  Cel  Address  [Status]
  Missing values are written as N/A. Status appears only when an image failed.

ENVIRONMENT VARIABLES:
  AZURE_FORM_RECOGNIZER_ENDPOINT  Document Intelligence endpoint URL
  AZURE_FORM_RECOGNIZER_KEY       Subscription key for the endpoint
  FORM2SHEET_MODEL_ID             Default custom model id
  RUST_LOG                        Override log filter (e.g. edgequake_form2sheet=debug)
"#;

/// Extract contact fields from scanned forms into a table.
#[derive(Parser, Debug)]
#[command(
    name = "form2sheet",
    version,
    about = "Extract contact fields from scanned paper forms into a table",
    long_about = "Send scanned form images to a custom Azure Document Intelligence model and \
collect the fields Nome, Data, Fone, Cel and Address into one CSV row per image.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "FORM2SHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "FORM2SHEET_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract fields from images, directories or URLs.
    Extract(ExtractArgs),
    /// Concatenate previously exported CSV tables, dropping duplicate rows.
    Merge(MergeArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Image files (.png/.jpg/.jpeg), directories of images, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Custom model id trained on the form layout.
    #[arg(long, env = "FORM2SHEET_MODEL_ID")]
    model_id: String,

    /// Write the CSV table to this file instead of stdout.
    #[arg(short, long, env = "FORM2SHEET_OUTPUT")]
    output: Option<PathBuf>,

    /// Print JSON rows to stdout instead of CSV.
    #[arg(long, conflicts_with = "output")]
    json: bool,

    /// Service endpoint (overrides AZURE_FORM_RECOGNIZER_ENDPOINT).
    #[arg(long)]
    endpoint: Option<String>,

    /// Subscription key (overrides AZURE_FORM_RECOGNIZER_KEY).
    #[arg(long)]
    key: Option<String>,

    /// Send images as-is, without adaptive-threshold binarization.
    #[arg(long, env = "FORM2SHEET_NO_PREPROCESS")]
    no_preprocess: bool,

    /// Delay between status polls, in milliseconds.
    #[arg(long, env = "FORM2SHEET_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Give up on an image after this many polls.
    #[arg(long, env = "FORM2SHEET_MAX_POLL_ATTEMPTS", default_value_t = 120)]
    max_poll_attempts: u32,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "FORM2SHEET_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Retries per request on throttling (429), timeouts or 5xx.
    #[arg(long, env = "FORM2SHEET_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each retry.
    #[arg(long, env = "FORM2SHEET_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Disable progress bar.
    #[arg(long, env = "FORM2SHEET_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// CSV tables written by `form2sheet extract`.
    #[arg(required = true)]
    tables: Vec<PathBuf>,

    /// Destination of the merged table.
    #[arg(short, long)]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs are hidden while the progress bar is active.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress,
        Command::Merge(_) => false,
    };
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
        Command::Extract(ref args) => run_extract(args, cli.quiet, show_progress).await,
        Command::Merge(ref args) => run_merge(args, cli.quiet),
    }
}

async fn run_extract(args: &ExtractArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let cli_cb = show_progress.then(CliProgressCallback::new_dynamic);
    let bar = cli_cb.as_ref().map(|cb| cb.bar.clone());
    let progress_cb: Option<ProgressCallback> =
        cli_cb.map(|cb| cb as Arc<dyn ExtractionProgressCallback>);

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted; finishing the current image");
                cancel.cancel();
            }
        });
    }

    let config = build_config(args, progress_cb, cancel)?;
    let credentials =
        ServiceCredentials::from_env().with_overrides(args.endpoint.clone(), args.key.clone());

    if let Some(ref output_path) = args.output {
        let stats = settle(
            extract_to_file(&args.inputs, output_path, &credentials, &config).await,
            bar.as_ref(),
        )?;

        if !quiet {
            eprintln!(
                "{}  {}/{} images  {}ms  →  {}",
                if stats.failed_images == 0 && stats.skipped_images == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.processed_images,
                stats.total_images,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
            if stats.skipped_images > 0 {
                eprintln!("   {} images skipped (cancelled)", stats.skipped_images);
            }
        }
    } else {
        let output = settle(extract(&args.inputs, &credentials, &config).await, bar.as_ref())?;
        let table = ResultTable::from_results(&output.results);

        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if args.json {
            let json = serde_json::to_string_pretty(&table.to_json())
                .context("Failed to serialise output")?;
            writeln!(handle, "{json}").context("Failed to write to stdout")?;
        } else {
            table
                .write_csv(&mut handle)
                .context("Failed to write to stdout")?;
        }

        if !quiet && !show_progress {
            eprintln!(
                "Extracted {}/{} images in {}ms",
                output.stats.processed_images,
                output.stats.total_images,
                output.stats.total_duration_ms
            );
            if output.stats.failed_images > 0 {
                eprintln!("  {} images failed", output.stats.failed_images);
            }
        }
        if !quiet && output.was_cancelled() {
            eprintln!("  {} images skipped (cancelled)", output.stats.skipped_images);
        }
    }

    Ok(())
}

fn run_merge(args: &MergeArgs, quiet: bool) -> Result<()> {
    let tables = args
        .tables
        .iter()
        .map(|p| ResultTable::read_csv_file(p).with_context(|| format!("Failed to read {:?}", p)))
        .collect::<Result<Vec<_>>>()?;

    let merged = ResultTable::merge(tables);
    merged
        .write_csv_file(&args.output)
        .context("Failed to write merged table")?;

    if !quiet {
        eprintln!(
            "{}  {} files  {} unique rows  →  {}",
            green("✔"),
            args.tables.len(),
            merged.len(),
            bold(&args.output.display().to_string()),
        );
    }
    Ok(())
}

/// Clear the live bar on a fatal error, then report it.
fn settle<T>(result: Result<T, Form2SheetError>, bar: Option<&ProgressBar>) -> Result<T> {
    match result {
        Ok(v) => Ok(v),
        Err(e) => {
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            match e {
                Form2SheetError::ClientUnavailable { .. } => client_unavailable(e),
                other => Err(other).context("Extraction failed"),
            }
        }
    }
}

/// Report an unconfigured service client and exit without a stack of contexts.
fn client_unavailable(e: Form2SheetError) -> ! {
    eprintln!("{} {}", red("✘"), bold("Document analysis service unavailable"));
    eprintln!("  {e}");
    std::process::exit(2);
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(
    args: &ExtractArgs,
    progress: Option<ProgressCallback>,
    cancel: CancellationFlag,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .model_id(args.model_id.trim())
        .preprocess(!args.no_preprocess)
        .poll_interval_ms(args.poll_interval_ms)
        .max_poll_attempts(args.max_poll_attempts)
        .request_timeout_secs(args.request_timeout)
        .max_retries(args.max_retries)
        .retry_backoff_ms(args.retry_backoff_ms)
        .cancel(cancel);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_args(argv: &[&str]) -> ExtractArgs {
        let cli = Cli::parse_from(argv);
        match cli.command {
            Command::Extract(args) => args,
            Command::Merge(_) => panic!("expected extract"),
        }
    }

    #[test]
    fn fatal_error_clears_the_bar() {
        let bar = ProgressBar::hidden();
        bar.enable_steady_tick(Duration::from_millis(80));
        let err = settle::<()>(Err(Form2SheetError::NoImages), Some(&bar)).unwrap_err();
        assert!(bar.is_finished());
        assert!(format!("{err:#}").starts_with("Extraction failed"));
    }

    #[test]
    fn success_leaves_the_bar_running() {
        let bar = ProgressBar::hidden();
        assert_eq!(settle(Ok(7), Some(&bar)).unwrap(), 7);
        assert!(!bar.is_finished());
    }

    #[test]
    fn elapsed_is_taken_once_per_image() {
        let cb = CliProgressCallback::new_dynamic();
        cb.bar.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        cb.on_image_start(0, 1, "a.png");
        std::thread::sleep(Duration::from_millis(5));
        assert!(cb.elapsed_secs() > 0.0);
        assert_eq!(cb.elapsed_secs(), 0.0);
        cb.bar.finish_and_clear();
    }

    #[test]
    fn retry_flags_reach_the_config() {
        let args = extract_args(&[
            "form2sheet",
            "extract",
            "a.png",
            "--model-id",
            "fichas-v1",
            "--max-retries",
            "5",
            "--retry-backoff-ms",
            "250",
        ]);
        let config = build_config(&args, None, CancellationFlag::new()).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_backoff_ms, 250);
    }
}
