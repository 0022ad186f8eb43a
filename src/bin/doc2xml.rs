//! CLI binary for doc2xml.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `BatchConfig`, runs one batch and prints the summary.

use anyhow::{Context, Result};
use clap::Parser;
use doc2xml::{
    BatchConfig, BatchProgressCallback, BatchRunner, BatchSummary, ConversionOutcome,
    DocBookOptions, OutcomeStatus, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a progress bar plus one log line per finished file. Files finish
/// out of order, so lines are printed as outcomes arrive.
struct CliProgressCallback {
    bar: ProgressBar,
    in_flight: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            in_flight: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        self.bar.set_length(total_files as u64);
        self.bar.reset_eta();
    }

    fn on_file_start(&self, _index: usize, path: &Path) {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.bar.set_message(format!("{name} ({n} active)"));
    }

    fn on_file_complete(&self, outcome: &ConversionOutcome) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let (mark, detail) = match outcome.status {
            OutcomeStatus::Success => (green("✓"), dim(&outcome.report_detail())),
            OutcomeStatus::NeedsOcr => (
                yellow("◌"),
                yellow(&format!(
                    "needs OCR ({})",
                    outcome.detail.as_deref().unwrap_or_default()
                )),
            ),
            OutcomeStatus::Error => {
                let msg = outcome.report_detail();
                // Keep one line per file.
                let msg = match msg.char_indices().nth(100) {
                    Some((i, _)) => format!("{}\u{2026}", &msg[..i]),
                    None => msg,
                };
                (red("✗"), red(&msg.replace('\n', " ")))
            }
        };
        self.bar
            .println(format!("  {mark} {}  {detail}", outcome.file_name()));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _summary: &BatchSummary) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF and EPUB in ./input into ./output
  doc2xml input

  # Custom output directory, 8 files at a time
  doc2xml input -o converted -c 8

  # Reproducible output (fixed generated= timestamp)
  doc2xml input --generated-at 2025-01-01T00:00:00Z

  # Also write a DocBook book per file
  doc2xml input --docbook --docbook-publisher "Example Press"

  # Machine-readable report on stdout
  doc2xml input --json > report.json

OUTPUT:
  <output>/<stem>.xml        one canonical XML file per converted input
  <output>/batch_report.csv  file,status,detail  (SUCCESS | NEEDS_OCR | ERROR)
  <output>/<stem>/book.xml   DocBook master + chNNNN.xml chapters (--docbook)

EXIT STATUS:
  0    batch completed (individual files may still be ERROR / NEEDS_OCR)
  1    fatal error (input or output directory unusable, report not written)
  2    --strict and at least one file is not SUCCESS
  130  interrupted (Ctrl-C); the report covers every file

ENVIRONMENT VARIABLES:
  POPPLER_EXE   Path to the pdftohtml executable (default: pdftohtml on PATH)
  RUST_LOG      Override the log filter (e.g. doc2xml=debug)
"#;

/// Normalize a directory of PDF and EPUB files into canonical XML.
#[derive(Parser, Debug)]
#[command(
    name = "doc2xml",
    version,
    about = "Normalize a directory of PDF and EPUB files into canonical XML",
    long_about = "Convert every PDF and EPUB in a directory into one canonical XML schema \
(document / section / heading, paragraph, image). PDFs are read through Poppler's pdftohtml \
text layer; scanned PDFs without a usable text layer are reported as NEEDS_OCR. A CSV report \
with one row per input is written next to the output.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the input files.
    input: PathBuf,

    /// Output directory (created if missing).
    #[arg(short, long, env = "DOC2XML_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// File name of the CSV report inside the output directory.
    #[arg(long, env = "DOC2XML_REPORT", default_value = "batch_report.csv")]
    report: String,

    /// Number of files converted concurrently.
    #[arg(short, long, env = "DOC2XML_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// pdftohtml executable.
    #[arg(long, env = "POPPLER_EXE", default_value = "pdftohtml")]
    pdftohtml: String,

    /// Timeout for one pdftohtml run, in seconds.
    #[arg(long, env = "DOC2XML_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// Pages with fewer visible characters than this are near-empty.
    #[arg(long, env = "DOC2XML_NEAR_EMPTY_CHARS", default_value_t = 10)]
    near_empty_chars: usize,

    /// NEEDS_OCR when more than this share of pages is near-empty (0.0–<1.0).
    #[arg(long, env = "DOC2XML_EMPTY_PAGE_RATIO", default_value_t = 0.5)]
    empty_page_ratio: f64,

    /// PDF font size (points) from which a line counts as a heading.
    #[arg(long, env = "DOC2XML_HEADING_SIZE", default_value_t = 14.0)]
    heading_size: f32,

    /// Max vertical gap, in line heights, between lines of one paragraph.
    #[arg(long, env = "DOC2XML_PARAGRAPH_GAP", default_value_t = 0.75)]
    paragraph_gap: f32,

    /// Skip parsing each XML file back before writing it.
    #[arg(long, env = "DOC2XML_NO_VERIFY")]
    no_verify: bool,

    /// Fixed RFC 3339 timestamp for the generated= attribute.
    #[arg(long, env = "DOC2XML_GENERATED_AT")]
    generated_at: Option<String>,

    /// Also write a DocBook book (<stem>/book.xml + chapters) per file.
    #[arg(long, env = "DOC2XML_DOCBOOK")]
    docbook: bool,

    /// DocBook DOCTYPE public identifier.
    #[arg(long, env = "DOC2XML_DOCBOOK_PUBLIC_ID", requires = "docbook")]
    docbook_public_id: Option<String>,

    /// DocBook DOCTYPE system identifier.
    #[arg(long, env = "DOC2XML_DOCBOOK_SYSTEM_ID", requires = "docbook")]
    docbook_system_id: Option<String>,

    /// Publisher for <bookinfo> (default: from the EPUB metadata).
    #[arg(long, env = "DOC2XML_DOCBOOK_PUBLISHER", requires = "docbook")]
    docbook_publisher: Option<String>,

    /// Author for <bookinfo> (default: from the EPUB metadata).
    #[arg(long, env = "DOC2XML_DOCBOOK_AUTHOR", requires = "docbook")]
    docbook_author: Option<String>,

    /// ISBN for <bookinfo>.
    #[arg(long, env = "DOC2XML_DOCBOOK_ISBN", requires = "docbook")]
    docbook_isbn: Option<String>,

    /// Print the full report as JSON on stdout.
    #[arg(long, env = "DOC2XML_JSON")]
    json: bool,

    /// Exit with status 2 unless every file is SUCCESS.
    #[arg(long, env = "DOC2XML_STRICT")]
    strict: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOC2XML_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOC2XML_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOC2XML_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports every file; keep the library quiet
    // underneath it unless debug output was asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as ProgressCallback)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;
    let report_path = config.report_path();

    // ── Run batch ────────────────────────────────────────────────────────
    let runner = BatchRunner::new(config);
    let inputs = doc2xml::pipeline::input::discover_inputs(&cli.input)
        .await
        .context("Failed to list input directory")?;
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available: never cancel.
            std::future::pending::<()>().await;
        }
    };
    let report = runner
        .run_until(inputs, shutdown)
        .await
        .context("Batch failed")?;

    if cli.json {
        println!("{}", report.to_json().context("Failed to serialise report")?);
    }

    let s = report.summary();
    if !cli.quiet {
        let mark = if s.cancelled {
            red("✘")
        } else if s.failed == 0 && s.needs_ocr == 0 {
            green("✔")
        } else {
            yellow("⚠")
        };
        eprintln!(
            "{mark} {} files  {} ok  {} needs OCR  {} failed  {}ms  →  {}",
            bold(&s.total.to_string()),
            green(&s.succeeded.to_string()),
            yellow(&s.needs_ocr.to_string()),
            red(&s.failed.to_string()),
            s.duration_ms,
            bold(&report_path.display().to_string()),
        );
        if s.cancelled {
            eprintln!("   {}", dim("interrupted: remaining files are marked ERROR"));
        }
    }

    if s.cancelled {
        std::process::exit(130);
    }
    if cli.strict && s.succeeded != s.total {
        std::process::exit(2);
    }
    Ok(())
}

/// Map CLI args to `BatchConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
) -> Result<BatchConfig> {
    let mut builder = BatchConfig::builder()
        .output_dir(&cli.output)
        .report_name(&cli.report)
        .concurrency(cli.concurrency)
        .pdftohtml_program(&cli.pdftohtml)
        .tool_timeout_secs(cli.tool_timeout)
        .near_empty_page_chars(cli.near_empty_chars)
        .empty_page_ratio(cli.empty_page_ratio)
        .heading_font_size(cli.heading_size)
        .paragraph_gap_ratio(cli.paragraph_gap)
        .verify_output(!cli.no_verify);

    if let Some(ref ts) = cli.generated_at {
        let at = chrono::DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("Invalid --generated-at timestamp '{ts}'"))?
            .with_timezone(&chrono::Utc);
        builder = builder.generated_at(at);
    }

    if cli.docbook {
        let defaults = DocBookOptions::default();
        builder = builder.docbook(DocBookOptions {
            public_id: cli.docbook_public_id.clone().unwrap_or(defaults.public_id),
            system_id: cli.docbook_system_id.clone().unwrap_or(defaults.system_id),
            publisher: cli.docbook_publisher.clone(),
            author: cli.docbook_author.clone(),
            isbn: cli.docbook_isbn.clone(),
        });
    }

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
