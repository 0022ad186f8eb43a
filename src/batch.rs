//! Batch driver: one outcome per input file, a report per run.
//!
//! ## Per-file lifecycle
//!
//! ```text
//! Discovered ──▶ Sniffed ──▶ Extracted ──▶ Normalized ──▶ Written
//!                   │            │
//!                   │            └──▶ NeedsOcr
//!                   └──▶ Failed  (from any state)
//! ```
//!
//! Every blocking step (sniffing, extraction, normalization, writing) runs on
//! `tokio::task::spawn_blocking`; at most `concurrency` files are in flight at
//! once. Outcomes flow back to the single driver loop, which is the only place
//! that touches the report, so no lock is needed and none is ever held across
//! a blocking call.
//!
//! ## Cancellation
//!
//! When the shutdown future passed to [`BatchRunner::run_until`] resolves, a
//! shared flag is raised. Files that have not started extraction, and files
//! that have not reached the write step, end as `ERROR` rows; writes already
//! in progress complete. XML and report files are written to a temporary file
//! in the output directory and renamed into place, so a cancelled run never
//! leaves a truncated file behind.

use crate::config::BatchConfig;
use crate::document::NormalizedDocument;
use crate::error::{BatchError, Component, ConversionError, ExtractionError, NormalizeError};
use crate::export::docbook;
use crate::output::{BatchReport, ConversionOutcome};
use crate::pipeline::epub::EpubExtractor;
use crate::pipeline::input::discover_inputs;
use crate::pipeline::normalize::normalize_with_metadata;
use crate::pipeline::pdf::PdfExtractor;
use crate::pipeline::sniff::{sniff, SourceDocument, SourceFormat};
use crate::pipeline::{DocumentExtractor, Extraction};
use crate::report::ReportWriter;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Extra time granted on top of `tool_timeout_secs` before the runner stops
/// waiting on an extraction. `pdftohtml` kills itself at the exact limit;
/// this only catches text layers that do not.
const TOOL_GRACE: Duration = Duration::from_secs(1);

/// Where a file is in its conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Discovered,
    Sniffed,
    Extracted,
    Normalized,
    Written,
    NeedsOcr,
    Failed,
}

impl FileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileState::Written | FileState::NeedsOcr | FileState::Failed)
    }
}

fn enter(file: &str, state: FileState) {
    if state.is_terminal() {
        debug!(file, ?state, "final state");
    } else {
        debug!(file, ?state, "state transition");
    }
}

/// Runs the conversion pipeline over a set of input files.
///
/// # Example
/// ```rust,no_run
/// use doc2xml::{BatchConfig, BatchRunner};
///
/// # async fn run() -> Result<(), doc2xml::BatchError> {
/// let config = BatchConfig::builder().output_dir("converted").build()?;
/// let report = BatchRunner::new(config).run_dir("input".as_ref()).await?;
/// println!("{} files, {} failed", report.len(), report.summary().failed);
/// # Ok(())
/// # }
/// ```
pub struct BatchRunner {
    config: BatchConfig,
    pdf: Arc<dyn DocumentExtractor>,
    epub: Arc<dyn DocumentExtractor>,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        let pdf: Arc<dyn DocumentExtractor> = Arc::new(PdfExtractor::from_config(&config));
        Self {
            config,
            pdf,
            epub: Arc::new(EpubExtractor),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Discover the files in `dir`, then [`run`](Self::run) them.
    pub async fn run_dir(&self, dir: &Path) -> Result<BatchReport, BatchError> {
        let inputs = discover_inputs(dir).await?;
        self.run(inputs).await
    }

    /// Convert `inputs` in the given order, which becomes the report order.
    pub async fn run(&self, inputs: Vec<PathBuf>) -> Result<BatchReport, BatchError> {
        self.run_until(inputs, std::future::pending::<()>()).await
    }

    /// Like [`run`](Self::run), but stops taking on new work once `shutdown`
    /// resolves. The report is still written, with one row per input.
    pub async fn run_until<F>(
        &self,
        inputs: Vec<PathBuf>,
        shutdown: F,
    ) -> Result<BatchReport, BatchError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let output_dir = self.config.output_dir.clone();
        prepare_output_dir(&output_dir).await?;

        let total = inputs.len();
        info!(
            files = total,
            concurrency = self.config.concurrency,
            output = %output_dir.display(),
            "starting batch"
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_start(total);
        }

        let outputs = output_names(&inputs);
        let worker = Arc::new(Worker {
            pdf: Arc::clone(&self.pdf),
            epub: Arc::clone(&self.epub),
            config: self.config.clone(),
            generated: self.config.generated_at.unwrap_or_else(Utc::now),
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        let results = stream::iter(inputs.into_iter().zip(outputs).enumerate().map(
            |(index, (path, name))| {
                let worker = Arc::clone(&worker);
                let output = output_dir.join(name);
                async move { worker.convert(index, path, output).await }
            },
        ))
        .buffer_unordered(self.config.concurrency);
        tokio::pin!(results);
        tokio::pin!(shutdown);

        let mut report = BatchReport::new();
        let mut shutdown_seen = false;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown, if !shutdown_seen => {
                    shutdown_seen = true;
                    worker.cancelled.store(true, Ordering::SeqCst);
                    warn!(done = report.len(), total, "shutdown requested, cancelling remaining files");
                }
                next = results.next() => match next {
                    Some(outcome) => {
                        if let Some(ref cb) = self.config.progress_callback {
                            cb.on_file_complete(&outcome);
                        }
                        report.push(outcome);
                    }
                    None => break,
                }
            }
        }

        report.cancelled = shutdown_seen;
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.finalize();

        let report_path = self.config.report_path();
        let snapshot = report.clone();
        let path = report_path.clone();
        tokio::task::spawn_blocking(move || ReportWriter::write_to_path(&snapshot, &path))
            .await
            .map_err(|e| BatchError::Internal(format!("report task failed: {e}")))?
            .map_err(|source| BatchError::ReportWriteFailed {
                path: report_path.clone(),
                source,
            })?;

        let summary = report.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            needs_ocr = summary.needs_ocr,
            failed = summary.failed,
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            report = %report_path.display(),
            "batch complete"
        );
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_batch_complete(&summary);
        }
        Ok(report)
    }
}

/// Output file names for `inputs`, in the same order.
///
/// The first file with a given stem gets `<stem>.xml`; later ones get
/// `<stem>.<ext>.xml`, then a numeric suffix if even that is taken. Names are
/// compared case-insensitively so they stay distinct on any filesystem.
pub fn output_names(inputs: &[PathBuf]) -> Vec<String> {
    let mut used = HashSet::new();
    inputs
        .iter()
        .map(|path| {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.clone());

            let mut candidates = vec![format!("{stem}.xml")];
            if file_name != stem {
                candidates.push(format!("{file_name}.xml"));
            }
            let name = candidates
                .into_iter()
                .chain((2..).map(|n| format!("{file_name}.{n}.xml")))
                .find(|c| !used.contains(&c.to_lowercase()))
                .unwrap_or_else(|| format!("{file_name}.xml"));
            used.insert(name.to_lowercase());
            name
        })
        .collect()
}

// ── Per-file pipeline ────────────────────────────────────────────────────────

/// Everything a file's conversion needs, shared across in-flight files.
struct Worker {
    pdf: Arc<dyn DocumentExtractor>,
    epub: Arc<dyn DocumentExtractor>,
    config: BatchConfig,
    generated: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
}

enum Converted {
    Written(PathBuf),
    NeedsOcr {
        empty_pages: usize,
        total_pages: usize,
    },
}

impl Worker {
    async fn convert(&self, index: usize, path: PathBuf, output: PathBuf) -> ConversionOutcome {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_file_start(index, &path);
        }
        enter(&file, FileState::Discovered);

        let started = Instant::now();
        match self.run_stages(&file, &path, &output).await {
            Ok(Converted::Written(out)) => {
                enter(&file, FileState::Written);
                info!(
                    file = %file,
                    output = %out.display(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "converted"
                );
                ConversionOutcome::success(index, path, out)
            }
            Ok(Converted::NeedsOcr {
                empty_pages,
                total_pages,
            }) => {
                enter(&file, FileState::NeedsOcr);
                info!(file = %file, empty_pages, total_pages, "needs OCR");
                ConversionOutcome::needs_ocr(index, path, empty_pages, total_pages)
            }
            Err(e) => {
                enter(&file, FileState::Failed);
                warn!(file = %file, component = %e.component(), "conversion failed: {}", e);
                ConversionOutcome::failed(index, path, &e)
            }
        }
    }

    async fn run_stages(
        &self,
        file: &str,
        path: &Path,
        output: &Path,
    ) -> Result<Converted, ConversionError> {
        self.check_cancelled("extraction")?;

        // ── Sniff ──────────────────────────────────────────────────────────
        let p = path.to_path_buf();
        let source = tokio::task::spawn_blocking(move || sniff(&p))
            .await
            .map_err(task_failed)?;
        if source.format == SourceFormat::Unsupported {
            return Err(ConversionError::Unsupported {
                reason: source
                    .reason
                    .clone()
                    .unwrap_or_else(|| "unrecognised format".to_string()),
            });
        }
        enter(file, FileState::Sniffed);

        // ── Extract ────────────────────────────────────────────────────────
        let (tree, metadata) = match self.extract(&source).await? {
            Extraction::Document { tree, metadata } => (tree, metadata),
            Extraction::NeedsOcr {
                empty_pages,
                total_pages,
            } => {
                return Ok(Converted::NeedsOcr {
                    empty_pages,
                    total_pages,
                })
            }
        };
        enter(file, FileState::Extracted);

        // ── Normalize + serialize ──────────────────────────────────────────
        let generated = self.generated;
        let verify = self.config.verify_output;
        let src = source.clone();
        let (doc, xml) = tokio::task::spawn_blocking(move || {
            let doc = normalize_with_metadata(tree, metadata, &src, generated)?;
            let xml = doc.to_xml()?;
            if verify {
                verify_round_trip(&doc, &xml)?;
            }
            Ok::<_, NormalizeError>((doc, xml))
        })
        .await
        .map_err(task_failed)??;
        enter(file, FileState::Normalized);

        // ── Write ──────────────────────────────────────────────────────────
        self.check_cancelled("write")?;
        let target = output.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomic(&target, &xml))
            .await
            .map_err(task_failed)?
            .map_err(|source| ConversionError::Write {
                path: output.to_path_buf(),
                source,
            })?;

        if let Some(options) = self.config.docbook.clone() {
            let out_dir = self.config.output_dir.clone();
            let stem = output
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.to_string());
            let book_dir = out_dir.join(&stem);
            tokio::task::spawn_blocking(move || {
                docbook::export_book(&doc, &stem, &out_dir, &options)
            })
            .await
            .map_err(task_failed)?
            .map_err(|source| ConversionError::Write {
                path: book_dir,
                source,
            })?;
        }

        Ok(Converted::Written(output.to_path_buf()))
    }

    async fn extract(&self, source: &SourceDocument) -> Result<Extraction, ConversionError> {
        let (component, extractor) = match source.format {
            SourceFormat::Pdf => (Component::PdfExtractor, Arc::clone(&self.pdf)),
            SourceFormat::Epub => (Component::EpubExtractor, Arc::clone(&self.epub)),
            SourceFormat::Unsupported => {
                return Err(ConversionError::Unsupported {
                    reason: "unrecognised format".to_string(),
                })
            }
        };
        let src = source.clone();
        let task = tokio::task::spawn_blocking(move || extractor.extract(&src));

        let joined = if component == Component::PdfExtractor {
            let secs = self.config.tool_timeout_secs;
            match tokio::time::timeout(Duration::from_secs(secs) + TOOL_GRACE, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(ConversionError::Extraction {
                        component,
                        source: ExtractionError::ToolTimeout {
                            program: self.config.pdftohtml_program.clone(),
                            secs,
                        },
                    })
                }
            }
        } else {
            task.await
        };

        joined
            .map_err(task_failed)?
            .map_err(|source| ConversionError::Extraction { component, source })
    }

    fn check_cancelled(&self, stage: &'static str) -> Result<(), ConversionError> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ConversionError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}

fn task_failed(e: tokio::task::JoinError) -> ConversionError {
    ConversionError::TaskFailed(e.to_string())
}

/// Parse the serialized XML back and compare its shape with what was written.
fn verify_round_trip(doc: &NormalizedDocument, xml: &str) -> Result<(), NormalizeError> {
    let parsed = NormalizedDocument::from_xml(xml)?;
    if parsed.sections.len() != doc.sections.len() || parsed.block_count() != doc.block_count() {
        return Err(NormalizeError::Malformed(format!(
            "verification mismatch: wrote {} sections / {} blocks, read back {} / {}",
            doc.sections.len(),
            doc.block_count(),
            parsed.sections.len(),
            parsed.block_count()
        )));
    }
    Ok(())
}

/// Write through a temp file in the target directory, then rename over `path`.
fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create the output directory and prove it is writable before any work.
async fn prepare_output_dir(dir: &Path) -> Result<(), BatchError> {
    let unavailable = |source| BatchError::OutputDirUnavailable {
        path: dir.to_path_buf(),
        source,
    };
    tokio::fs::create_dir_all(dir).await.map_err(unavailable)?;
    let probe_dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || tempfile::NamedTempFile::new_in(&probe_dir).map(drop))
        .await
        .map_err(|e| BatchError::Internal(format!("output probe task failed: {e}")))?
        .map_err(unavailable)?;
    debug!(dir = %dir.display(), "output directory ready");
    Ok(())
}
