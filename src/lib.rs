//! # doc2xml
//!
//! Normalize a directory of PDF and EPUB files into one canonical XML schema.
//!
//! ## Why this crate?
//!
//! PDF and EPUB describe the same thing (a book, a report, an article) in
//! completely different ways: positioned glyph runs on fixed pages versus a
//! zip of XHTML chapters ordered by a package document. Downstream tooling
//! should not care which one it got. This crate reduces both to the same
//! `<document>/<section>/<heading|paragraph|image>` tree, so that apart from
//! the `format` attribute a converted PDF is indistinguishable from a
//! converted EPUB.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Discover  regular files, sorted by name
//!  ├─ 2. Sniff     %PDF- / zip + mimetype → pdf | epub | unsupported
//!  ├─ 3. Extract   pdftohtml text layer → pages   |   OPF spine → chapters
//!  ├─ 4. Normalize heading levels, sections, image refs, text cleanup
//!  ├─ 5. Write     <stem>.xml (atomic), optional DocBook book
//!  └─ 6. Report    batch_report.csv: one row per input
//! ```
//!
//! Scanned PDFs (no usable text layer) are not converted; they are reported as
//! `NEEDS_OCR`. A file that fails is reported as `ERROR` and the batch moves
//! on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2xml::{BatchConfig, BatchRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .output_dir("output")
//!         .concurrency(4)
//!         .build()?;
//!     let report = BatchRunner::new(config).run_dir("input".as_ref()).await?;
//!     let s = report.summary();
//!     eprintln!("{} ok, {} need OCR, {} failed", s.succeeded, s.needs_ocr, s.failed);
//!     Ok(())
//! }
//! ```
//!
//! ## External tool
//!
//! PDF text layers come from Poppler's `pdftohtml`, found on `PATH` or through
//! `$POPPLER_EXE`. Tests and embedders can replace it with any
//! [`TextLayerExtractor`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2xml` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! doc2xml = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod tree;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{output_names, BatchRunner, FileState};
pub use config::{BatchConfig, BatchConfigBuilder, OcrPolicy};
pub use document::{Block, DocumentFormat, DocumentMetadata, NormalizedDocument, Section};
pub use error::{BatchError, Component, ConversionError, ExtractionError, NormalizeError};
pub use export::docbook::DocBookOptions;
pub use output::{BatchReport, BatchSummary, ConversionOutcome, OutcomeStatus};
pub use pipeline::pdf::TextLayerExtractor;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::ReportWriter;
pub use tree::{HeadingCue, IntermediateNode, NodeKind};
