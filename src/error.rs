//! Error types for the doc2xml library.
//!
//! Two layers reflect two distinct failure modes:
//!
//! * [`BatchError`] is **fatal**: the batch cannot run or cannot record its
//!   results (output directory unusable, report unwritable, bad config).
//!   Returned as `Err(BatchError)` from the `BatchRunner::run*` functions.
//!
//! * [`ConversionError`] is **non-fatal**: one input file failed. It is turned
//!   into an `ERROR` row of the [`crate::output::BatchReport`] and the batch
//!   moves on to the next file.
//!
//! A NEEDS_OCR verdict is neither: it is a legitimate terminal outcome and has
//! no error type at all.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the batch driver.
#[derive(Debug, Error)]
pub enum BatchError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input directory does not exist.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is a directory.")]
    InputDirNotFound { path: PathBuf },

    /// The input directory exists but cannot be listed.
    #[error("Cannot read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The output directory cannot be created or written to.
    #[error("Output directory '{path}' is not usable: {source}\nTry: mkdir -p {path:?} && chmod u+w {path:?}")]
    OutputDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch report could not be written.
    #[error("Failed to write batch report '{path}': {source}")]
    ReportWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline component a per-file failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    FormatSniffer,
    PdfExtractor,
    EpubExtractor,
    Normalizer,
    Writer,
    BatchRunner,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::FormatSniffer => "FormatSniffer",
            Component::PdfExtractor => "PdfExtractor",
            Component::EpubExtractor => "EpubExtractor",
            Component::Normalizer => "Normalizer",
            Component::Writer => "Writer",
            Component::BatchRunner => "BatchRunner",
        };
        f.write_str(name)
    }
}

/// Failure while turning a source file into an intermediate tree.
///
/// Shared by both extractors; the caller knows which one it invoked.
#[derive(Debug, Error)]
pub enum ExtractionError {
    // ── Text-layer tool ───────────────────────────────────────────────────
    /// The external extraction program could not be found.
    #[error("text-layer tool '{program}' not found on PATH (set POPPLER_EXE or --pdftohtml)")]
    ToolNotFound { program: String },

    /// The extraction program ran but exited unsuccessfully.
    #[error("text-layer tool '{program}' failed ({status}): {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The extraction program did not finish in time and was killed.
    #[error("text-layer tool '{program}' timed out after {secs}s")]
    ToolTimeout { program: String, secs: u64 },

    /// The tool output is not the expected structured markup.
    #[error("malformed text-layer markup: {detail}")]
    MalformedMarkup { detail: String },

    // ── EPUB container ────────────────────────────────────────────────────
    /// The file is not a readable zip archive.
    #[error("EPUB archive is corrupt: {detail}")]
    CorruptArchive { detail: String },

    /// No package document (OPF) could be located.
    #[error("EPUB has no package document: {detail}")]
    MissingPackage { detail: String },

    /// The package document exists but cannot be parsed.
    #[error("EPUB package document '{path}' is unparsable: {detail}")]
    UnparsablePackage { path: String, detail: String },

    /// A spine `itemref` points at an id the manifest does not declare.
    #[error("EPUB spine references missing manifest item '{idref}'")]
    MissingManifestItem { idref: String },

    /// A manifest entry names a resource that is not in the archive.
    #[error("EPUB resource '{path}' is missing from the archive")]
    MissingResource { path: String },

    /// A content document cannot be parsed.
    #[error("content document '{path}' is malformed: {detail}")]
    MalformedContent { path: String, detail: String },

    // ── I/O ───────────────────────────────────────────────────────────────
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure while building or serialising the canonical document.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("XML serialisation failed: {0}")]
    Serialize(String),

    #[error("output is not well-formed canonical XML: {0}")]
    Malformed(String),
}

/// A non-fatal failure of a single input file.
///
/// Stored (as text) in the file's [`crate::output::ConversionOutcome`]; the
/// batch always continues with the next file.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The sniffer could not classify the file as PDF or EPUB.
    #[error("unsupported input: {reason}")]
    Unsupported { reason: String },

    #[error("{source}")]
    Extraction {
        component: Component,
        #[source]
        source: ExtractionError,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// The normalized XML could not be written.
    #[error("cannot write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The batch was cancelled before this file reached the given stage.
    #[error("batch cancelled before {stage}")]
    Cancelled { stage: &'static str },

    /// The worker task running this file panicked or was aborted.
    #[error("conversion task failed: {0}")]
    TaskFailed(String),
}

impl ConversionError {
    /// Component the failure is attributed to in the batch report.
    pub fn component(&self) -> Component {
        match self {
            ConversionError::Unsupported { .. } => Component::FormatSniffer,
            ConversionError::Extraction { component, .. } => *component,
            ConversionError::Normalize(_) => Component::Normalizer,
            ConversionError::Write { .. } => Component::Writer,
            ConversionError::Cancelled { .. } | ConversionError::TaskFailed(_) => {
                Component::BatchRunner
            }
        }
    }
}
