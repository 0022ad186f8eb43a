//! Per-file outcomes and the batch report.
//!
//! A [`BatchReport`] holds exactly one [`ConversionOutcome`] per input file.
//! Only the batch driver appends to it; once the run ends it is sorted into
//! discovery order and never changes again.

use crate::error::{Component, ConversionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Terminal status of one input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    NeedsOcr,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::NeedsOcr => "NEEDS_OCR",
            OutcomeStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    /// Position in discovery order (0-based).
    pub index: usize,
    pub path: PathBuf,
    pub status: OutcomeStatus,
    /// Component an ERROR is attributed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<Component>,
    /// Failure cause for ERROR, page statistics for NEEDS_OCR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Written XML file, for SUCCESS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl ConversionOutcome {
    pub fn success(index: usize, path: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
            status: OutcomeStatus::Success,
            component: None,
            detail: None,
            output: Some(output.into()),
        }
    }

    pub fn needs_ocr(index: usize, path: impl Into<PathBuf>, empty_pages: usize, total_pages: usize) -> Self {
        Self {
            index,
            path: path.into(),
            status: OutcomeStatus::NeedsOcr,
            component: None,
            detail: Some(format!(
                "{empty_pages} of {total_pages} pages have no usable text layer"
            )),
            output: None,
        }
    }

    pub fn failed(index: usize, path: impl Into<PathBuf>, error: &ConversionError) -> Self {
        Self {
            index,
            path: path.into(),
            status: OutcomeStatus::Error,
            component: Some(error.component()),
            detail: Some(error.to_string()),
            output: None,
        }
    }

    /// File name as shown in the report's `file` column.
    pub fn file_name(&self) -> String {
        display_name(&self.path)
    }

    /// The report's `detail` column: output path, `Component: cause`, or
    /// nothing for NEEDS_OCR.
    pub fn report_detail(&self) -> String {
        match self.status {
            OutcomeStatus::Success => self
                .output
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            OutcomeStatus::NeedsOcr => String::new(),
            OutcomeStatus::Error => match (&self.component, &self.detail) {
                (Some(c), Some(d)) => format!("{c}: {d}"),
                (Some(c), None) => c.to_string(),
                (None, Some(d)) => d.clone(),
                (None, None) => String::new(),
            },
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Counts over a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub needs_ocr: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Ordered outcomes of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<ConversionOutcome>,
    /// True when the run was cancelled before every file finished.
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: ConversionOutcome) {
        self.outcomes.push(outcome);
    }

    /// Sort into discovery order. Called once, when the run ends.
    pub fn finalize(&mut self) {
        self.outcomes.sort_by_key(|o| o.index);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.outcomes.len(),
            succeeded: self.count(OutcomeStatus::Success),
            needs_ocr: self.count(OutcomeStatus::NeedsOcr),
            failed: self.count(OutcomeStatus::Error),
            cancelled: self.cancelled,
            duration_ms: self.duration_ms,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
