//! Configuration types for batch normalization.
//!
//! All batch behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Keeping every knob in one struct makes it easy to
//! share a config across worker tasks and to log exactly what a run used.

use crate::error::BatchError;
use crate::export::docbook::DocBookOptions;
use crate::pipeline::pdf::TextLayerExtractor;
use crate::progress::ProgressCallback;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Environment variable naming the `pdftohtml` executable.
pub const POPPLER_ENV: &str = "POPPLER_EXE";

/// `$POPPLER_EXE` when set and non-empty, otherwise `pdftohtml` on `PATH`.
pub fn default_pdftohtml_program() -> String {
    std::env::var(POPPLER_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "pdftohtml".to_string())
}

/// Thresholds for deciding that a PDF has no usable text layer.
///
/// The decision is made per document: individual near-empty pages (a blank
/// page, a full-page figure) are normal in text PDFs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcrPolicy {
    /// A page with fewer non-whitespace characters than this is near-empty.
    /// Default: 10.
    pub near_empty_page_chars: usize,

    /// The document needs OCR when the share of near-empty pages is strictly
    /// greater than this. Range: `[0, 1)`. Default: 0.5.
    pub empty_page_ratio: f64,
}

impl Default for OcrPolicy {
    fn default() -> Self {
        Self {
            near_empty_page_chars: 10,
            empty_page_ratio: 0.5,
        }
    }
}

impl OcrPolicy {
    pub fn is_near_empty(&self, visible_chars: usize) -> bool {
        visible_chars < self.near_empty_page_chars
    }

    pub fn needs_ocr(&self, empty_pages: usize, total_pages: usize) -> bool {
        total_pages > 0 && (empty_pages as f64 / total_pages as f64) > self.empty_page_ratio
    }
}

/// Configuration for a batch run.
///
/// Built via [`BatchConfig::builder()`] or using [`BatchConfig::default()`].
///
/// # Example
/// ```rust
/// use doc2xml::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .output_dir("converted")
///     .concurrency(8)
///     .heading_font_size(13.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Directory receiving one XML file per converted input plus the report.
    /// Created if missing. Default: `output`.
    pub output_dir: PathBuf,

    /// File name of the CSV report inside `output_dir`. Default: `batch_report.csv`.
    pub report_name: String,

    /// Files converted at the same time. Default: 4.
    ///
    /// Each in-flight PDF holds one `pdftohtml` process, so this also bounds
    /// the number of subprocesses.
    pub concurrency: usize,

    /// Text-layer tool executable. Default: `$POPPLER_EXE` or `pdftohtml`.
    pub pdftohtml_program: String,

    /// Wall-clock limit for one text-layer extraction, in seconds. Default: 120.
    pub tool_timeout_secs: u64,

    /// Scanned-PDF detection thresholds.
    pub ocr: OcrPolicy,

    /// PDF lines at or above this font size (points) are headings. Default: 14.0.
    pub heading_font_size: f32,

    /// Body lines closer than this multiple of the line height join the
    /// previous paragraph. Default: 0.75.
    pub paragraph_gap_ratio: f32,

    /// Parse every XML file back before writing it. Default: true.
    pub verify_output: bool,

    /// Also write a DocBook book for every converted file. Default: off.
    pub docbook: Option<DocBookOptions>,

    /// Fixed `generated=` timestamp; `None` stamps the current time.
    /// Set it to make repeated runs byte-identical.
    pub generated_at: Option<DateTime<Utc>>,

    /// Replaces the `pdftohtml` subprocess, e.g. with a test double.
    pub text_layer: Option<Arc<dyn TextLayerExtractor>>,

    /// Receives per-file progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            report_name: "batch_report.csv".to_string(),
            concurrency: 4,
            pdftohtml_program: default_pdftohtml_program(),
            tool_timeout_secs: 120,
            ocr: OcrPolicy::default(),
            heading_font_size: 14.0,
            paragraph_gap_ratio: 0.75,
            verify_output: true,
            docbook: None,
            generated_at: None,
            text_layer: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("output_dir", &self.output_dir)
            .field("report_name", &self.report_name)
            .field("concurrency", &self.concurrency)
            .field("pdftohtml_program", &self.pdftohtml_program)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("ocr", &self.ocr)
            .field("heading_font_size", &self.heading_font_size)
            .field("paragraph_gap_ratio", &self.paragraph_gap_ratio)
            .field("verify_output", &self.verify_output)
            .field("docbook", &self.docbook)
            .field("generated_at", &self.generated_at)
            .field(
                "text_layer",
                &self.text_layer.as_ref().map(|_| "<dyn TextLayerExtractor>"),
            )
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Full path of the CSV report.
    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(&self.report_name)
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn report_name(mut self, name: impl Into<String>) -> Self {
        self.config.report_name = name.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn pdftohtml_program(mut self, program: impl Into<String>) -> Self {
        self.config.pdftohtml_program = program.into();
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.config.tool_timeout_secs = secs.max(1);
        self
    }

    pub fn near_empty_page_chars(mut self, chars: usize) -> Self {
        self.config.ocr.near_empty_page_chars = chars;
        self
    }

    pub fn empty_page_ratio(mut self, ratio: f64) -> Self {
        self.config.ocr.empty_page_ratio = ratio;
        self
    }

    pub fn ocr(mut self, policy: OcrPolicy) -> Self {
        self.config.ocr = policy;
        self
    }

    pub fn heading_font_size(mut self, size: f32) -> Self {
        self.config.heading_font_size = size;
        self
    }

    pub fn paragraph_gap_ratio(mut self, ratio: f32) -> Self {
        self.config.paragraph_gap_ratio = ratio.max(0.0);
        self
    }

    pub fn verify_output(mut self, v: bool) -> Self {
        self.config.verify_output = v;
        self
    }

    pub fn docbook(mut self, options: DocBookOptions) -> Self {
        self.config.docbook = Some(options);
        self
    }

    pub fn generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.config.generated_at = Some(at);
        self
    }

    pub fn text_layer(mut self, layer: Arc<dyn TextLayerExtractor>) -> Self {
        self.config.text_layer = Some(layer);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, BatchError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig("Concurrency must be ≥ 1".into()));
        }
        if !(0.0..1.0).contains(&c.ocr.empty_page_ratio) {
            return Err(BatchError::InvalidConfig(format!(
                "empty page ratio must be in [0, 1), got {}",
                c.ocr.empty_page_ratio
            )));
        }
        if !(c.heading_font_size > 0.0) {
            return Err(BatchError::InvalidConfig(format!(
                "heading font size must be > 0, got {}",
                c.heading_font_size
            )));
        }
        if c.report_name.trim().is_empty() || c.report_name.contains(['/', '\\']) {
            return Err(BatchError::InvalidConfig(format!(
                "report name must be a plain file name, got '{}'",
                c.report_name
            )));
        }
        if c.pdftohtml_program.trim().is_empty() {
            return Err(BatchError::InvalidConfig(
                "pdftohtml program must not be empty".into(),
            ));
        }
        if let Some(docbook) = &c.docbook {
            docbook.validate().map_err(BatchError::InvalidConfig)?;
        }
        Ok(self.config)
    }
}
