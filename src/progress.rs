//! Progress-callback trait for per-file batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the batch runner works through the input directory. The CLI uses this to
//! drive its progress bar; a host application can forward the events anywhere.
//!
//! # Example
//!
//! ```rust
//! use doc2xml::{BatchConfig, BatchProgressCallback, ConversionOutcome};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_file_complete(&self, outcome: &ConversionOutcome) {
//!         let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("{n}: {} {}", outcome.file_name(), outcome.status);
//!     }
//! }
//!
//! let config = BatchConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchSummary, ConversionOutcome};
use std::path::Path;
use std::sync::Arc;

/// Called by the batch runner as it processes each file.
///
/// Files are converted concurrently, so `on_file_start` and
/// `on_file_complete` may be called from different threads at once and in
/// any order across files. Implementations must protect shared mutable state.
/// All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, after discovery, before any file is touched.
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file is picked up. `index` is its discovery position.
    fn on_file_start(&self, index: usize, path: &Path) {
        let _ = (index, path);
    }

    /// Called exactly once per file with its terminal outcome.
    fn on_file_complete(&self, outcome: &ConversionOutcome) {
        let _ = outcome;
    }

    /// Called once after every file has an outcome.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
