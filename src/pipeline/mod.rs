//! Pipeline stages for document normalization.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the two extractors can evolve without touching
//! the normalizer.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ sniff ──▶ pdf | epub ──▶ normalize ──▶ document::to_xml
//! (dir)    (magic)   (tree)          (sections)    (canonical XML)
//! ```
//!
//! 1. [`input`]: list the input directory in discovery order
//! 2. [`sniff`]: classify each file from its magic bytes
//! 3. [`pdf`]: text layer via `pdftohtml`, layout heuristics, OCR detection
//! 4. [`epub`]: container, package document and spine; content documents
//!    are walked by [`xhtml`]
//! 5. [`normalize`]: heading levels, sections and image references
//! 6. [`postprocess`]: deterministic text-cleanup rules used by the normalizer

pub mod epub;
pub mod input;
pub mod normalize;
pub mod pdf;
pub mod postprocess;
pub mod sniff;
pub mod xhtml;

use crate::document::DocumentMetadata;
use crate::error::ExtractionError;
use crate::tree::IntermediateNode;
use sniff::SourceDocument;

/// What an extractor produced for one source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// An intermediate tree ready for normalization.
    Document {
        tree: IntermediateNode,
        metadata: DocumentMetadata,
    },
    /// The file has no usable text layer; no tree was built.
    NeedsOcr {
        empty_pages: usize,
        total_pages: usize,
    },
}

/// Turns a sniffed source file into an intermediate tree.
///
/// Implementations are synchronous and may block on I/O or a subprocess; the
/// batch runner calls them from `spawn_blocking`.
pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, source: &SourceDocument) -> Result<Extraction, ExtractionError>;
}
