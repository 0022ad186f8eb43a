//! Intermediate tree → canonical [`NormalizedDocument`].
//!
//! Both extractors feed the same code path here; nothing below looks at where
//! a tree came from except the heading cue, which is resolved into a level
//! before any section is built.

use super::postprocess::{clean_runs, clean_text, RunPiece};
use super::sniff::{SourceDocument, SourceFormat};
use crate::document::{Block, DocumentFormat, DocumentMetadata, NormalizedDocument, Section};
use crate::error::NormalizeError;
use crate::tree::{HeadingCue, IntermediateNode, NodeKind};
use chrono::{DateTime, Utc};
use tracing::debug;

const MAX_LEVEL: u8 = 6;

/// Normalize a tree without bibliographic metadata.
pub fn normalize(
    tree: IntermediateNode,
    source: &SourceDocument,
    generated: DateTime<Utc>,
) -> Result<NormalizedDocument, NormalizeError> {
    normalize_with_metadata(tree, DocumentMetadata::default(), source, generated)
}

/// Normalize a tree and stamp it with the source's identity, the generation
/// time and cleaned-up metadata.
pub fn normalize_with_metadata(
    tree: IntermediateNode,
    metadata: DocumentMetadata,
    source: &SourceDocument,
    generated: DateTime<Utc>,
) -> Result<NormalizedDocument, NormalizeError> {
    let format = match source.format {
        SourceFormat::Pdf => DocumentFormat::Pdf,
        SourceFormat::Epub => DocumentFormat::Epub,
        SourceFormat::Unsupported => {
            return Err(NormalizeError::Malformed(format!(
                "'{}' is not a supported source format",
                source.path.display()
            )))
        }
    };
    if tree.kind != NodeKind::Document {
        return Err(NormalizeError::Malformed(format!(
            "tree root must be a document node, got {:?}",
            tree.kind
        )));
    }

    let levels = HeadingLevels::from_tree(&tree);
    let mut builder = SectionBuilder {
        levels,
        images: 0,
        sections: Vec::new(),
    };

    let mut stray: Vec<IntermediateNode> = Vec::new();
    for child in tree.children {
        if child.kind.is_container() {
            if !stray.is_empty() {
                builder.section(std::mem::take(&mut stray));
            }
            builder.section(child.children);
        } else if child.kind.is_block() {
            stray.push(child);
        } else {
            debug!(kind = ?child.kind, "ignoring non-block node at document level");
        }
    }
    if !stray.is_empty() {
        builder.section(stray);
    }

    let doc = NormalizedDocument {
        source: source.file_name(),
        format,
        generated,
        metadata: metadata.map_values(clean_text),
        sections: builder.sections,
    };
    debug!(
        source = %doc.source,
        sections = doc.sections.len(),
        blocks = doc.block_count(),
        "normalized"
    );
    Ok(doc)
}

// ── Heading levels ───────────────────────────────────────────────────────────

/// Distinct heading font sizes, largest first.
struct HeadingLevels {
    sizes: Vec<i32>,
}

/// Sizes compare at tenth-of-a-point precision.
fn size_key(size: f32) -> i32 {
    (size * 10.0).round() as i32
}

impl HeadingLevels {
    fn from_tree(tree: &IntermediateNode) -> Self {
        let mut sizes = Vec::new();
        collect_font_sizes(tree, &mut sizes);
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        sizes.dedup();
        Self { sizes }
    }

    fn level(&self, cue: HeadingCue) -> u8 {
        match cue {
            HeadingCue::Level(n) => n.clamp(1, MAX_LEVEL),
            HeadingCue::FontSize(size) => {
                let key = size_key(size);
                let rank = self.sizes.iter().position(|&s| s == key).unwrap_or(0);
                (rank + 1).min(MAX_LEVEL as usize) as u8
            }
        }
    }
}

fn collect_font_sizes(node: &IntermediateNode, out: &mut Vec<i32>) {
    if let NodeKind::Heading(HeadingCue::FontSize(size)) = node.kind {
        out.push(size_key(size));
    }
    for child in &node.children {
        collect_font_sizes(child, out);
    }
}

// ── Sections and blocks ──────────────────────────────────────────────────────

struct SectionBuilder {
    levels: HeadingLevels,
    images: usize,
    sections: Vec<Section>,
}

impl SectionBuilder {
    fn section(&mut self, nodes: Vec<IntermediateNode>) {
        let blocks: Vec<Block> = nodes.iter().filter_map(|n| self.block(n)).collect();
        let title = blocks
            .iter()
            .find_map(|b| match b {
                Block::Heading { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| format!("Section {}", self.sections.len() + 1));
        self.sections.push(Section { title, blocks });
    }

    /// `None` when the node is not a block or its text cleans up to nothing.
    fn block(&mut self, node: &IntermediateNode) -> Option<Block> {
        match node.kind {
            NodeKind::Heading(cue) => {
                let text = block_text(node);
                (!text.is_empty()).then(|| Block::Heading {
                    level: self.levels.level(cue),
                    text,
                })
            }
            NodeKind::Paragraph => {
                let text = block_text(node);
                (!text.is_empty()).then_some(Block::Paragraph { text })
            }
            NodeKind::ImagePlaceholder => {
                self.images += 1;
                Some(Block::Image {
                    reference: format!("img-{:04}", self.images),
                })
            }
            _ => None,
        }
    }
}

fn block_text(node: &IntermediateNode) -> String {
    let mut pieces = Vec::new();
    collect_pieces(node, &mut pieces);
    clean_runs(pieces)
}

fn collect_pieces<'a>(node: &'a IntermediateNode, out: &mut Vec<RunPiece<'a>>) {
    for child in &node.children {
        match child.kind {
            NodeKind::TextRun => {
                if let Some(ref text) = child.text {
                    out.push(RunPiece::Text(text));
                }
            }
            NodeKind::LineBreak => out.push(RunPiece::Break),
            _ => collect_pieces(child, out),
        }
    }
}
