//! Intermediate document tree shared by both extractors.
//!
//! Extractors build an [`IntermediateNode`] tree whose vocabulary is the same
//! for PDF and EPUB input; only the heading cue differs (a font size versus an
//! explicit `h1`–`h6` level). The tree is handed to the normalizer by value and
//! consumed there.

use crate::pipeline::postprocess::is_visible_char;

/// Extractor-specific hint about how prominent a heading is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeadingCue {
    /// Explicit level from markup (`h1` → 1).
    Level(u8),
    /// Font size in points of a PDF line at or above the heading threshold.
    FontSize(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Document,
    Page,
    Chapter,
    Heading(HeadingCue),
    Paragraph,
    ImagePlaceholder,
    TextRun,
    /// Visual or explicit line end inside a heading or paragraph.
    LineBreak,
}

impl NodeKind {
    /// Heading, paragraph and image nodes are the block vocabulary.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            NodeKind::Heading(_) | NodeKind::Paragraph | NodeKind::ImagePlaceholder
        )
    }

    /// Page and chapter nodes each become one output section.
    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Page | NodeKind::Chapter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntermediateNode {
    pub kind: NodeKind,
    pub text: Option<String>,
    /// 1-based page or chapter number, set on `Page`/`Chapter` nodes.
    pub index: Option<usize>,
    pub children: Vec<IntermediateNode>,
}

impl IntermediateNode {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            text: None,
            index: None,
            children: Vec::new(),
        }
    }

    pub fn document() -> Self {
        Self::new(NodeKind::Document)
    }

    pub fn page(number: usize) -> Self {
        Self {
            index: Some(number),
            ..Self::new(NodeKind::Page)
        }
    }

    pub fn chapter(number: usize) -> Self {
        Self {
            index: Some(number),
            ..Self::new(NodeKind::Chapter)
        }
    }

    pub fn heading(cue: HeadingCue) -> Self {
        Self::new(NodeKind::Heading(cue))
    }

    pub fn paragraph() -> Self {
        Self::new(NodeKind::Paragraph)
    }

    /// Image placeholder; `alt` is the source's alternative text, if any.
    pub fn image(alt: Option<String>) -> Self {
        Self {
            text: alt.filter(|a| !a.trim().is_empty()),
            ..Self::new(NodeKind::ImagePlaceholder)
        }
    }

    pub fn text_run(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(NodeKind::TextRun)
        }
    }

    pub fn line_break() -> Self {
        Self::new(NodeKind::LineBreak)
    }

    pub fn with_child(mut self, child: IntermediateNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: IntermediateNode) {
        self.children.push(child);
    }

    /// Concatenated text of all descendant runs, without any cleanup.
    pub fn raw_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self.kind {
            NodeKind::TextRun => {
                if let Some(ref t) = self.text {
                    out.push_str(t);
                }
            }
            NodeKind::LineBreak => out.push(' '),
            _ => {
                for child in &self.children {
                    child.collect_text(out);
                }
            }
        }
    }

    /// Number of characters in all descendant runs that survive text
    /// cleanup, whitespace excluded.
    pub fn visible_chars(&self) -> usize {
        self.raw_text().chars().filter(|&c| is_visible_char(c)).count()
    }

    /// True for image placeholders, and for headings and paragraphs whose
    /// text does not clean up to nothing. Only such blocks reach the output.
    pub fn has_content(&self) -> bool {
        match self.kind {
            NodeKind::ImagePlaceholder => true,
            NodeKind::Heading(_) | NodeKind::Paragraph => self.visible_chars() > 0,
            _ => false,
        }
    }

    /// `(sections, blocks)` as the normalizer will count them: one section per
    /// page or chapter plus one per run of stray top-level blocks. Blocks
    /// without content are not counted.
    pub fn structure_counts(&self) -> (usize, usize) {
        let mut sections = 0;
        let mut blocks = 0;
        let mut in_stray_run = false;
        for child in &self.children {
            if child.kind.is_container() {
                sections += 1;
                blocks += child.children.iter().filter(|b| b.has_content()).count();
                in_stray_run = false;
            } else if child.kind.is_block() {
                if !in_stray_run {
                    sections += 1;
                    in_stray_run = true;
                }
                if child.has_content() {
                    blocks += 1;
                }
            }
        }
        (sections, blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IntermediateNode {
        IntermediateNode::document()
            .with_child(
                IntermediateNode::page(1)
                    .with_child(
                        IntermediateNode::heading(HeadingCue::FontSize(18.0))
                            .with_child(IntermediateNode::text_run("Intro")),
                    )
                    .with_child(
                        IntermediateNode::paragraph()
                            .with_child(IntermediateNode::text_run("one"))
                            .with_child(IntermediateNode::line_break())
                            .with_child(IntermediateNode::text_run("two")),
                    ),
            )
            .with_child(IntermediateNode::page(2).with_child(IntermediateNode::image(None)))
    }

    #[test]
    fn raw_text_turns_line_breaks_into_spaces() {
        let doc = sample();
        let para = &doc.children[0].children[1];
        assert_eq!(para.raw_text(), "one two");
    }

    #[test]
    fn structure_counts_sections_and_blocks() {
        assert_eq!(sample().structure_counts(), (2, 3));
    }

    fn para(text: &str) -> IntermediateNode {
        IntermediateNode::paragraph().with_child(IntermediateNode::text_run(text))
    }

    #[test]
    fn stray_blocks_form_one_section_per_run() {
        let doc = IntermediateNode::document()
            .with_child(para("a"))
            .with_child(para("b"))
            .with_child(IntermediateNode::chapter(1).with_child(para("c")))
            .with_child(IntermediateNode::image(None));
        assert_eq!(doc.structure_counts(), (3, 4));
    }

    #[test]
    fn blocks_that_clean_up_to_nothing_are_not_counted() {
        let doc = IntermediateNode::document().with_child(
            IntermediateNode::chapter(1)
                .with_child(para("\n  "))
                .with_child(para("x"))
                .with_child(para("\u{200B}\u{00AD}"))
                .with_child(IntermediateNode::heading(HeadingCue::Level(2)))
                .with_child(IntermediateNode::image(None)),
        );
        assert_eq!(doc.structure_counts(), (1, 2));
        assert!(!doc.children[0].children[0].has_content());
        assert!(doc.children[0].children[4].has_content());
    }

    #[test]
    fn visible_chars_ignores_whitespace() {
        let p = IntermediateNode::paragraph().with_child(IntermediateNode::text_run("  a b\tc "));
        assert_eq!(p.visible_chars(), 3);
    }

    #[test]
    fn blank_alt_text_is_dropped() {
        assert_eq!(IntermediateNode::image(Some("  ".into())).text, None);
        assert_eq!(
            IntermediateNode::image(Some("Figure 1".into())).text.as_deref(),
            Some("Figure 1")
        );
    }
}
