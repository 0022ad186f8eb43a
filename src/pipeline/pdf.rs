//! PDF text-layer extraction.
//!
//! The PDF itself is never parsed here. An external tool (Poppler's
//! `pdftohtml -xml`) dumps the text layer as positioned lines, and this module
//! turns those lines back into pages, headings and paragraphs.
//!
//! ## Layout heuristics
//!
//! Within a page, items are read top to bottom, then left to right. A line
//! whose font is at least `heading_font_size` points tall is a heading line;
//! everything else is body text. Body lines join the current paragraph while
//! the vertical gap to the previous line stays within
//! `paragraph_gap_ratio × line height` and the font size does not change.
//!
//! ## Scanned documents
//!
//! A page with fewer than `near_empty_page_chars` visible characters has no
//! usable text layer. When more than `empty_page_ratio` of all pages are like
//! that, the whole document is reported as needing OCR and no tree is built.

use super::postprocess::is_visible_char;
use super::sniff::SourceDocument;
use super::{DocumentExtractor, Extraction};
use crate::config::{BatchConfig, OcrPolicy};
use crate::document::DocumentMetadata;
use crate::error::ExtractionError;
use crate::tree::{HeadingCue, IntermediateNode};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDERR_LIMIT: usize = 500;

// ── Text-layer capability ────────────────────────────────────────────────────

/// Produces Poppler-style `pdf2xml` markup for a PDF file.
///
/// The default implementation shells out to `pdftohtml`; tests and embedders
/// can supply their own through [`crate::config::BatchConfigBuilder::text_layer`].
pub trait TextLayerExtractor: Send + Sync {
    fn extract_markup(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// Runs `pdftohtml -xml` in a scratch directory with a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct PopplerTextLayer {
    program: String,
    timeout: Duration,
}

impl PopplerTextLayer {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl TextLayerExtractor for PopplerTextLayer {
    fn extract_markup(&self, path: &Path) -> Result<String, ExtractionError> {
        let scratch = tempfile::Builder::new()
            .prefix("doc2xml-")
            .tempdir()
            .map_err(|source| ExtractionError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        let stem = scratch.path().join("layer");
        let xml_path = scratch.path().join("layer.xml");
        let stderr_path = scratch.path().join("stderr.log");

        // stderr goes to a file: a pipe nobody drains can fill up and stall the child.
        let stderr = File::create(&stderr_path).map_err(|source| ExtractionError::Io {
            path: stderr_path.clone(),
            source,
        })?;

        let mut child = Command::new(&self.program)
            .args(["-xml", "-enc", "UTF-8", "-nodrm", "-q"])
            .arg(path)
            .arg(&stem)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ExtractionError::ToolNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    ExtractionError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() >= self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        warn!(path = %path.display(), "text-layer tool timed out, killed");
                        return Err(ExtractionError::ToolTimeout {
                            program: self.program.clone(),
                            secs: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(source) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExtractionError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }
        };
        debug!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            %status,
            "text-layer tool finished"
        );

        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(ExtractionError::ToolFailed {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: truncate(stderr.trim(), STDERR_LIMIT),
            });
        }

        match std::fs::read(&xml_path) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => Err(ExtractionError::MalformedMarkup {
                detail: format!("'{}' produced no XML output", self.program),
            }),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

// ── Extractor ────────────────────────────────────────────────────────────────

/// Thresholds that turn positioned lines into blocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfLayout {
    pub heading_font_size: f32,
    pub paragraph_gap_ratio: f32,
}

impl Default for PdfLayout {
    fn default() -> Self {
        Self {
            heading_font_size: 14.0,
            paragraph_gap_ratio: 0.75,
        }
    }
}

pub struct PdfExtractor {
    text_layer: Arc<dyn TextLayerExtractor>,
    layout: PdfLayout,
    ocr: OcrPolicy,
}

impl PdfExtractor {
    pub fn new(text_layer: Arc<dyn TextLayerExtractor>, layout: PdfLayout, ocr: OcrPolicy) -> Self {
        Self {
            text_layer,
            layout,
            ocr,
        }
    }

    /// Uses the configured text layer, or Poppler when none is set.
    pub fn from_config(config: &BatchConfig) -> Self {
        let text_layer = config.text_layer.clone().unwrap_or_else(|| {
            Arc::new(PopplerTextLayer::new(
                config.pdftohtml_program.clone(),
                Duration::from_secs(config.tool_timeout_secs),
            ))
        });
        Self::new(
            text_layer,
            PdfLayout {
                heading_font_size: config.heading_font_size,
                paragraph_gap_ratio: config.paragraph_gap_ratio,
            },
            config.ocr,
        )
    }

    /// Build the intermediate tree from already extracted markup.
    pub fn extract_from_markup(&self, markup: &str) -> Result<Extraction, ExtractionError> {
        let pages = parse_markup(markup)?;
        if pages.is_empty() {
            return Err(ExtractionError::MalformedMarkup {
                detail: "text layer contains no pages".into(),
            });
        }

        let nodes: Vec<IntermediateNode> = pages
            .into_iter()
            .map(|page| layout_page(page, &self.layout))
            .collect();

        let total_pages = nodes.len();
        let empty_pages = nodes
            .iter()
            .filter(|p| self.ocr.is_near_empty(p.visible_chars()))
            .count();
        debug!(total_pages, empty_pages, "text layer density");

        if self.ocr.needs_ocr(empty_pages, total_pages) {
            info!(total_pages, empty_pages, "no usable text layer, needs OCR");
            return Ok(Extraction::NeedsOcr {
                empty_pages,
                total_pages,
            });
        }

        let mut tree = IntermediateNode::document();
        tree.children = nodes;
        Ok(Extraction::Document {
            tree,
            metadata: DocumentMetadata::default(),
        })
    }
}

impl DocumentExtractor for PdfExtractor {
    fn extract(&self, source: &SourceDocument) -> Result<Extraction, ExtractionError> {
        let markup = self.text_layer.extract_markup(&source.path)?;
        self.extract_from_markup(&markup)
    }
}

// ── pdf2xml parsing ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct LayerPage {
    number: usize,
    items: Vec<LayerItem>,
}

#[derive(Debug, Clone, PartialEq)]
struct LayerItem {
    top: f32,
    left: f32,
    height: f32,
    kind: ItemKind,
}

#[derive(Debug, Clone, PartialEq)]
enum ItemKind {
    Line { text: String, font_size: f32 },
    Image,
}

/// A `<text>` element being read; fonts resolve once the whole file is seen.
struct OpenLine {
    top: f32,
    left: f32,
    height: f32,
    font: Option<String>,
    text: String,
}

fn malformed(detail: impl Into<String>) -> ExtractionError {
    ExtractionError::MalformedMarkup {
        detail: detail.into(),
    }
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn num_attr(e: &BytesStart, name: &[u8]) -> f32 {
    attr(e, name)
        .and_then(|v| v.trim().parse::<f32>().ok())
        .unwrap_or(0.0)
}

fn parse_markup(markup: &str) -> Result<Vec<LayerPage>, ExtractionError> {
    let mut reader = Reader::from_str(markup);

    let mut saw_root = false;
    let mut fonts: HashMap<String, f32> = HashMap::new();
    let mut pages: Vec<LayerPage> = Vec::new();
    let mut lines: Vec<(usize, usize, Option<String>)> = Vec::new();
    let mut page: Option<LayerPage> = None;
    let mut line: Option<OpenLine> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                match e.local_name().as_ref() {
                    b"pdf2xml" => saw_root = true,
                    b"page" => {
                        let number = attr(e, b"number")
                            .and_then(|n| n.parse().ok())
                            .unwrap_or(pages.len() + 1);
                        let p = LayerPage {
                            number,
                            items: Vec::new(),
                        };
                        if is_empty {
                            pages.push(p);
                        } else {
                            page = Some(p);
                        }
                    }
                    b"fontspec" => {
                        if let Some(id) = attr(e, b"id") {
                            fonts.insert(id, num_attr(e, b"size"));
                        }
                    }
                    b"text" if line.is_none() => {
                        let open = OpenLine {
                            top: num_attr(e, b"top"),
                            left: num_attr(e, b"left"),
                            height: num_attr(e, b"height"),
                            font: attr(e, b"font"),
                            text: String::new(),
                        };
                        if !is_empty {
                            line = Some(open);
                        }
                    }
                    b"image" => {
                        if let Some(ref mut p) = page {
                            p.items.push(LayerItem {
                                top: num_attr(e, b"top"),
                                left: num_attr(e, b"left"),
                                height: num_attr(e, b"height"),
                                kind: ItemKind::Image,
                            });
                        }
                    }
                    // <b>, <i>, <a> inside a line carry no structure
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some(ref mut l) = line {
                    let text = t.unescape().map_err(|e| malformed(e.to_string()))?;
                    l.text.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(ref mut l) = line {
                    l.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"text" => {
                    if let (Some(l), Some(p)) = (line.take(), page.as_mut()) {
                        lines.push((pages.len(), p.items.len(), l.font));
                        p.items.push(LayerItem {
                            top: l.top,
                            left: l.left,
                            height: l.height,
                            kind: ItemKind::Line {
                                text: l.text,
                                font_size: 0.0,
                            },
                        });
                    }
                }
                b"page" => {
                    if let Some(p) = page.take() {
                        pages.push(p);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(malformed("missing <pdf2xml> root element"));
    }
    if page.is_some() || line.is_some() {
        return Err(malformed("markup ends inside an open <page>"));
    }

    // fontspec declarations are global and may follow their first use
    for (page_idx, item_idx, font) in lines {
        let size = font.and_then(|id| fonts.get(&id).copied());
        if let ItemKind::Line { font_size, .. } = &mut pages[page_idx].items[item_idx].kind {
            *font_size = size.unwrap_or(0.0);
        }
    }

    Ok(pages)
}

// ── Layout ───────────────────────────────────────────────────────────────────

/// The block currently being filled.
struct OpenBlock {
    node: IntermediateNode,
    heading: bool,
    font_size: f32,
    last_top: f32,
    last_bottom: f32,
}

fn same_size(a: f32, b: f32) -> bool {
    (a - b).abs() < 0.05
}

fn layout_page(mut page: LayerPage, layout: &PdfLayout) -> IntermediateNode {
    page.items
        .sort_by(|a, b| a.top.total_cmp(&b.top).then(a.left.total_cmp(&b.left)));

    let mut out = IntermediateNode::page(page.number);
    let mut open: Option<OpenBlock> = None;

    for item in page.items {
        let (text, font_size) = match item.kind {
            ItemKind::Image => {
                if let Some(block) = open.take() {
                    out.push(block.node);
                }
                out.push(IntermediateNode::image(None));
                continue;
            }
            ItemKind::Line { text, font_size } => (text, font_size),
        };
        if !text.chars().any(is_visible_char) {
            continue;
        }

        let heading = font_size >= layout.heading_font_size;
        let line_height = item.height.max(1.0);
        let bottom = item.top + item.height;

        if let Some(ref mut block) = open {
            if block.heading == heading && same_size(block.font_size, font_size) {
                let same_baseline = (item.top - block.last_top).abs() < line_height * 0.5;
                let gap = item.top - block.last_bottom;
                if same_baseline {
                    block.node.push(IntermediateNode::text_run(" "));
                    block.node.push(IntermediateNode::text_run(text));
                    block.last_bottom = block.last_bottom.max(bottom);
                    continue;
                }
                if gap <= layout.paragraph_gap_ratio * line_height {
                    block.node.push(IntermediateNode::line_break());
                    block.node.push(IntermediateNode::text_run(text));
                    block.last_top = item.top;
                    block.last_bottom = bottom;
                    continue;
                }
            }
        }

        if let Some(block) = open.take() {
            out.push(block.node);
        }
        let node = if heading {
            IntermediateNode::heading(HeadingCue::FontSize(font_size))
        } else {
            IntermediateNode::paragraph()
        };
        open = Some(OpenBlock {
            node: node.with_child(IntermediateNode::text_run(text)),
            heading,
            font_size,
            last_top: item.top,
            last_bottom: bottom,
        });
    }

    if let Some(block) = open {
        out.push(block.node);
    }
    out
}
