//! XHTML content documents → chapter nodes.
//!
//! Content documents are parsed with html5ever rather than an XML reader:
//! EPUBs in the wild carry `<br>` without a slash, HTML named entities and
//! stray end tags, and the HTML tree builder recovers from all of them the way
//! a reading system does. [`DomSink`] collects the parse into a small `Rc`
//! tree, which is then flattened into the block vocabulary.
//!
//! ## Flattening
//!
//! Headings and paragraph-like elements open a block. Structural containers
//! (`div`, `section`, lists, tables) only close whatever block is open. Every
//! other element is inline and contributes its text to the open block. Text
//! with no open block starts an implicit paragraph that lasts until the next
//! block boundary, so `<div><span>a</span> b</div>` is one paragraph.

use crate::error::ExtractionError;
use crate::tree::{HeadingCue, IntermediateNode, NodeKind};
use encoding_rs::{Encoding, UTF_8};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::tree_builder::{ElementFlags, NodeOrText, QuirksMode, TreeSink};
use html5ever::{parse_document, Attribute, ParseOpts, QualName};
use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Decode raw content-document bytes: BOM first, then the XML declaration's
/// encoding label, then UTF-8.
pub fn decode_document(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    let encoding = declared_encoding(bytes)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Encoding label from `<?xml … encoding="…"?>` in the first 100 bytes.
fn declared_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];
    let start = prefix.windows(5).position(|w| w == b"<?xml")?;
    let decl = &prefix[start..];
    let decl = &decl[..decl.windows(2).position(|w| w == b"?>").unwrap_or(decl.len())];
    let pos = decl
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let rest = &decl[pos + 9..];
    let quote = *rest.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let end = rest[1..].iter().position(|&b| b == quote)? + 1;
    std::str::from_utf8(&rest[1..end]).ok()
}

// ── DOM ──────────────────────────────────────────────────────────────────────

type Handle = Rc<Node>;

enum NodeData {
    Document,
    Element {
        name: QualName,
        attrs: RefCell<Vec<Attribute>>,
    },
    Text(RefCell<String>),
    /// Comments, processing instructions.
    Other,
}

struct Node {
    data: NodeData,
    parent: RefCell<Option<Weak<Node>>>,
    children: RefCell<Vec<Handle>>,
}

impl Node {
    fn new(data: NodeData) -> Handle {
        Rc::new(Node {
            data,
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
        })
    }

    fn text(text: &str) -> Handle {
        Node::new(NodeData::Text(RefCell::new(text.to_string())))
    }

    fn attr(&self, local: &str) -> Option<String> {
        match self.data {
            NodeData::Element { ref attrs, .. } => attrs
                .borrow()
                .iter()
                .find(|a| &*a.name.local == local)
                .map(|a| a.value.to_string()),
            _ => None,
        }
    }
}

fn parent_and_index(target: &Handle) -> Option<(Handle, usize)> {
    let parent = target.parent.borrow().as_ref()?.upgrade()?;
    let index = parent
        .children
        .borrow()
        .iter()
        .position(|c| Rc::ptr_eq(c, target))?;
    Some((parent, index))
}

fn detach(target: &Handle) {
    if let Some((parent, index)) = parent_and_index(target) {
        parent.children.borrow_mut().remove(index);
    }
    target.parent.replace(None);
}

fn append_node(parent: &Handle, child: Handle) {
    child.parent.replace(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// html5ever tree sink building an `Rc` DOM.
///
/// html5ever's `TreeSink` takes `&self` everywhere, so nodes carry their
/// mutable parts in `RefCell`s.
struct DomSink {
    document: Handle,
}

impl Default for DomSink {
    fn default() -> Self {
        Self {
            document: Node::new(NodeData::Document),
        }
    }
}

static NO_NAME: QualName = QualName {
    prefix: None,
    ns: html5ever::ns!(),
    local: html5ever::local_name!(""),
};

impl TreeSink for DomSink {
    type Handle = Handle;
    type Output = Handle;
    type ElemName<'a>
        = &'a QualName
    where
        Self: 'a;

    fn finish(self) -> Handle {
        self.document
    }

    fn parse_error(&self, _msg: Cow<'static, str>) {}

    fn get_document(&self) -> Handle {
        self.document.clone()
    }

    fn elem_name<'a>(&'a self, target: &'a Handle) -> &'a QualName {
        match target.data {
            NodeData::Element { ref name, .. } => name,
            _ => &NO_NAME,
        }
    }

    fn create_element(&self, name: QualName, attrs: Vec<Attribute>, _flags: ElementFlags) -> Handle {
        Node::new(NodeData::Element {
            name,
            attrs: RefCell::new(attrs),
        })
    }

    fn create_comment(&self, _text: StrTendril) -> Handle {
        Node::new(NodeData::Other)
    }

    fn create_pi(&self, _target: StrTendril, _data: StrTendril) -> Handle {
        Node::new(NodeData::Other)
    }

    fn append(&self, parent: &Handle, child: NodeOrText<Handle>) {
        match child {
            NodeOrText::AppendNode(node) => append_node(parent, node),
            NodeOrText::AppendText(text) => {
                if let Some(last) = parent.children.borrow().last() {
                    if let NodeData::Text(ref existing) = last.data {
                        existing.borrow_mut().push_str(&text);
                        return;
                    }
                }
                append_node(parent, Node::text(&text));
            }
        }
    }

    fn append_based_on_parent_node(
        &self,
        element: &Handle,
        prev_element: &Handle,
        child: NodeOrText<Handle>,
    ) {
        let has_parent = element
            .parent
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some();
        if has_parent {
            self.append_before_sibling(element, child);
        } else {
            self.append(prev_element, child);
        }
    }

    fn append_doctype_to_document(
        &self,
        _name: StrTendril,
        _public_id: StrTendril,
        _system_id: StrTendril,
    ) {
    }

    fn get_template_contents(&self, target: &Handle) -> Handle {
        target.clone()
    }

    fn same_node(&self, x: &Handle, y: &Handle) -> bool {
        Rc::ptr_eq(x, y)
    }

    fn set_quirks_mode(&self, _mode: QuirksMode) {}

    fn append_before_sibling(&self, sibling: &Handle, new_node: NodeOrText<Handle>) {
        let Some((parent, index)) = parent_and_index(sibling) else {
            return;
        };
        let child = match new_node {
            NodeOrText::AppendText(text) => {
                if index > 0 {
                    if let NodeData::Text(ref existing) = parent.children.borrow()[index - 1].data {
                        existing.borrow_mut().push_str(&text);
                        return;
                    }
                }
                Node::text(&text)
            }
            NodeOrText::AppendNode(node) => {
                detach(&node);
                node
            }
        };
        child.parent.replace(Some(Rc::downgrade(&parent)));
        parent.children.borrow_mut().insert(index, child);
    }

    fn add_attrs_if_missing(&self, target: &Handle, attrs: Vec<Attribute>) {
        if let NodeData::Element {
            attrs: ref existing,
            ..
        } = target.data
        {
            let mut existing = existing.borrow_mut();
            for attr in attrs {
                if !existing.iter().any(|a| a.name == attr.name) {
                    existing.push(attr);
                }
            }
        }
    }

    fn remove_from_parent(&self, target: &Handle) {
        detach(target);
    }

    fn reparent_children(&self, node: &Handle, new_parent: &Handle) {
        let children = std::mem::take(&mut *node.children.borrow_mut());
        for child in &children {
            child.parent.replace(Some(Rc::downgrade(new_parent)));
        }
        new_parent.children.borrow_mut().extend(children);
    }
}

// ── Element roles ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Heading(u8),
    Paragraph,
    /// Ends any open block without producing one itself.
    Container,
    Image,
    Break,
    Skipped,
    Inline,
}

fn element_role(local: &str) -> Role {
    match local {
        "h1" => Role::Heading(1),
        "h2" => Role::Heading(2),
        "h3" => Role::Heading(3),
        "h4" => Role::Heading(4),
        "h5" => Role::Heading(5),
        "h6" => Role::Heading(6),

        "p" | "li" | "dt" | "dd" | "pre" | "td" | "th" | "caption" | "figcaption"
        | "blockquote" => Role::Paragraph,

        "html" | "body" | "div" | "section" | "article" | "aside" | "nav" | "header"
        | "footer" | "main" | "figure" | "ul" | "ol" | "dl" | "table" | "thead" | "tbody"
        | "tfoot" | "tr" | "hr" | "address" | "hgroup" | "details" | "summary" => {
            Role::Container
        }

        // the tree builder renames a stray HTML <image> to <img>; SVG keeps it
        "img" | "image" => Role::Image,
        "br" => Role::Break,
        "head" | "script" | "style" | "noscript" | "template" => Role::Skipped,
        _ => Role::Inline,
    }
}

// ── Flattening ───────────────────────────────────────────────────────────────

struct ChapterBuilder {
    chapter: IntermediateNode,
    /// Block collecting text until the next block boundary.
    open: Option<IntermediateNode>,
}

impl ChapterBuilder {
    fn new(number: usize) -> Self {
        Self {
            chapter: IntermediateNode::chapter(number),
            open: None,
        }
    }

    /// Close the open block; blocks whose text cleans up to nothing vanish.
    fn flush(&mut self) {
        if let Some(block) = self.open.take() {
            if block.has_content() {
                self.chapter.push(block);
            }
        }
    }

    fn walk(&mut self, node: &Handle) {
        match node.data {
            NodeData::Document => self.children(node),
            NodeData::Element { ref name, .. } => self.element(node, &name.local),
            NodeData::Text(ref text) => self.text(&text.borrow()),
            NodeData::Other => {}
        }
    }

    fn children(&mut self, node: &Handle) {
        for child in node.children.borrow().iter() {
            self.walk(child);
        }
    }

    fn element(&mut self, node: &Handle, local: &str) {
        match element_role(local) {
            Role::Heading(level) => {
                self.flush();
                self.open = Some(IntermediateNode::heading(HeadingCue::Level(level)));
                self.children(node);
                self.flush();
            }
            Role::Paragraph => {
                self.flush();
                self.open = Some(IntermediateNode::paragraph());
                self.children(node);
                self.flush();
            }
            Role::Container => {
                self.flush();
                self.children(node);
                self.flush();
            }
            Role::Image => {
                self.flush();
                self.chapter.push(IntermediateNode::image(node.attr("alt")));
            }
            Role::Break => {
                if let Some(ref mut block) = self.open {
                    block.push(IntermediateNode::line_break());
                }
            }
            Role::Skipped => {}
            Role::Inline => self.children(node),
        }
    }

    fn text(&mut self, text: &str) {
        match self.open {
            Some(ref mut block) => block.push(IntermediateNode::text_run(text)),
            None if text.trim().is_empty() => {}
            None => {
                self.open = Some(
                    IntermediateNode::paragraph().with_child(IntermediateNode::text_run(text)),
                );
            }
        }
    }

    fn finish(mut self) -> IntermediateNode {
        self.flush();
        self.chapter
    }
}

/// Parse one content document into a `Chapter` node numbered `number`.
///
/// Markup errors are recovered from, never reported. A document holding NUL
/// characters is binary data under a content-document media type and is
/// rejected; `path` only appears in that error.
pub fn parse_chapter(
    content: &str,
    path: &str,
    number: usize,
) -> Result<IntermediateNode, ExtractionError> {
    if let Some(pos) = content.find('\0') {
        return Err(ExtractionError::MalformedContent {
            path: path.to_string(),
            detail: format!("binary data at byte {pos}"),
        });
    }

    let document = parse_document(DomSink::default(), ParseOpts::default()).one(content);

    let mut builder = ChapterBuilder::new(number);
    builder.walk(&document);
    Ok(builder.finish())
}

/// Chapter holding a single image placeholder, for image spine items.
pub fn image_chapter(number: usize) -> IntermediateNode {
    IntermediateNode::chapter(number).with_child(IntermediateNode::image(None))
}

/// True when every block in the chapter is an image placeholder.
pub fn is_image_only(chapter: &IntermediateNode) -> bool {
    !chapter.children.is_empty()
        && chapter
            .children
            .iter()
            .all(|c| c.kind == NodeKind::ImagePlaceholder)
}
