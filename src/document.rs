//! Canonical, format-agnostic document model and its XML form.
//!
//! ```text
//! <document source="book.epub" format="epub" generated="2025-01-01T00:00:00Z">
//!   <metadata>…</metadata>            (optional)
//!   <section title="…">
//!     <heading level="1">…</heading>
//!     <paragraph>…</paragraph>
//!     <image ref="img-0001"/>
//!   </section>
//! </document>
//! ```
//!
//! The schema carries no layout information. Apart from the `format`
//! attribute, a document produced from a PDF is indistinguishable from one
//! produced from an EPUB.

use crate::error::NormalizeError;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source format declared on the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Epub,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Epub => "epub",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(DocumentFormat::Pdf),
            "epub" => Ok(DocumentFormat::Epub),
            other => Err(format!("unknown format '{other}'")),
        }
    }
}

/// Bibliographic metadata. Populated from the EPUB package document; empty
/// for PDF input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub creators: Vec<String>,
    pub language: Option<String>,
    pub publisher: Option<String>,
    pub identifier: Option<String>,
    pub date: Option<String>,
    pub subject: Option<String>,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.creators.is_empty()
            && self.language.is_none()
            && self.publisher.is_none()
            && self.identifier.is_none()
            && self.date.is_none()
            && self.subject.is_none()
    }

    /// `(element name, value)` pairs in schema order.
    fn entries(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::new();
        if let Some(ref t) = self.title {
            out.push(("title", t.as_str()));
        }
        for c in &self.creators {
            out.push(("creator", c.as_str()));
        }
        let rest = [
            ("language", &self.language),
            ("publisher", &self.publisher),
            ("identifier", &self.identifier),
            ("date", &self.date),
            ("subject", &self.subject),
        ];
        for (name, value) in rest {
            if let Some(v) = value {
                out.push((name, v.as_str()));
            }
        }
        out
    }

    /// Record a value by element name. Single-valued fields keep the first
    /// value seen; returns false for names outside the schema.
    pub(crate) fn set(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "creator" => {
                self.creators.push(value);
                return true;
            }
            "title" => &mut self.title,
            "language" => &mut self.language,
            "publisher" => &mut self.publisher,
            "identifier" => &mut self.identifier,
            "date" => &mut self.date,
            "subject" => &mut self.subject,
            _ => return false,
        };
        slot.get_or_insert(value);
        true
    }

    /// Apply `f` to every value, dropping the ones it empties.
    pub(crate) fn map_values(self, f: impl Fn(&str) -> String) -> Self {
        let keep = |v: Option<String>| v.map(|s| f(&s)).filter(|s| !s.is_empty());
        Self {
            title: keep(self.title),
            creators: self
                .creators
                .iter()
                .map(|c| f(c.as_str()))
                .filter(|c| !c.is_empty())
                .collect(),
            language: keep(self.language),
            publisher: keep(self.publisher),
            identifier: keep(self.identifier),
            date: keep(self.date),
            subject: keep(self.subject),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    Image { reference: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDocument {
    /// File name of the source (no directory part).
    pub source: String,
    pub format: DocumentFormat,
    pub generated: DateTime<Utc>,
    pub metadata: DocumentMetadata,
    pub sections: Vec<Section>,
}

impl NormalizedDocument {
    /// Total number of blocks over all sections.
    pub fn block_count(&self) -> usize {
        self.sections.iter().map(|s| s.blocks.len()).sum()
    }

    /// Serialise to the canonical XML form (UTF-8, 2-space indent).
    pub fn to_xml(&self) -> Result<String, NormalizeError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let generated = self.generated.to_rfc3339_opts(SecondsFormat::Secs, true);
        let root = BytesStart::new("document").with_attributes([
            ("source", self.source.as_str()),
            ("format", self.format.as_str()),
            ("generated", generated.as_str()),
        ]);
        emit(&mut writer, Event::Start(root))?;

        if !self.metadata.is_empty() {
            emit(&mut writer, Event::Start(BytesStart::new("metadata")))?;
            for (name, value) in self.metadata.entries() {
                text_element(&mut writer, BytesStart::new(name), value)?;
            }
            emit(&mut writer, Event::End(BytesEnd::new("metadata")))?;
        }

        for section in &self.sections {
            let start =
                BytesStart::new("section").with_attributes([("title", section.title.as_str())]);
            if section.blocks.is_empty() {
                emit(&mut writer, Event::Empty(start))?;
                continue;
            }
            emit(&mut writer, Event::Start(start))?;
            for block in &section.blocks {
                match block {
                    Block::Heading { level, text } => {
                        let level = level.to_string();
                        let start =
                            BytesStart::new("heading").with_attributes([("level", level.as_str())]);
                        text_element(&mut writer, start, text)?;
                    }
                    Block::Paragraph { text } => {
                        text_element(&mut writer, BytesStart::new("paragraph"), text)?;
                    }
                    Block::Image { reference } => {
                        let start =
                            BytesStart::new("image").with_attributes([("ref", reference.as_str())]);
                        emit(&mut writer, Event::Empty(start))?;
                    }
                }
            }
            emit(&mut writer, Event::End(BytesEnd::new("section")))?;
        }

        emit(&mut writer, Event::End(BytesEnd::new("document")))?;

        let mut xml = String::from_utf8(writer.into_inner())
            .map_err(|e| NormalizeError::Serialize(e.to_string()))?;
        xml.push('\n');
        Ok(xml)
    }

    /// Parse a document previously produced by [`to_xml`](Self::to_xml).
    ///
    /// Anything outside the canonical schema is rejected, which makes this a
    /// well-formedness and schema check for written output.
    pub fn from_xml(xml: &str) -> Result<NormalizedDocument, NormalizeError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut root: Option<(String, DocumentFormat, DateTime<Utc>)> = None;
        let mut metadata = DocumentMetadata::default();
        let mut sections: Vec<Section> = Vec::new();
        let mut current: Option<Section> = None;
        let mut target: Option<TextTarget> = None;
        let mut buf = String::new();
        let mut in_metadata = false;
        let mut depth = 0usize;

        loop {
            let event = reader.read_event().map_err(|e| {
                NormalizeError::Malformed(format!(
                    "at byte {}: {e}",
                    reader.buffer_position()
                ))
            })?;
            match event {
                Event::Start(e) => {
                    depth += 1;
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match name.as_str() {
                        "document" if depth == 1 => root = Some(parse_root(&e)?),
                        "metadata" if depth == 2 => in_metadata = true,
                        "section" if depth == 2 => {
                            current = Some(Section {
                                title: required_attr(&e, "title")?,
                                blocks: Vec::new(),
                            })
                        }
                        "heading" if current.is_some() => {
                            let level: u8 = required_attr(&e, "level")?
                                .parse()
                                .map_err(|_| malformed("heading level is not a number"))?;
                            if !(1..=6).contains(&level) {
                                return Err(malformed(&format!("heading level {level} out of range")));
                            }
                            target = Some(TextTarget::Heading(level));
                        }
                        "paragraph" if current.is_some() => target = Some(TextTarget::Paragraph),
                        _ if in_metadata && depth == 3 => target = Some(TextTarget::Meta(name)),
                        _ => return Err(malformed(&format!("unexpected element <{name}>"))),
                    }
                    buf.clear();
                }
                Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match (name.as_str(), current.as_mut()) {
                        ("section", None) if depth == 1 => sections.push(Section {
                            title: required_attr(&e, "title")?,
                            blocks: Vec::new(),
                        }),
                        ("image", Some(section)) => section.blocks.push(Block::Image {
                            reference: required_attr(&e, "ref")?,
                        }),
                        ("metadata", None) if depth == 1 => {}
                        // Empty text elements are legal and carry empty text.
                        ("paragraph", Some(section)) => section.blocks.push(Block::Paragraph {
                            text: String::new(),
                        }),
                        _ => return Err(malformed(&format!("unexpected element <{name}/>"))),
                    }
                }
                Event::Text(e) => {
                    let text = e
                        .unescape()
                        .map_err(|err| NormalizeError::Malformed(err.to_string()))?;
                    if target.is_none() {
                        return Err(malformed(&format!("stray text '{}'", text.trim())));
                    }
                    buf.push_str(&text);
                }
                Event::CData(e) => {
                    if target.is_none() {
                        return Err(malformed("stray CDATA"));
                    }
                    buf.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
                Event::End(e) => {
                    depth = depth.saturating_sub(1);
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    match name.as_str() {
                        "section" if depth == 1 => {
                            if let Some(section) = current.take() {
                                sections.push(section);
                            }
                        }
                        "metadata" if depth == 1 => in_metadata = false,
                        _ => {
                            if let Some(t) = target.take() {
                                let text = std::mem::take(&mut buf);
                                match t {
                                    TextTarget::Heading(level) => {
                                        push_block(&mut current, Block::Heading { level, text })?
                                    }
                                    TextTarget::Paragraph => {
                                        push_block(&mut current, Block::Paragraph { text })?
                                    }
                                    TextTarget::Meta(meta) => {
                                        if !metadata.set(&meta, text) {
                                            return Err(malformed(&format!(
                                                "unknown metadata field <{meta}>"
                                            )));
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                Event::Eof => break,
                // Declarations, comments and processing instructions carry no content.
                _ => {}
            }
        }

        if depth != 0 {
            return Err(malformed("unexpected end of document"));
        }
        let (source, format, generated) = root.ok_or_else(|| malformed("missing <document> root"))?;

        Ok(NormalizedDocument {
            source,
            format,
            generated,
            metadata,
            sections,
        })
    }
}

enum TextTarget {
    Heading(u8),
    Paragraph,
    Meta(String),
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), NormalizeError> {
    writer
        .write_event(event)
        .map_err(|e| NormalizeError::Serialize(e.to_string()))
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    start: BytesStart<'_>,
    text: &str,
) -> Result<(), NormalizeError> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(end))
}

fn malformed(detail: &str) -> NormalizeError {
    NormalizeError::Malformed(detail.to_string())
}

fn push_block(current: &mut Option<Section>, block: Block) -> Result<(), NormalizeError> {
    match current {
        Some(section) => {
            section.blocks.push(block);
            Ok(())
        }
        None => Err(malformed("block outside of a section")),
    }
}

fn required_attr(e: &BytesStart<'_>, name: &str) -> Result<String, NormalizeError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| NormalizeError::Malformed(err.to_string()))?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return attr
                .unescape_value()
                .map(|v| v.into_owned())
                .map_err(|err| NormalizeError::Malformed(err.to_string()));
        }
    }
    Err(malformed(&format!(
        "<{}> is missing attribute '{name}'",
        String::from_utf8_lossy(e.local_name().as_ref())
    )))
}

fn parse_root(
    e: &BytesStart<'_>,
) -> Result<(String, DocumentFormat, DateTime<Utc>), NormalizeError> {
    let source = required_attr(e, "source")?;
    let format = required_attr(e, "format")?
        .parse::<DocumentFormat>()
        .map_err(NormalizeError::Malformed)?;
    let generated = DateTime::parse_from_rfc3339(&required_attr(e, "generated")?)
        .map_err(|err| NormalizeError::Malformed(format!("generated: {err}")))?
        .with_timezone(&Utc);
    Ok((source, format, generated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> NormalizedDocument {
        NormalizedDocument {
            source: "a&b.epub".into(),
            format: DocumentFormat::Epub,
            generated: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            metadata: DocumentMetadata {
                title: Some("Tales <Vol. 1>".into()),
                creators: vec!["Ann".into(), "Bo".into()],
                language: Some("en".into()),
                ..Default::default()
            },
            sections: vec![
                Section {
                    title: "Opening \"quote\"".into(),
                    blocks: vec![
                        Block::Heading {
                            level: 1,
                            text: "Opening".into(),
                        },
                        Block::Paragraph {
                            text: "Fish & chips < 5 €".into(),
                        },
                        Block::Image {
                            reference: "img-0001".into(),
                        },
                    ],
                },
                Section {
                    title: "Section 2".into(),
                    blocks: vec![],
                },
            ],
        }
    }

    #[test]
    fn xml_round_trip_preserves_structure_and_text() {
        let doc = sample();
        let xml = doc.to_xml().unwrap();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("format=\"epub\""));
        assert!(xml.contains("generated=\"2024-05-01T12:00:00Z\""));
        assert!(xml.contains("Fish &amp; chips &lt; 5 €"));

        let parsed = NormalizedDocument::from_xml(&xml).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn metadata_block_is_omitted_when_empty() {
        let mut doc = sample();
        doc.metadata = DocumentMetadata::default();
        let xml = doc.to_xml().unwrap();
        assert!(!xml.contains("<metadata>"));
        assert_eq!(NormalizedDocument::from_xml(&xml).unwrap().metadata, doc.metadata);
    }

    #[test]
    fn rejects_unknown_elements() {
        let xml = r#"<document source="x.pdf" format="pdf" generated="2024-01-01T00:00:00Z">
            <section title="s"><table/></section></document>"#;
        let err = NormalizedDocument::from_xml(xml).unwrap_err();
        assert!(err.to_string().contains("table"), "got: {err}");
    }

    #[test]
    fn rejects_truncated_documents() {
        let xml = r#"<document source="x.pdf" format="pdf" generated="2024-01-01T00:00:00Z">
            <section title="s"><paragraph>hi</paragraph>"#;
        assert!(NormalizedDocument::from_xml(xml).is_err());
    }

    #[test]
    fn rejects_bad_heading_level() {
        let xml = r#"<document source="x.pdf" format="pdf" generated="2024-01-01T00:00:00Z">
            <section title="s"><heading level="9">h</heading></section></document>"#;
        assert!(NormalizedDocument::from_xml(xml).is_err());
    }

    #[test]
    fn format_parses_from_str() {
        assert_eq!("pdf".parse::<DocumentFormat>(), Ok(DocumentFormat::Pdf));
        assert!("docx".parse::<DocumentFormat>().is_err());
    }
}
