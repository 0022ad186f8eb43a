//! DocBook book export.
//!
//! For `<output>/<stem>.xml` this writes a sibling directory `<output>/<stem>/`
//! holding one `chNNNN.xml` chapter per section and a master `book.xml` that
//! pulls them in through external entities:
//!
//! ```text
//! <!DOCTYPE book PUBLIC "<public id>" "<system id>" [
//!   <!ENTITY ch0000 SYSTEM "ch0000.xml">
//! ]>
//! <book>
//!   <bookinfo>…</bookinfo>
//!   &ch0000;
//! </book>
//! ```
//!
//! The directory is assembled under a temporary name and renamed into place,
//! so a reader sees either the previous book or the complete new one.

use crate::document::{Block, NormalizedDocument, Section};
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_PUBLIC_ID: &str = "-//RIS Dev//DTD DocBook V4.3 -Based Variant V1.1//EN";
pub const DEFAULT_SYSTEM_ID: &str = "http://LOCALHOST/dtd/V1.1/RittDocBook.dtd";

/// DOCTYPE identifiers and `<bookinfo>` overrides.
///
/// `author` and `publisher` fall back to the document metadata when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocBookOptions {
    pub public_id: String,
    pub system_id: String,
    pub publisher: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
}

impl Default for DocBookOptions {
    fn default() -> Self {
        Self {
            public_id: DEFAULT_PUBLIC_ID.to_string(),
            system_id: DEFAULT_SYSTEM_ID.to_string(),
            publisher: None,
            author: None,
            isbn: None,
        }
    }
}

impl DocBookOptions {
    /// DOCTYPE literals cannot carry a double quote.
    pub fn validate(&self) -> Result<(), String> {
        for (name, id) in [("public id", &self.public_id), ("system id", &self.system_id)] {
            if id.trim().is_empty() || id.contains('"') {
                return Err(format!("DocBook {name} must be non-empty and free of '\"'"));
            }
        }
        Ok(())
    }
}

/// Entity and file name of the chapter at `index` (0-based).
pub fn chapter_name(index: usize) -> String {
    format!("ch{index:04}")
}

/// Write the DocBook book for `doc` into `<output_dir>/<stem>/`, replacing any
/// previous export there. Returns the book directory.
pub fn export_book(
    doc: &NormalizedDocument,
    stem: &str,
    output_dir: &Path,
    options: &DocBookOptions,
) -> io::Result<PathBuf> {
    let target = output_dir.join(stem);
    let staging = tempfile::Builder::new()
        .prefix(".docbook-")
        .tempdir_in(output_dir)?;

    let mut names = Vec::with_capacity(doc.sections.len());
    for (i, section) in doc.sections.iter().enumerate() {
        let name = chapter_name(i);
        std::fs::write(
            staging.path().join(format!("{name}.xml")),
            chapter_xml(section)?,
        )?;
        names.push(name);
    }
    std::fs::write(
        staging.path().join("book.xml"),
        book_xml(doc, stem, &names, options),
    )?;

    if target.exists() {
        std::fs::remove_dir_all(&target)?;
    }
    std::fs::rename(staging.path(), &target)?;
    debug!(dir = %target.display(), chapters = names.len(), "DocBook export written");
    Ok(target)
}

/// One `<chapter>`: the section title, then its blocks. A leading heading that
/// repeats the title is not emitted twice; other headings become
/// `<bridgehead>`. Images have no DocBook counterpart here and are omitted.
pub fn chapter_xml(section: &Section) -> io::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("chapter")))?;
    text_element(&mut writer, "title", &section.title)?;

    for (i, block) in section.blocks.iter().enumerate() {
        match block {
            Block::Heading { text, .. } if i == 0 && *text == section.title => {}
            Block::Heading { text, .. } => text_element(&mut writer, "bridgehead", text)?,
            Block::Paragraph { text } => text_element(&mut writer, "para", text)?,
            Block::Image { .. } => {}
        }
    }

    writer.write_event(Event::End(BytesEnd::new("chapter")))?;
    let mut xml = String::from_utf8(writer.into_inner())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    xml.push('\n');
    Ok(xml)
}

/// The master `book.xml`.
pub fn book_xml(
    doc: &NormalizedDocument,
    stem: &str,
    chapters: &[String],
    options: &DocBookOptions,
) -> String {
    let meta = &doc.metadata;
    let title = meta.title.as_deref().unwrap_or(stem);
    let author = options.author.clone().or_else(|| {
        (!meta.creators.is_empty()).then(|| meta.creators.join(", "))
    });
    let publisher = options.publisher.as_deref().or(meta.publisher.as_deref());

    // writing into a String cannot fail
    let mut out = String::new();
    let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(out, r#"<!DOCTYPE book PUBLIC "{}""#, options.public_id);
    let _ = writeln!(out, r#"  "{}" ["#, options.system_id);
    for name in chapters {
        let _ = writeln!(out, r#"  <!ENTITY {name} SYSTEM "{name}.xml">"#);
    }
    let _ = writeln!(out, "]>");
    let _ = writeln!(out, "<book>");
    let _ = writeln!(out, "  <bookinfo>");
    let _ = writeln!(out, "    <title>{}</title>", escape(title));
    if let Some(author) = &author {
        let _ = writeln!(out, "    <author>{}</author>", escape(author.as_str()));
    }
    if let Some(isbn) = &options.isbn {
        let _ = writeln!(out, "    <isbn>{}</isbn>", escape(isbn.as_str()));
    }
    if let Some(publisher) = publisher {
        let _ = writeln!(out, "    <publisher>{}</publisher>", escape(publisher));
    }
    let _ = writeln!(out, "  </bookinfo>");
    for name in chapters {
        let _ = writeln!(out, "  &{name};");
    }
    let _ = writeln!(out, "</book>");
    out
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> io::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}
