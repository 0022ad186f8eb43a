//! EPUB extraction: container → package document → spine → chapters.
//!
//! Reading order comes from the package document's spine and nothing else;
//! the order of entries inside the zip archive is irrelevant.

use super::sniff::SourceDocument;
use super::xhtml;
use super::{DocumentExtractor, Extraction};
use crate::document::DocumentMetadata;
use crate::error::ExtractionError;
use crate::tree::IntermediateNode;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Stateless; one instance serves every EPUB in a batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubExtractor;

impl DocumentExtractor for EpubExtractor {
    fn extract(&self, source: &SourceDocument) -> Result<Extraction, ExtractionError> {
        let file = File::open(&source.path).map_err(|e| ExtractionError::Io {
            path: source.path.clone(),
            source: e,
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| ExtractionError::CorruptArchive {
            detail: e.to_string(),
        })?;
        read_book(&mut archive)
    }
}

/// Extract from any zip source (file or in-memory buffer).
pub fn read_book<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Extraction, ExtractionError> {
    let opf_path = find_package_path(archive)?;
    let opf_dir = match opf_path.rfind('/') {
        Some(i) => &opf_path[..i],
        None => "",
    };

    let opf_bytes = read_entry(archive, &opf_path)?;
    let package = parse_package(&xhtml::decode_document(&opf_bytes), &opf_path)?;
    debug!(
        opf = %opf_path,
        manifest = package.manifest.len(),
        spine = package.spine.len(),
        "package document parsed"
    );

    let mut tree = IntermediateNode::document();
    for (i, idref) in package.spine.iter().enumerate() {
        let number = i + 1;
        let item = package
            .manifest
            .get(idref)
            .ok_or_else(|| ExtractionError::MissingManifestItem {
                idref: idref.clone(),
            })?;
        let full_path = resolve_path(opf_dir, &item.href);

        let chapter = if is_content_document(&item.media_type) {
            let bytes = read_entry(archive, &full_path)?;
            xhtml::parse_chapter(&xhtml::decode_document(&bytes), &full_path, number)?
        } else if item.media_type.starts_with("image/") {
            // the resource must exist even though only a placeholder is emitted
            read_entry(archive, &full_path)?;
            xhtml::image_chapter(number)
        } else {
            warn!(
                path = %full_path,
                media_type = %item.media_type,
                "spine item is not a content document, emitting empty chapter"
            );
            IntermediateNode::chapter(number)
        };
        if xhtml::is_image_only(&chapter) {
            debug!(path = %full_path, "image-only chapter");
        }
        tree.push(chapter);
    }

    Ok(Extraction::Document {
        tree,
        metadata: package.metadata,
    })
}

fn is_content_document(media_type: &str) -> bool {
    matches!(
        media_type,
        "application/xhtml+xml" | "text/html" | "application/xml" | "text/xml"
    )
}

// ── Archive access ───────────────────────────────────────────────────────────

/// Read an archive entry, retrying with the percent-decoded name.
fn read_entry<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>, ExtractionError> {
    let mut candidates = vec![path.to_string()];
    if let Ok(decoded) = percent_encoding::percent_decode_str(path).decode_utf8() {
        if decoded != path {
            candidates.push(decoded.into_owned());
        }
    }

    for name in &candidates {
        match archive.by_name(name) {
            Ok(mut entry) => {
                let mut contents = Vec::new();
                entry
                    .read_to_end(&mut contents)
                    .map_err(|e| ExtractionError::CorruptArchive {
                        detail: format!("{name}: {e}"),
                    })?;
                return Ok(contents);
            }
            Err(ZipError::FileNotFound) => {}
            Err(e) => {
                return Err(ExtractionError::CorruptArchive {
                    detail: format!("{name}: {e}"),
                })
            }
        }
    }

    Err(ExtractionError::MissingResource {
        path: path.to_string(),
    })
}

fn find_package_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String, ExtractionError> {
    match read_entry(archive, CONTAINER_PATH) {
        Ok(bytes) => {
            if let Some(path) = rootfile_path(&xhtml::decode_document(&bytes)) {
                return Ok(path);
            }
            warn!("container.xml names no rootfile, searching for a package document");
        }
        Err(ExtractionError::MissingResource { .. }) => {
            warn!("EPUB has no container.xml, searching for a package document");
        }
        Err(e) => return Err(e),
    }

    archive
        .file_names()
        .find(|n| n.to_ascii_lowercase().ends_with(".opf"))
        .map(str::to_string)
        .ok_or_else(|| ExtractionError::MissingPackage {
            detail: "no rootfile in container.xml and no .opf entry in the archive".into(),
        })
}

/// `rootfile/@full-path` from container.xml, if it can be found.
fn rootfile_path(container: &str) -> Option<String> {
    let mut reader = Reader::from_str(container);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr(e, b"full-path").filter(|p| !p.is_empty()) {
                    return Some(path);
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

/// Join `href` onto the package directory, resolving `.` and `..` segments
/// and dropping any fragment.
fn resolve_path(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut parts: Vec<&str> = if href.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|s| !s.is_empty()).collect()
    };
    for segment in href.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

// ── Package document ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestItem {
    href: String,
    media_type: String,
}

#[derive(Debug, Default)]
struct Package {
    metadata: DocumentMetadata,
    manifest: HashMap<String, ManifestItem>,
    spine: Vec<String>,
}

fn attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_package(content: &str, path: &str) -> Result<Package, ExtractionError> {
    let unparsable = |detail: String| ExtractionError::UnparsablePackage {
        path: path.to_string(),
        detail,
    };

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut package = Package::default();
    let mut saw_package = false;
    let mut in_metadata = false;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| unparsable(format!("at byte {}: {e}", reader.buffer_position())))?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                match e.local_name().as_ref() {
                    b"package" => saw_package = true,
                    b"metadata" => in_metadata = is_start,
                    b"item" => {
                        if let (Some(id), Some(href)) = (attr(e, b"id"), attr(e, b"href")) {
                            let media_type = attr(e, b"media-type").unwrap_or_default();
                            package.manifest.insert(id, ManifestItem { href, media_type });
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attr(e, b"idref") {
                            package.spine.push(idref);
                        }
                    }
                    name if in_metadata && is_start => {
                        field = Some(String::from_utf8_lossy(name).into_owned());
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if field.is_some() {
                    let s = t.unescape().map_err(|e| unparsable(e.to_string()))?;
                    text.push_str(&s);
                }
            }
            Event::CData(t) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"metadata" => in_metadata = false,
                name => {
                    if field.as_deref().map(str::as_bytes) == Some(name) {
                        if let Some(f) = field.take() {
                            let value = text.trim();
                            if !value.is_empty() {
                                package.metadata.set(&f, value.to_string());
                            }
                        }
                    }
                }
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_package {
        return Err(unparsable("no <package> element".into()));
    }
    Ok(package)
}
