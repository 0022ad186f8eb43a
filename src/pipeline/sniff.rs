//! Format detection from magic bytes, with the extension as a tie-breaker.
//!
//! Only a short prefix of the file is read. The ZIP local-file header is
//! inspected far enough to see whether the archive starts with the OCF
//! `mimetype` entry, which is how an EPUB announces itself.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF-";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EPUB_MIMETYPE: &[u8] = b"application/epub+zip";

/// Local-file header size before the variable-length name.
const ZIP_HEADER_LEN: usize = 30;
const PREFIX_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Epub,
    Unsupported,
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Epub => "epub",
            SourceFormat::Unsupported => "unsupported",
        })
    }
}

/// An input file as classified by [`sniff`].
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub byte_size: u64,
    /// Text encoding of the container: UTF-8 for EPUB (OCF requires it),
    /// `None` for the binary PDF container.
    pub encoding: Option<&'static encoding_rs::Encoding>,
    /// Why the file is [`SourceFormat::Unsupported`].
    pub reason: Option<String>,
}

impl SourceDocument {
    /// File name used in reports and the `source=` attribute.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    fn unsupported(path: &Path, byte_size: u64, reason: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            format: SourceFormat::Unsupported,
            byte_size,
            encoding: None,
            reason: Some(reason.into()),
        }
    }
}

/// Classify `path` as PDF, EPUB or unsupported. Never fails: I/O problems
/// produce an unsupported document carrying the reason.
pub fn sniff(path: &Path) -> SourceDocument {
    let byte_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) => return SourceDocument::unsupported(path, 0, format!("cannot stat file: {e}")),
    };

    let prefix = match read_prefix(path) {
        Ok(p) => p,
        Err(e) => {
            return SourceDocument::unsupported(path, byte_size, format!("cannot read file: {e}"))
        }
    };

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let doc = classify(path, byte_size, &prefix, &ext);
    debug!(path = %path.display(), format = %doc.format, "sniffed");
    doc
}

fn read_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(PREFIX_LEN);
    file.take(PREFIX_LEN as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

fn classify(path: &Path, byte_size: u64, prefix: &[u8], ext: &str) -> SourceDocument {
    let known = |format, encoding| SourceDocument {
        path: path.to_path_buf(),
        format,
        byte_size,
        encoding,
        reason: None,
    };

    if prefix.starts_with(PDF_MAGIC) {
        return known(SourceFormat::Pdf, None);
    }

    if prefix.starts_with(ZIP_MAGIC) {
        if starts_with_epub_mimetype(prefix) || ext == "epub" {
            return known(SourceFormat::Epub, Some(encoding_rs::UTF_8));
        }
        return SourceDocument::unsupported(
            path,
            byte_size,
            "zip archive without an EPUB mimetype entry",
        );
    }

    if prefix.is_empty() {
        return SourceDocument::unsupported(path, byte_size, "file is empty");
    }

    let reason = match ext {
        "pdf" => "has .pdf extension but no %PDF header".to_string(),
        "epub" => "has .epub extension but is not a zip archive (corrupt archive)".to_string(),
        "" => "no recognised file signature".to_string(),
        other => format!("no recognised file signature (extension .{other})"),
    };
    SourceDocument::unsupported(path, byte_size, reason)
}

/// True when the first local-file entry is `mimetype` holding the EPUB type.
fn starts_with_epub_mimetype(prefix: &[u8]) -> bool {
    if prefix.len() < ZIP_HEADER_LEN {
        return false;
    }
    let name_len = u16::from_le_bytes([prefix[26], prefix[27]]) as usize;
    let extra_len = u16::from_le_bytes([prefix[28], prefix[29]]) as usize;
    let name_end = ZIP_HEADER_LEN + name_len;
    if prefix.get(ZIP_HEADER_LEN..name_end) != Some(b"mimetype".as_slice()) {
        return false;
    }
    let data_start = name_end + extra_len;
    prefix
        .get(data_start..)
        .is_some_and(|data| data.starts_with(EPUB_MIMETYPE))
}
