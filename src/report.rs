//! CSV serialization of the batch report.
//!
//! Columns are `file,status,detail`, one row per input in discovery order.
//! Fields containing a comma, a double quote or a line break are quoted per
//! RFC 4180, with embedded quotes doubled.

use crate::output::BatchReport;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

pub const HEADER: &str = "file,status,detail";

pub struct ReportWriter;

impl ReportWriter {
    pub fn write_csv(report: &BatchReport, mut out: impl Write) -> io::Result<()> {
        writeln!(out, "{HEADER}")?;
        for outcome in &report.outcomes {
            writeln!(
                out,
                "{},{},{}",
                escape(&outcome.file_name()),
                outcome.status,
                escape(&outcome.report_detail())
            )?;
        }
        out.flush()
    }

    /// Render the whole report as a CSV string.
    pub fn to_csv_string(report: &BatchReport) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = Self::write_csv(report, &mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Write the report next to its final location and rename it into
    /// place, so a reader never sees a half-written file.
    pub fn write_to_path(report: &BatchReport, path: &Path) -> io::Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        Self::write_csv(report, io::BufWriter::new(tmp.as_file_mut()))?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), rows = report.len(), "report written");
        Ok(())
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
