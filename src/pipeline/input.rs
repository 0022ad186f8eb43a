//! Input discovery: list a directory in deterministic order.
//!
//! Every regular file gets a report row, whatever its name or extension, so
//! nothing is filtered here except subdirectories; classification is the
//! sniffer's job. Symlinks count when they point at a regular file. Sorting by
//! file name makes the discovery order, and with it the report order and
//! output-name collision handling, independent of the filesystem.

use crate::error::BatchError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Regular files directly inside `dir`, sorted by file name.
pub async fn discover_inputs(dir: &Path) -> Result<Vec<PathBuf>, BatchError> {
    let meta = tokio::fs::metadata(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BatchError::InputDirNotFound {
                path: dir.to_path_buf(),
            }
        } else {
            BatchError::InputDirUnreadable {
                path: dir.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !meta.is_dir() {
        return Err(BatchError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let unreadable = |source| BatchError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => files.push(path),
            Ok(_) => debug!(path = %path.display(), "skipping non-file entry"),
            // dangling symlink: still an input the user will expect a row for
            Err(_) => files.push(path),
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    info!(dir = %dir.display(), files = files.len(), "discovered inputs");
    Ok(files)
}
