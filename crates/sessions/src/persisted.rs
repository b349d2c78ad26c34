//! Discovery of pairing material left on disk by earlier runs.

use std::path::{Path, PathBuf};

use crate::session_key::validate_session_key;

/// A session directory found under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedDir {
    pub session_key: String,
    pub path: PathBuf,
}

/// List `<data_dir>/<prefix><key>` directories, sorted by key.
///
/// A missing data directory is treated as empty.  Entries whose suffix is
/// not a valid session key are skipped.
pub fn scan(data_dir: &Path, prefix: &str) -> std::io::Result<Vec<PersistedDir>> {
    let reader = match std::fs::read_dir(data_dir) {
        Ok(r) => r,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for dirent in reader {
        let dirent = dirent?;
        if !dirent.file_type()?.is_dir() {
            continue;
        }
        let name = dirent.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(key) = name.strip_prefix(prefix) else {
            continue;
        };
        if validate_session_key(key).is_err() {
            tracing::debug!(dir = %name, "skipping directory with invalid session key");
            continue;
        }
        found.push(PersistedDir {
            session_key: key.to_owned(),
            path: dirent.path(),
        });
    }
    found.sort_by(|a, b| a.session_key.cmp(&b.session_key));
    Ok(found)
}
