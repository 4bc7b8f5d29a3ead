//! Persisted run state
//!
//! Small JSON documents under the state directory. A missing file means
//! "nothing recorded yet"; an unreadable or corrupt one is an error so that
//! the operator learns about it instead of the runner guessing.

pub mod credentials;
pub mod record;

pub use credentials::{CredentialFile, CredentialStore};
pub use record::RunRecordStore;

use crate::error::{OrchestratorError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "State file not present");
            return Ok(None);
        }
        Err(e) => return Err(OrchestratorError::state(path, e)),
    };

    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| OrchestratorError::StateCorrupt {
            path: path.to_path_buf(),
            source,
        })
}

/// Write through a temp file in the same directory, then rename over `path`
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| OrchestratorError::state(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| OrchestratorError::state(path, e))?;
    let body = serde_json::to_vec_pretty(value).map_err(|source| OrchestratorError::StateCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.write_all(&body)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| OrchestratorError::state(path, e))?;
    tmp.persist(path)
        .map_err(|e| OrchestratorError::state(path, e.error))?;

    debug!(path = %path.display(), "State file written");
    Ok(())
}
