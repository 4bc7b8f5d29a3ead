use super::{read_json, write_json_atomic};
use crate::error::Result;
use coach_types::RunRecord;
use std::path::{Path, PathBuf};
use tracing::info;

/// Durable home of the automation engine's [`RunRecord`]
#[derive(Debug, Clone)]
pub struct RunRecordStore {
    path: PathBuf,
}

impl RunRecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<RunRecord>> {
        read_json(&self.path)
    }

    pub fn save(&self, record: &RunRecord) -> Result<()> {
        write_json_atomic(&self.path, record)?;
        info!(
            managed = record.managed,
            version = %record.version,
            "Run record saved"
        );
        Ok(())
    }
}
