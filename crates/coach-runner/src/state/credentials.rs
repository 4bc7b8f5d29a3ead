use super::{read_json, write_json_atomic};
use crate::error::Result;
use coach_types::CredentialState;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const ENGINE_SECRET_LEN: usize = 32;

/// On-disk credential document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialFile {
    #[serde(flatten)]
    pub broker: CredentialState,
    /// Key the automation engine encrypts its stored flow credentials with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_secret: Option<String>,
}

impl CredentialFile {
    /// The engine secret, generated on first use and then kept forever
    pub fn engine_secret(&mut self) -> &str {
        self.engine_secret.get_or_insert_with(|| {
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(ENGINE_SECRET_LEN)
                .map(char::from)
                .collect()
        })
    }
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<CredentialFile> {
        Ok(read_json(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, file: &CredentialFile) -> Result<()> {
        write_json_atomic(&self.path, file)?;
        debug!(rotating = file.broker.is_rotating(), "Credential file saved");
        Ok(())
    }
}
