//! Broker credentials and their rotation state

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use std::fmt;

const GENERATED_USER_PREFIX: &str = "coach_";
const GENERATED_USER_SUFFIX_LEN: usize = 6;
const GENERATED_PASSWORD_LEN: usize = 24;

/// The broker username/password pair every consumer authenticates with
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Generate a fresh random pair
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(GENERATED_USER_SUFFIX_LEN)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        let password: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(GENERATED_PASSWORD_LEN)
            .map(char::from)
            .collect();

        Self::new(format!("{GENERATED_USER_PREFIX}{suffix}"), password)
    }

    pub fn is_blank(&self) -> bool {
        self.username.trim().is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted credential lifecycle.
///
/// `active` is the single pair considered live system-wide. A rotation first
/// lands in `pending` and is promoted only once every consumer carries it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    #[serde(default)]
    pub active: Option<Credentials>,
    #[serde(default)]
    pub pending: Option<Credentials>,
}

impl CredentialState {
    /// The pair this run must propagate: a pending rotation wins
    pub fn effective(&self) -> Option<&Credentials> {
        self.pending.as_ref().or(self.active.as_ref())
    }

    pub fn is_rotating(&self) -> bool {
        self.pending.is_some()
    }

    /// Stage `next` as a rotation unless it already is the effective pair
    pub fn stage(&mut self, next: Credentials) -> bool {
        if self.effective() == Some(&next) {
            return false;
        }
        if self.active.is_none() {
            self.active = Some(next);
        } else {
            self.pending = Some(next);
        }
        true
    }

    /// Promote a pending rotation to active
    pub fn promote(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.active = Some(pending);
        }
    }
}
