//! Orchestrator error taxonomy
//!
//! Every fatal condition carries enough context to print an actionable
//! remediation for the operator, see [`OrchestratorError::remediation`].

use coach_supervisor::ControlPlaneError;
use coach_types::ServiceId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The control plane did not answer usably
    #[error("{service}: control plane unreachable during {action}: {source}")]
    Unreachable {
        service: ServiceId,
        action: &'static str,
        #[source]
        source: ControlPlaneError,
    },

    /// The control plane answered with a structured failure
    #[error("{service}: control plane rejected {action}: {source}")]
    Api {
        service: ServiceId,
        action: &'static str,
        #[source]
        source: ControlPlaneError,
    },

    /// A readiness or deployment poll exhausted its budget
    #[error("{target} not ready after {attempts} attempts")]
    Timeout { target: String, attempts: u32 },

    /// Safety gate halt
    #[error("{service} holds configuration that is not under coach management")]
    OwnershipConflict { service: ServiceId },

    /// Writing the desired configuration failed
    #[error("{service}: failed to apply desired configuration: {source}")]
    ConfigDriftUnresolved {
        service: ServiceId,
        #[source]
        source: ControlPlaneError,
    },

    /// A credential rotation reached only part of its consumers
    #[error("credential rotation incomplete, still pending on: {}", join_ids(.pending))]
    CredentialPropagationIncomplete { pending: Vec<ServiceId> },

    #[error("State file error at {path}: {source}")]
    State {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    StateCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

fn join_ids(ids: &[ServiceId]) -> String {
    ids.iter()
        .map(ServiceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl OrchestratorError {
    /// Classify a control-plane failure for `action` on `service`
    pub fn control_plane(service: &ServiceId, action: &'static str, source: ControlPlaneError) -> Self {
        if source.is_unreachable() {
            Self::Unreachable {
                service: service.clone(),
                action,
                source,
            }
        } else {
            Self::Api {
                service: service.clone(),
                action,
                source,
            }
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn state(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::State {
            path: path.into(),
            source,
        }
    }

    /// What the operator should do about this failure
    pub fn remediation(&self) -> String {
        match self {
            Self::Unreachable { .. } => {
                "The Supervisor API did not respond. Check that the add-on has \
                 `hassio_api: true` and re-run; every step is safe to repeat."
                    .to_string()
            }
            Self::Api { service, action, .. } => format!(
                "The Supervisor refused to {action} {service}. Open the Supervisor \
                 log for the exact reason, fix it (disk space, store repository), then re-run."
            ),
            Self::Timeout { target, .. } => format!(
                "{target} did not become ready in time. Check its add-on log; \
                 the next run resumes where this one stopped."
            ),
            Self::OwnershipConflict { service } => format!(
                "{service} is already installed and its flows were not created by coach. \
                 Back up your flows, then set `confirm_nodered_takeover: true` in the add-on \
                 configuration to let coach replace them."
            ),
            Self::ConfigDriftUnresolved { service, .. } => format!(
                "Writing the configuration of {service} failed. Compare its options \
                 with the add-on documentation and correct invalid values, then re-run."
            ),
            Self::CredentialPropagationIncomplete { pending } => format!(
                "The new broker credentials did not reach {}. Re-run to finish the \
                 rotation; the previous pair stays active until then.",
                join_ids(pending)
            ),
            Self::State { path, .. } | Self::StateCorrupt { path, .. } => format!(
                "Cannot use state file {}. Check permissions on the data directory; \
                 remove the file only if you intend to reset coach's ownership record.",
                path.display()
            ),
            Self::Config { .. } => {
                "Fix the add-on configuration options and restart the add-on.".to_string()
            }
        }
    }
}
