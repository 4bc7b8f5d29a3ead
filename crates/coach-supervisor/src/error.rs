//! Control-plane error taxonomy

use thiserror::Error;

/// Result type for control-plane calls
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// No usable answer: transport failure, timeout, empty or malformed body.
    /// Means "try again later", never "service absent".
    #[error("Control plane unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The control plane answered with a structured failure
    #[error("Control plane rejected the request (HTTP {code}): {message}")]
    Api { code: u16, message: String },
}

impl ControlPlaneError {
    pub fn unreachable<E: Into<String>, R: Into<String>>(endpoint: E, reason: R) -> Self {
        Self::Unreachable {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    pub fn api<S: Into<String>>(code: u16, message: S) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// An install that failed because the service is already there
    pub fn is_already_installed(&self) -> bool {
        match self {
            Self::Api { message, .. } => message.to_lowercase().contains("already installed"),
            Self::Unreachable { .. } => false,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable { .. })
    }
}
