//! Flow deployment into the automation engine
//!
//! Runs once the engine answers on its admin API. A deployment that does not
//! end in [`DeployOutcome::Applied`] or [`DeployOutcome::Unchanged`] never
//! fails the run; the operator is told to deploy manually instead.

pub mod flows;
pub mod sequencer;

pub use flows::{is_fully_wired, wire_broker_nodes, BrokerWiring, FlowSet};
pub use sequencer::DeploymentSequencer;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use std::fmt;

/// Credentials for the engine's admin API
#[derive(Clone, Default, PartialEq, Eq)]
pub enum AdminAuth {
    #[default]
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
}

impl AdminAuth {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            AdminAuth::None => request,
            AdminAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            AdminAuth::Bearer { token } => request.bearer_auth(token),
        }
    }
}

impl fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminAuth::None => f.write_str("None"),
            AdminAuth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AdminAuth::Bearer { .. } => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// How a flow deployment ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Flows accepted and active
    Applied,
    /// Live flows already carried the wiring, nothing submitted
    Unchanged,
    /// The engine refused the submission
    Rejected { status: u16, message: String },
    /// Accepted but the new revision never became visible
    Timeout { attempts: u32 },
    /// The admin API could not be reached
    Failed { reason: String },
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeployOutcome::Applied | DeployOutcome::Unchanged)
    }

    /// Whether flows were submitted and took effect during this run
    pub fn submitted(&self) -> bool {
        matches!(self, DeployOutcome::Applied)
    }

    /// Operator-facing warning for unsuccessful outcomes
    pub fn warning(&self) -> Option<String> {
        let detail = match self {
            DeployOutcome::Applied | DeployOutcome::Unchanged => return None,
            DeployOutcome::Rejected { status, message } => {
                format!("the engine rejected the flows (HTTP {status}: {message})")
            }
            DeployOutcome::Timeout { attempts } => {
                format!("the deployment was not confirmed after {attempts} checks")
            }
            DeployOutcome::Failed { reason } => format!("the admin API failed: {reason}"),
        };
        Some(format!(
            "Flow deployment did not complete, {detail}. Open the Node-RED editor and press Deploy."
        ))
    }
}

/// Pushes broker wiring into the automation engine's flows
#[async_trait]
pub trait FlowDeployer: Send + Sync {
    async fn deploy(&self, wiring: &BrokerWiring) -> DeployOutcome;
}
