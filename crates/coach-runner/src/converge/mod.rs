//! Per-service convergence
//!
//! Each dependent service walks the same state machine every run:
//! `Absent -> Installing -> Installed -> Starting -> RunningUnverified ->
//! RunningVerified`, with `Failed` as the terminal error state. Every step
//! looks at a fresh query first, so re-running against a converged service
//! issues no mutating calls.

pub mod diff;
pub mod engine;

pub use diff::{diff, overlay, ConfigDiff};
pub use engine::ConvergenceEngine;

use coach_types::{ManagedService, ServiceId, ServiceRole};
use std::fmt;
use strum::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergeState {
    Absent,
    Installing,
    Installed,
    Starting,
    RunningUnverified,
    RunningVerified,
    Failed(String),
}

impl fmt::Display for ConvergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvergeState::Absent => f.write_str("absent"),
            ConvergeState::Installing => f.write_str("installing"),
            ConvergeState::Installed => f.write_str("installed"),
            ConvergeState::Starting => f.write_str("starting"),
            ConvergeState::RunningUnverified => f.write_str("running (unverified)"),
            ConvergeState::RunningVerified => f.write_str("running (verified)"),
            ConvergeState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Mutating control-plane call issued during convergence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    Install,
    Start,
    SetConfiguration,
    Restart,
    SetBootPolicy,
}

/// What convergence did to one service
#[derive(Debug, Clone)]
pub struct ServiceReport {
    pub id: ServiceId,
    pub role: ServiceRole,
    pub state: ConvergeState,
    pub actions: Vec<Action>,
    pub warnings: Vec<String>,
    /// Installed before this run issued any call
    pub pre_existing: bool,
    /// Service as seen by the last fresh query
    pub live: Option<ManagedService>,
}

impl ServiceReport {
    pub fn new(id: ServiceId, role: ServiceRole) -> Self {
        Self {
            id,
            role,
            state: ConvergeState::Absent,
            actions: Vec::new(),
            warnings: Vec::new(),
            pre_existing: false,
            live: None,
        }
    }

    /// Report for a best-effort service whose convergence failed
    pub fn failed(id: ServiceId, role: ServiceRole, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            state: ConvergeState::Failed(reason.clone()),
            warnings: vec![reason],
            ..Self::new(id, role)
        }
    }

    pub fn count(&self, action: Action) -> usize {
        self.actions.iter().filter(|a| **a == action).count()
    }

    pub fn is_installed(&self) -> bool {
        self.live.as_ref().is_some_and(ManagedService::is_installed)
    }

    pub fn mark_verified(&mut self) {
        if self.state == ConvergeState::RunningUnverified {
            self.state = ConvergeState::RunningVerified;
        }
    }

    pub(crate) fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(service = %self.id, "{message}");
        self.warnings.push(message);
    }
}
