//! Convergence orchestrator for the LibreCoach add-on stack
//!
//! Brings the MQTT broker, the CAN bridge and the Node-RED automation engine
//! from whatever state they are in to a configured, running stack, through
//! the host platform's control plane. Every phase is idempotent, so the
//! runner is simply invoked again after any failure.

pub mod config;
pub mod converge;
pub mod deploy;
pub mod error;
pub mod gate;
pub mod logging;
pub mod orchestrator;
pub mod readiness;
pub mod state;

pub use config::{OperatorOptions, PollBudget, RunnerConfig};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, RunSummary, StackStatus};
