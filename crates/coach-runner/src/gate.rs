//! Ownership guard for the automation engine
//!
//! Deploying flows replaces the engine's whole flow set. If the engine was
//! already installed before coach ever touched it, those flows belong to the
//! user and may only be replaced with explicit consent.

use crate::error::{OrchestratorError, Result};
use coach_types::{RunRecord, ServiceId};
use tracing::{info, warn};

/// Why the gate let the run proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Nothing there yet; coach will install it
    Fresh,
    /// Installed by a previous coach run
    Managed,
    /// Pre-existing and unmanaged, but the operator accepted the takeover
    TakeoverConfirmed,
}

/// Inputs the gate decides on
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub service: &'a ServiceId,
    /// Installed before this run touched it
    pub pre_existing: bool,
    pub record: Option<&'a RunRecord>,
    pub takeover_confirmed: bool,
}

/// Decide whether the run may mutate `service`.
///
/// Pure: the caller performs the read-only query and passes the result in.
pub fn evaluate(input: GateInput<'_>) -> Result<GateDecision> {
    if !input.pre_existing {
        info!(service = %input.service, "Automation engine not installed, coach will own it");
        return Ok(GateDecision::Fresh);
    }

    if RunRecord::is_managed(input.record) {
        info!(service = %input.service, "Automation engine already under coach management");
        return Ok(GateDecision::Managed);
    }

    if input.takeover_confirmed {
        warn!(
            service = %input.service,
            "Taking over a pre-existing automation engine as confirmed by the operator"
        );
        return Ok(GateDecision::TakeoverConfirmed);
    }

    Err(OrchestratorError::OwnershipConflict {
        service: input.service.clone(),
    })
}
