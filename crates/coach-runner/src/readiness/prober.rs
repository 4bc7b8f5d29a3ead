//! Bounded readiness polling

use super::{ReadinessCheck, ReadinessLevel};
use crate::config::PollBudget;
use crate::error::OrchestratorError;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a readiness wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready { attempts: u32 },
    Timeout { attempts: u32, last_reason: Option<String> },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }

    /// Turn a timeout into the orchestrator error for `target`
    pub fn into_result(self, target: &str) -> Result<u32, OrchestratorError> {
        match self {
            ProbeOutcome::Ready { attempts } => Ok(attempts),
            ProbeOutcome::Timeout { attempts, .. } => Err(OrchestratorError::Timeout {
                target: target.to_string(),
                attempts,
            }),
        }
    }
}

/// Polls a [`ReadinessCheck`] within a fixed budget
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProber {
    budget: PollBudget,
}

impl ReadinessProber {
    pub fn new(budget: PollBudget) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    /// Probe until ready or the attempt budget is spent
    pub async fn wait_until_ready(&self, check: &dyn ReadinessCheck) -> ProbeOutcome {
        let service = check.target();
        let level = match check.level() {
            ReadinessLevel::Process => "process",
            ReadinessLevel::Protocol => "protocol",
        };
        info!(
            service,
            probe_level = level,
            max_attempts = self.budget.attempts,
            "Waiting for service readiness"
        );

        let start_time = Instant::now();
        let mut last_reason = None;

        for attempt in 1..=self.budget.attempts {
            let result = check.probe().await;

            if result.is_ready() {
                info!(
                    service,
                    attempt,
                    elapsed_ms = start_time.elapsed().as_millis(),
                    "Service ready"
                );
                return ProbeOutcome::Ready { attempts: attempt };
            }

            debug!(
                service,
                attempt,
                reason = result.reason().unwrap_or_default(),
                "Service not ready yet"
            );
            last_reason = result.reason().map(str::to_string);

            if attempt < self.budget.attempts {
                tokio::time::sleep(self.budget.interval).await;
            }
        }

        warn!(
            service,
            attempts = self.budget.attempts,
            last_reason = last_reason.as_deref().unwrap_or_default(),
            "Service did not become ready"
        );
        ProbeOutcome::Timeout {
            attempts: self.budget.attempts,
            last_reason,
        }
    }
}
