//! Convergence engine implementation

use super::{diff, overlay, Action, ConvergeState, ServiceReport};
use crate::config::PollBudget;
use crate::error::{OrchestratorError, Result};
use coach_supervisor::ControlPlane;
use coach_types::{BootPolicy, DesiredDocument, ManagedService, ServiceId, ServiceRole};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Drives one service toward its desired state through the control plane
#[derive(Clone)]
pub struct ConvergenceEngine {
    control_plane: Arc<dyn ControlPlane>,
    run_state_budget: PollBudget,
    boot_policy: BootPolicy,
}

impl ConvergenceEngine {
    pub fn new(control_plane: Arc<dyn ControlPlane>, run_state_budget: PollBudget) -> Self {
        Self {
            control_plane,
            run_state_budget,
            boot_policy: BootPolicy::default(),
        }
    }

    pub fn with_boot_policy(mut self, policy: BootPolicy) -> Self {
        self.boot_policy = policy;
        self
    }

    pub fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        &self.control_plane
    }

    /// Fresh read-only view of a service
    pub async fn observe(&self, id: &ServiceId, role: ServiceRole) -> Result<ManagedService> {
        let info = self
            .control_plane
            .query(id)
            .await
            .map_err(|e| OrchestratorError::control_plane(id, "query", e))?;
        Ok(ManagedService::from_info(id.clone(), role, info))
    }

    /// Install, start, configure and pin the boot policy of one service.
    ///
    /// Errors are returned as-is; the caller decides whether they abort the
    /// run based on the service's essentiality.
    #[instrument(skip_all, fields(service = %id, role = %desired.role()))]
    pub async fn converge(&self, id: &ServiceId, desired: &DesiredDocument) -> Result<ServiceReport> {
        let role = desired.role();
        let mut report = ServiceReport::new(id.clone(), role);

        let mut service = self.observe(id, role).await?;
        report.pre_existing = service.is_installed();

        if !service.is_installed() {
            report.state = ConvergeState::Installing;
            service = self.install(id, role, &mut report).await?;
        }
        report.state = ConvergeState::Installed;

        if !service.run_state.is_started() {
            report.state = ConvergeState::Starting;
            info!(run_state = %service.run_state, "Starting service");
            self.control_plane
                .start(id)
                .await
                .map_err(|e| OrchestratorError::control_plane(id, "start", e))?;
            report.actions.push(Action::Start);
            service = self.await_started(id, role, &mut report).await?;
        }
        report.state = ConvergeState::RunningUnverified;

        let changes = diff(desired, &service.configuration);
        if changes.is_empty() {
            debug!("Live configuration matches desired state");
        } else {
            info!(
                changed = ?changes.changed_keys,
                material = changes.material,
                "Configuration drift detected"
            );
            let document = overlay(&service.configuration, desired);
            self.control_plane
                .set_configuration(id, &document)
                .await
                .map_err(|source| OrchestratorError::ConfigDriftUnresolved {
                    service: id.clone(),
                    source,
                })?;
            report.actions.push(Action::SetConfiguration);

            // a plain start would not pick the new options up
            self.control_plane
                .restart(id)
                .await
                .map_err(|e| OrchestratorError::control_plane(id, "restart", e))?;
            report.actions.push(Action::Restart);
            service = self.await_started(id, role, &mut report).await?;
        }

        if service.boot_policy != Some(self.boot_policy) {
            match self.control_plane.set_boot_policy(id, self.boot_policy).await {
                Ok(()) => {
                    report.actions.push(Action::SetBootPolicy);
                    service = self.observe(id, role).await?;
                }
                Err(e) => report.warn(format!("could not set boot policy: {e}")),
            }
        }

        info!(
            actions = report.actions.len(),
            warnings = report.warnings.len(),
            run_state = %service.run_state,
            "Service converged"
        );
        report.live = Some(service);
        Ok(report)
    }

    async fn install(
        &self,
        id: &ServiceId,
        role: ServiceRole,
        report: &mut ServiceReport,
    ) -> Result<ManagedService> {
        match self.control_plane.install(id).await {
            Ok(()) => {}
            Err(e) if e.is_already_installed() => {
                info!("Service was installed concurrently, continuing");
            }
            Err(e) => return Err(OrchestratorError::control_plane(id, "install", e)),
        }
        report.actions.push(Action::Install);

        for attempt in 1..=self.run_state_budget.attempts {
            let service = self.observe(id, role).await?;
            if service.is_installed() {
                return Ok(service);
            }
            debug!(attempt, "Install not visible yet");
            if attempt < self.run_state_budget.attempts {
                tokio::time::sleep(self.run_state_budget.interval).await;
            }
        }

        Err(OrchestratorError::Timeout {
            target: format!("{id} installation"),
            attempts: self.run_state_budget.attempts,
        })
    }

    /// Poll until the service reports `started`; running out is only a warning
    async fn await_started(
        &self,
        id: &ServiceId,
        role: ServiceRole,
        report: &mut ServiceReport,
    ) -> Result<ManagedService> {
        let mut service = self.observe(id, role).await?;
        let mut attempt = 1;
        while !service.run_state.is_started() && attempt < self.run_state_budget.attempts {
            debug!(attempt, run_state = %service.run_state, "Waiting for service to start");
            tokio::time::sleep(self.run_state_budget.interval).await;
            service = self.observe(id, role).await?;
            attempt += 1;
        }

        if !service.run_state.is_started() {
            report.warn(format!(
                "{id} did not report started after {attempt} checks (last state: {})",
                service.run_state
            ));
        }
        Ok(service)
    }
}
