//! Multi-phase convergence of the appliance stack
//!
//! One run: resolve credentials, check the ownership gate, then converge the
//! broker, the bridge and the automation engine in that order, verify the
//! credentials reached every consumer, and record ownership.

use crate::config::{OperatorOptions, RunnerConfig};
use crate::converge::{ConvergeState, ConvergenceEngine, ServiceReport};
use crate::deploy::{BrokerWiring, DeployOutcome, DeploymentSequencer, FlowDeployer};
use crate::error::{OrchestratorError, Result};
use crate::gate::{self, GateDecision, GateInput};
use crate::readiness::{BrokerCheck, HttpCheck, ProcessCheck, ReadinessCheck, ReadinessProber};
use crate::state::{CredentialFile, CredentialStore, RunRecordStore};
use coach_supervisor::ControlPlane;
use coach_types::{
    credentials_in, BridgeOptions, BrokerOptions, Credentials, DesiredDocument, EngineOptions,
    Essentiality, ManagedService, RunRecord, ServiceId, ServiceRole,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything one run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub gate: GateDecision,
    pub reports: Vec<ServiceReport>,
    pub warnings: Vec<String>,
    pub deploy: Option<DeployOutcome>,
    pub credentials_rotated: bool,
    pub record: Option<RunRecord>,
}

impl RunSummary {
    pub fn report(&self, role: ServiceRole) -> Option<&ServiceReport> {
        self.reports.iter().find(|r| r.role == role)
    }

    /// Mutating control-plane calls plus flow submissions
    pub fn mutating_calls(&self) -> usize {
        let calls: usize = self.reports.iter().map(|r| r.actions.len()).sum();
        calls + usize::from(self.deploy.as_ref().is_some_and(DeployOutcome::submitted))
    }
}

/// Read-only view printed by `coach-runner status`
#[derive(Debug, Clone)]
pub struct StackStatus {
    pub services: Vec<ManagedService>,
    pub record: Option<RunRecord>,
    pub rotation_pending: bool,
}

pub struct Orchestrator {
    config: RunnerConfig,
    options: OperatorOptions,
    engine: ConvergenceEngine,
    deployer: Arc<dyn FlowDeployer>,
    admin_http: reqwest::Client,
    broker_check: Option<Arc<dyn ReadinessCheck>>,
    engine_check: Option<Arc<dyn ReadinessCheck>>,
    records: RunRecordStore,
    credentials: CredentialStore,
    rotate_credentials: bool,
}

impl Orchestrator {
    pub fn new(
        config: RunnerConfig,
        options: OperatorOptions,
        control_plane: Arc<dyn ControlPlane>,
    ) -> Result<Self> {
        config.validate()?;

        let admin_http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| OrchestratorError::config(format!("failed to build HTTP client: {e}")))?;
        let deployer = Arc::new(DeploymentSequencer::new(
            admin_http.clone(),
            config.engine_admin_url.clone(),
            config.engine_admin_auth.clone(),
            config.deploy_budget,
        ));

        Ok(Self {
            engine: ConvergenceEngine::new(control_plane, config.run_state_budget),
            records: RunRecordStore::new(config.run_record_path()),
            credentials: CredentialStore::new(config.credentials_path()),
            deployer,
            admin_http,
            broker_check: None,
            engine_check: None,
            rotate_credentials: false,
            config,
            options,
        })
    }

    /// Replace the flow deployer
    pub fn with_deployer(mut self, deployer: Arc<dyn FlowDeployer>) -> Self {
        self.deployer = deployer;
        self
    }

    /// Replace the protocol-level broker check
    pub fn with_broker_check(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.broker_check = Some(check);
        self
    }

    /// Replace the protocol-level automation engine check
    pub fn with_engine_check(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.engine_check = Some(check);
        self
    }

    /// Start a credential rotation during this run
    pub fn rotate_credentials(mut self, rotate: bool) -> Self {
        self.rotate_credentials = rotate;
        self
    }

    fn control_plane(&self) -> &Arc<dyn ControlPlane> {
        self.engine.control_plane()
    }

    /// Run every phase; essential failures return immediately
    pub async fn run(&self) -> Result<RunSummary> {
        let record = self.records.load()?;
        let mut credential_file = self.credentials.load()?;
        let credentials = self.resolve_credentials(&mut credential_file)?;
        let previous = credential_file
            .broker
            .is_rotating()
            .then(|| credential_file.broker.active.clone())
            .flatten();

        let gate = self.preflight(record.as_ref()).await?;

        let mut warnings = Vec::new();
        let mut reports = Vec::new();

        let broker = self.broker_phase(&credentials, previous.as_ref()).await?;
        reports.push(broker);

        let bridge = self.bridge_phase(&credentials).await?;
        reports.push(bridge);

        let engine_secret = credential_file.engine_secret().to_string();
        let (engine, deploy) = self.engine_phase(gate, &credentials, engine_secret).await?;
        reports.push(engine);
        if let Some(warning) = deploy.warning() {
            warnings.push(warning);
        }

        let rotated = self
            .verify_propagation(&mut credential_file, &credentials, &mut warnings)
            .await?;

        let record = RunRecord::managed_now(env!("CARGO_PKG_VERSION"));
        self.records.save(&record)?;

        for report in &reports {
            warnings.extend(report.warnings.iter().cloned());
        }
        let summary = RunSummary {
            gate,
            reports,
            warnings,
            deploy: Some(deploy),
            credentials_rotated: rotated,
            record: Some(record),
        };
        info!(
            mutating_calls = summary.mutating_calls(),
            warnings = summary.warnings.len(),
            "Convergence complete"
        );
        Ok(summary)
    }

    /// Pick the credential pair for this run and persist any change
    fn resolve_credentials(&self, file: &mut CredentialFile) -> Result<Credentials> {
        let had_secret = file.engine_secret.is_some();
        let staged = if self.rotate_credentials {
            info!("Credential rotation requested");
            file.broker.stage(Credentials::generate())
        } else if let Some(operator) = self.options.operator_credentials() {
            file.broker.stage(operator)
        } else if file.broker.effective().is_none() {
            info!("Generating broker credentials");
            file.broker.stage(Credentials::generate())
        } else {
            false
        };
        file.engine_secret();

        if staged || !had_secret {
            self.credentials.save(file)?;
        }
        if file.broker.is_rotating() {
            info!("Credential rotation pending until every consumer carries the new pair");
        }

        file.broker
            .effective()
            .cloned()
            .ok_or_else(|| OrchestratorError::config("no broker credentials could be resolved"))
    }

    /// Read-only ownership check before anything is mutated
    async fn preflight(&self, record: Option<&RunRecord>) -> Result<GateDecision> {
        let id = &self.config.engine_id;
        let engine = self
            .engine
            .observe(id, ServiceRole::AutomationEngine)
            .await?;

        gate::evaluate(GateInput {
            service: id,
            pre_existing: engine.is_installed(),
            record,
            takeover_confirmed: self.options.confirm_nodered_takeover,
        })
        .inspect_err(|e| error!(error = %e, "Ownership gate halted the run"))
    }

    async fn broker_phase(
        &self,
        credentials: &Credentials,
        previous: Option<&Credentials>,
    ) -> Result<ServiceReport> {
        info!("Phase 1: broker");
        let desired = DesiredDocument::Broker(BrokerOptions::new(credentials).retire(previous));
        let mut report = self.converge_service(&desired).await?;

        let check: Arc<dyn ReadinessCheck> = match &self.broker_check {
            Some(check) => check.clone(),
            None => Arc::new(BrokerCheck::new(
                self.config.broker_endpoint.clone(),
                credentials.clone(),
                self.config.request_timeout,
            )),
        };
        let prober = ReadinessProber::new(self.config.readiness_budget);
        prober
            .wait_until_ready(check.as_ref())
            .await
            .into_result(check.target())?;
        report.mark_verified();
        Ok(report)
    }

    /// Converge one service; a best-effort failure becomes a failed report
    async fn converge_service(&self, desired: &DesiredDocument) -> Result<ServiceReport> {
        let role = desired.role();
        let id = self.config.service_id(role);
        match self.engine.converge(id, desired).await {
            Ok(report) => Ok(report),
            Err(e) if role.essentiality() == Essentiality::BestEffort => {
                warn!(service = %id, error = %e, "Convergence failed, continuing without it");
                Ok(ServiceReport::failed(
                    id.clone(),
                    role,
                    format!("{e}. {}", e.remediation()),
                ))
            }
            Err(e) => Err(e),
        }
    }

    async fn bridge_phase(&self, credentials: &Credentials) -> Result<ServiceReport> {
        info!("Phase 2: bridge");
        let id = self.config.service_id(ServiceRole::Bridge);
        let desired = DesiredDocument::Bridge(BridgeOptions::new(
            self.options.can_interface.clone(),
            self.options.can_bitrate,
            &self.config.broker_endpoint,
            credentials,
            self.options.debug_logging,
        ));

        let mut report = self.converge_service(&desired).await?;
        if matches!(report.state, ConvergeState::Failed(_)) {
            return Ok(report);
        }

        let check = ProcessCheck::new(self.control_plane().clone(), id.clone());
        let outcome = ReadinessProber::new(self.config.run_state_budget)
            .wait_until_ready(&check)
            .await;
        if outcome.is_ready() {
            report.mark_verified();
        } else {
            report.warn(format!("{id} is not running; CAN traffic will not reach the broker"));
        }
        Ok(report)
    }

    async fn engine_phase(
        &self,
        gate: GateDecision,
        credentials: &Credentials,
        engine_secret: String,
    ) -> Result<(ServiceReport, DeployOutcome)> {
        info!("Phase 3: automation engine");
        let desired = DesiredDocument::Engine(EngineOptions::new(
            engine_secret.clone(),
            self.config.engine_init_commands.clone(),
            &self.config.broker_endpoint,
            credentials,
        ));
        let mut report = match self.converge_service(&desired).await {
            Ok(report) => report,
            Err(e) => {
                if gate != GateDecision::Managed && self.engine_installed().await {
                    self.claim_engine()?;
                }
                return Err(e);
            }
        };
        if gate != GateDecision::Managed {
            self.claim_engine()?;
        }

        let check: Arc<dyn ReadinessCheck> = match &self.engine_check {
            Some(check) => check.clone(),
            None => Arc::new(HttpCheck::new(
                self.admin_http.clone(),
                self.config.engine_admin_url.clone(),
                self.config.engine_admin_auth.clone(),
            )),
        };
        ReadinessProber::new(self.config.readiness_budget)
            .wait_until_ready(check.as_ref())
            .await
            .into_result(check.target())?;
        report.mark_verified();

        let wiring = BrokerWiring::new(
            self.config.broker_endpoint.clone(),
            credentials.clone(),
            &engine_secret,
        );
        let deploy = self.deployer.deploy(&wiring).await;
        Ok((report, deploy))
    }

    /// Record that coach owns the engine; it is installed by (or handed over
    /// to) this system from here on, whatever happens later in the run.
    fn claim_engine(&self) -> Result<()> {
        self.records.save(&RunRecord::managed_now(env!("CARGO_PKG_VERSION")))?;
        info!(service = %self.config.engine_id, "Recorded ownership of the automation engine");
        Ok(())
    }

    async fn engine_installed(&self) -> bool {
        self.engine
            .observe(&self.config.engine_id, ServiceRole::AutomationEngine)
            .await
            .is_ok_and(|service| service.is_installed())
    }

    /// Every installed consumer must carry the effective pair, and during a
    /// rotation none may still carry the previous one.
    ///
    /// A lagging essential consumer fails the run. A lagging best-effort one
    /// is a warning and keeps a rotation pending. Returns whether a rotation
    /// was completed.
    async fn verify_propagation(
        &self,
        file: &mut CredentialFile,
        credentials: &Credentials,
        warnings: &mut Vec<String>,
    ) -> Result<bool> {
        let rotating = file.broker.is_rotating();
        let previous = rotating.then(|| file.broker.active.clone()).flatten();
        let mut pending: Vec<ServiceId> = Vec::new();
        let mut lagging: Vec<ServiceId> = Vec::new();

        for role in [
            ServiceRole::Broker,
            ServiceRole::Bridge,
            ServiceRole::AutomationEngine,
        ] {
            let id = self.config.service_id(role);
            let carried = match self.engine.observe(id, role).await {
                Ok(service) if !service.is_installed() => continue,
                Ok(service) => credentials_in(role, &service.configuration),
                Err(e) => {
                    warn!(service = %id, error = %e, "Could not verify credentials");
                    Vec::new()
                }
            };

            let has_new = carried.contains(credentials);
            let has_old = previous.as_ref().is_some_and(|old| carried.contains(old));
            if has_new && !has_old {
                continue;
            }
            warn!(service = %id, has_new, has_old, "Credentials not propagated");
            match role.essentiality() {
                Essentiality::Essential => pending.push(id.clone()),
                Essentiality::BestEffort => lagging.push(id.clone()),
            }
        }

        if !pending.is_empty() {
            return Err(OrchestratorError::CredentialPropagationIncomplete { pending });
        }

        for id in &lagging {
            let warning = if rotating {
                format!("{id} does not carry the rotated broker credentials; rotation stays pending")
            } else {
                format!("{id} does not carry the broker credentials; a later run will configure it")
            };
            warnings.push(warning);
        }

        if rotating && lagging.is_empty() {
            file.broker.promote();
            self.credentials.save(file)?;
            info!("Credential rotation complete");
            return Ok(true);
        }
        Ok(false)
    }

    /// Query every service and the run record without changing anything
    pub async fn status(&self) -> Result<StackStatus> {
        let mut services = Vec::new();
        for role in [
            ServiceRole::Broker,
            ServiceRole::Bridge,
            ServiceRole::AutomationEngine,
        ] {
            services.push(self.engine.observe(self.config.service_id(role), role).await?);
        }

        Ok(StackStatus {
            services,
            record: self.records.load()?,
            rotation_pending: self.credentials.load()?.broker.is_rotating(),
        })
    }
}
