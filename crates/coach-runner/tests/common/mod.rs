//! Shared fakes for the runner integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use coach_runner::config::PollBudget;
use coach_runner::deploy::{wire_broker_nodes, BrokerWiring, DeployOutcome, FlowDeployer};
use coach_runner::readiness::{ProbeResult, ReadinessCheck, ReadinessLevel};
use coach_runner::{OperatorOptions, Orchestrator, RunnerConfig};
use coach_supervisor::{ControlPlane, ControlPlaneError};
use coach_types::{BootPolicy, ServiceId, ServiceInfo, ServiceRole};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Query(ServiceId),
    Install(ServiceId),
    SetConfiguration(ServiceId, Map<String, Value>),
    Start(ServiceId),
    Stop(ServiceId),
    Restart(ServiceId),
    SetBootPolicy(ServiceId, BootPolicy),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Call::Query(_))
    }

    pub fn service(&self) -> &ServiceId {
        match self {
            Call::Query(id)
            | Call::Install(id)
            | Call::SetConfiguration(id, _)
            | Call::Start(id)
            | Call::Stop(id)
            | Call::Restart(id)
            | Call::SetBootPolicy(id, _) => id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeService {
    pub installed: bool,
    pub state: String,
    pub options: Map<String, Value>,
    pub boot: Option<String>,
    pub watchdog: Option<bool>,
}

impl FakeService {
    fn absent() -> Self {
        Self {
            installed: false,
            state: "unknown".to_string(),
            options: Map::new(),
            boot: None,
            watchdog: None,
        }
    }

    /// Freshly installed: stopped, platform defaults, manual boot
    fn installed_defaults() -> Self {
        let mut options = Map::new();
        options.insert("platform_default".to_string(), json!(true));
        Self {
            installed: true,
            state: "stopped".to_string(),
            options,
            boot: Some("manual".to_string()),
            watchdog: Some(false),
        }
    }
}

#[derive(Default)]
struct Inner {
    services: HashMap<ServiceId, FakeService>,
    calls: Vec<Call>,
    fail_install: HashSet<ServiceId>,
    install_race: HashSet<ServiceId>,
    never_start: HashSet<ServiceId>,
    fail_configuration: HashSet<ServiceId>,
    fail_boot_policy: HashSet<ServiceId>,
    unreachable: bool,
    unreachable_services: HashSet<ServiceId>,
}

/// In-memory control plane that records every call
#[derive(Default)]
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

impl FakeControlPlane {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed an installed service
    pub fn install_existing(&self, id: &ServiceId, options: Map<String, Value>, started: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.services.insert(
            id.clone(),
            FakeService {
                installed: true,
                state: if started { "started" } else { "stopped" }.to_string(),
                options,
                boot: Some("auto".to_string()),
                watchdog: Some(true),
            },
        );
    }

    pub fn fail_install(&self, id: &ServiceId) {
        self.inner.lock().unwrap().fail_install.insert(id.clone());
    }

    pub fn install_race(&self, id: &ServiceId) {
        self.inner.lock().unwrap().install_race.insert(id.clone());
    }

    pub fn never_start(&self, id: &ServiceId) {
        self.inner.lock().unwrap().never_start.insert(id.clone());
    }

    pub fn fail_configuration(&self, id: &ServiceId) {
        self.inner
            .lock()
            .unwrap()
            .fail_configuration
            .insert(id.clone());
    }

    pub fn clear_failures(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_install.clear();
        inner.fail_configuration.clear();
        inner.fail_boot_policy.clear();
        inner.never_start.clear();
        inner.unreachable_services.clear();
    }

    pub fn fail_boot_policy(&self, id: &ServiceId) {
        self.inner.lock().unwrap().fail_boot_policy.insert(id.clone());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unwrap().unreachable = unreachable;
    }

    /// Every call about `id` fails as if the platform could not be reached
    pub fn set_service_unreachable(&self, id: &ServiceId) {
        self.inner
            .lock()
            .unwrap()
            .unreachable_services
            .insert(id.clone());
    }

    pub fn service(&self, id: &ServiceId) -> Option<FakeService> {
        self.inner.lock().unwrap().services.get(id).cloned()
    }

    pub fn options(&self, id: &ServiceId) -> Map<String, Value> {
        self.service(id).map(|s| s.options).unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_mutating()).count()
    }

    pub fn mutating_calls_for(&self, id: &ServiceId) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.is_mutating() && c.service() == id)
            .collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let unreachable = inner.unreachable || inner.unreachable_services.contains(call.service());
        inner.calls.push(call);
        if unreachable {
            return Err(ControlPlaneError::unreachable(
                "http://supervisor",
                "connection refused",
            ));
        }
        Ok(())
    }

    fn with_installed<T>(
        &self,
        id: &ServiceId,
        f: impl FnOnce(&mut FakeService, &Inner) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.inner.lock().unwrap();
        let mut service = inner
            .services
            .get(id)
            .cloned()
            .filter(|s| s.installed)
            .ok_or_else(|| ControlPlaneError::api(400, "Addon is not installed"))?;
        let result = f(&mut service, &inner)?;
        inner.services.insert(id.clone(), service);
        Ok(result)
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn query(&self, id: &ServiceId) -> Result<ServiceInfo> {
        self.record(Call::Query(id.clone()))?;
        let inner = self.inner.lock().unwrap();
        let service = inner
            .services
            .get(id)
            .cloned()
            .unwrap_or_else(FakeService::absent);
        Ok(ServiceInfo {
            installed: Some(service.installed),
            version: service.installed.then(|| "1.0.0".to_string()),
            state: Some(service.state),
            options: service.options,
            boot: service.boot,
            watchdog: service.watchdog,
        })
    }

    async fn install(&self, id: &ServiceId) -> Result<()> {
        self.record(Call::Install(id.clone()))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_install.contains(id) {
            return Err(ControlPlaneError::api(400, "No space left on device"));
        }
        if inner.services.get(id).is_some_and(|s| s.installed) {
            return Err(ControlPlaneError::api(400, "Addon is already installed"));
        }
        inner
            .services
            .insert(id.clone(), FakeService::installed_defaults());
        if inner.install_race.contains(id) {
            // someone else finished the install first
            return Err(ControlPlaneError::api(400, "Addon is already installed"));
        }
        Ok(())
    }

    async fn set_configuration(&self, id: &ServiceId, options: &Map<String, Value>) -> Result<()> {
        self.record(Call::SetConfiguration(id.clone(), options.clone()))?;
        self.with_installed(id, |service, inner| {
            if inner.fail_configuration.contains(id) {
                return Err(ControlPlaneError::api(400, "Invalid option"));
            }
            service.options = options.clone();
            Ok(())
        })
    }

    async fn start(&self, id: &ServiceId) -> Result<()> {
        self.record(Call::Start(id.clone()))?;
        self.with_installed(id, |service, inner| {
            if !inner.never_start.contains(id) {
                service.state = "started".to_string();
            }
            Ok(())
        })
    }

    async fn stop(&self, id: &ServiceId) -> Result<()> {
        self.record(Call::Stop(id.clone()))?;
        self.with_installed(id, |service, _| {
            service.state = "stopped".to_string();
            Ok(())
        })
    }

    async fn restart(&self, id: &ServiceId) -> Result<()> {
        self.record(Call::Restart(id.clone()))?;
        self.with_installed(id, |service, inner| {
            service.state = if inner.never_start.contains(id) {
                "error"
            } else {
                "started"
            }
            .to_string();
            Ok(())
        })
    }

    async fn set_boot_policy(&self, id: &ServiceId, policy: BootPolicy) -> Result<()> {
        self.record(Call::SetBootPolicy(id.clone(), policy))?;
        self.with_installed(id, |service, inner| {
            if inner.fail_boot_policy.contains(id) {
                return Err(ControlPlaneError::api(400, "Boot policy locked"));
            }
            service.boot = Some(if policy.autostart { "auto" } else { "manual" }.to_string());
            service.watchdog = Some(policy.watchdog);
            Ok(())
        })
    }
}

/// Readiness check with a fixed answer
pub struct FakeCheck {
    name: String,
    ready: bool,
    pub probes: AtomicU32,
}

impl FakeCheck {
    pub fn ready(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ready: true,
            probes: AtomicU32::new(0),
        })
    }

    pub fn never(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ready: false,
            probes: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ReadinessCheck for FakeCheck {
    fn target(&self) -> &str {
        &self.name
    }

    fn level(&self) -> ReadinessLevel {
        ReadinessLevel::Protocol
    }

    async fn probe(&self) -> ProbeResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let result = ProbeResult::new(self.name.clone());
        if self.ready {
            result.ready()
        } else {
            result.not_ready("connection refused")
        }
    }
}

/// Flow deployer holding the engine's flows in memory
#[derive(Default)]
pub struct FakeDeployer {
    flows: Mutex<Vec<Value>>,
    pub submissions: AtomicU32,
}

impl FakeDeployer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn flows(&self) -> Vec<Value> {
        self.flows.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlowDeployer for FakeDeployer {
    async fn deploy(&self, wiring: &BrokerWiring) -> DeployOutcome {
        let mut flows = self.flows.lock().unwrap();
        if wire_broker_nodes(&mut flows, wiring) {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            DeployOutcome::Applied
        } else {
            DeployOutcome::Unchanged
        }
    }
}

pub fn broker_id() -> ServiceId {
    ServiceRole::Broker.default_id()
}

pub fn bridge_id() -> ServiceId {
    ServiceRole::Bridge.default_id()
}

pub fn engine_id() -> ServiceId {
    ServiceRole::AutomationEngine.default_id()
}

/// Runner config with millisecond poll budgets and state under `state_dir`
pub fn fast_config(state_dir: &Path) -> RunnerConfig {
    let budget = PollBudget::new(3, Duration::from_millis(1));
    RunnerConfig {
        state_dir: state_dir.to_path_buf(),
        options_path: state_dir.join("options.json"),
        settings_path: state_dir.join("librecoach-settings.json"),
        run_state_budget: budget,
        readiness_budget: budget,
        deploy_budget: budget,
        ..RunnerConfig::default()
    }
}

pub struct Harness {
    pub control_plane: Arc<FakeControlPlane>,
    pub deployer: Arc<FakeDeployer>,
    pub broker_check: Arc<FakeCheck>,
    pub engine_check: Arc<FakeCheck>,
    pub config: RunnerConfig,
}

impl Harness {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            control_plane: FakeControlPlane::new(),
            deployer: FakeDeployer::new(),
            broker_check: FakeCheck::ready("broker"),
            engine_check: FakeCheck::ready("engine"),
            config: fast_config(state_dir),
        }
    }

    pub fn orchestrator(&self, options: OperatorOptions) -> Orchestrator {
        Orchestrator::new(self.config.clone(), options, self.control_plane.clone())
            .unwrap()
            .with_deployer(self.deployer.clone())
            .with_broker_check(self.broker_check.clone())
            .with_engine_check(self.engine_check.clone())
    }
}
