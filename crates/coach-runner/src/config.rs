//! Runner and operator configuration
//!
//! `RunnerConfig` holds deployment wiring (endpoints, paths, poll budgets)
//! and follows the usual precedence: defaults, then environment, then CLI
//! flags applied by the binary. `OperatorOptions` is what the operator set
//! in the add-on configuration page, optionally overlaid by the settings
//! file written from the sidebar.

use crate::deploy::AdminAuth;
use crate::error::{OrchestratorError, Result};
use coach_types::{BrokerEndpoint, BusSpeed, Credentials, ServiceId, ServiceRole};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// A bounded poll loop: how many tries and how long between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

/// Configuration for one orchestrator run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base URL of the Supervisor API
    pub supervisor_url: String,

    /// Bearer token injected by the platform
    pub supervisor_token: Option<String>,

    /// Upper bound for any single control-plane request
    pub request_timeout: Duration,

    /// Operator options written by the platform
    pub options_path: PathBuf,

    /// Optional settings overlay written by the sidebar UI
    pub settings_path: PathBuf,

    /// Directory holding the run record and credential files
    pub state_dir: PathBuf,

    pub broker_id: ServiceId,
    pub bridge_id: ServiceId,
    pub engine_id: ServiceId,

    /// Where consumers (and the readiness probe) reach the broker
    pub broker_endpoint: BrokerEndpoint,

    /// Automation engine admin API base URL
    pub engine_admin_url: String,
    pub engine_admin_auth: AdminAuth,

    /// Init directive installed into the automation engine
    pub engine_init_commands: Vec<String>,

    /// Waiting for a service to report `started`
    pub run_state_budget: PollBudget,

    /// Protocol-level readiness of the essential services
    pub readiness_budget: PollBudget,

    /// Waiting for an accepted-but-pending flow deployment
    pub deploy_budget: PollBudget,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let engine_id = ServiceRole::AutomationEngine.default_id();
        Self {
            supervisor_url: "http://supervisor".to_string(),
            supervisor_token: None,
            request_timeout: Duration::from_secs(30),
            options_path: PathBuf::from("/data/options.json"),
            settings_path: PathBuf::from("/data/librecoach-settings.json"),
            state_dir: PathBuf::from("/data"),
            broker_id: ServiceRole::Broker.default_id(),
            bridge_id: ServiceRole::Bridge.default_id(),
            engine_admin_url: format!("http://{}:1880", engine_id.hostname()),
            engine_id,
            broker_endpoint: BrokerEndpoint::default(),
            engine_admin_auth: AdminAuth::None,
            engine_init_commands: vec![
                "npm install --no-audit --no-fund node-red-dashboard".to_string(),
            ],
            run_state_budget: PollBudget::new(30, Duration::from_secs(2)),
            readiness_budget: PollBudget::new(30, Duration::from_secs(2)),
            deploy_budget: PollBudget::new(10, Duration::from_secs(2)),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env_string(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_string("SUPERVISOR_URL") {
            config.supervisor_url = url;
        }
        config.supervisor_token = env_string("SUPERVISOR_TOKEN");

        if let Some(secs) = env_parse::<u64>("COACH_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = env_string("COACH_OPTIONS_PATH") {
            config.options_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("COACH_SETTINGS_PATH") {
            config.settings_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("COACH_STATE_DIR") {
            config.state_dir = PathBuf::from(path);
        }

        if let Some(host) = env_string("COACH_BROKER_HOST") {
            config.broker_endpoint.host = host;
        }
        if let Some(port) = env_parse("COACH_BROKER_PORT") {
            config.broker_endpoint.port = port;
        }

        if let Some(url) = env_string("COACH_ENGINE_ADMIN_URL") {
            config.engine_admin_url = url;
        }
        if let Some(token) = env_string("COACH_ENGINE_ADMIN_TOKEN") {
            config.engine_admin_auth = AdminAuth::Bearer { token };
        } else if let (Some(username), Some(password)) = (
            env_string("COACH_ENGINE_ADMIN_USER"),
            env_string("COACH_ENGINE_ADMIN_PASSWORD"),
        ) {
            config.engine_admin_auth = AdminAuth::Basic { username, password };
        }

        if let Some(attempts) = env_parse("COACH_READINESS_ATTEMPTS") {
            config.readiness_budget.attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("COACH_READINESS_INTERVAL_MS") {
            config.readiness_budget.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse("COACH_RUN_STATE_ATTEMPTS") {
            config.run_state_budget.attempts = attempts;
        }
        if let Some(ms) = env_parse::<u64>("COACH_RUN_STATE_INTERVAL_MS") {
            config.run_state_budget.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse("COACH_DEPLOY_ATTEMPTS") {
            config.deploy_budget.attempts = attempts;
        }

        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.supervisor_url.trim().is_empty() {
            return Err(OrchestratorError::config("supervisor_url cannot be empty"));
        }

        if self.request_timeout.is_zero() {
            return Err(OrchestratorError::config(
                "request_timeout must be greater than 0",
            ));
        }

        if self.state_dir.as_os_str().is_empty() {
            return Err(OrchestratorError::config("state_dir cannot be empty"));
        }

        let ids = [&self.broker_id, &self.bridge_id, &self.engine_id];
        for (i, id) in ids.iter().enumerate() {
            if id.as_str().is_empty() {
                return Err(OrchestratorError::config("service ids cannot be empty"));
            }
            if ids[i + 1..].contains(id) {
                return Err(OrchestratorError::config(format!(
                    "service id {id} is assigned to more than one role"
                )));
            }
        }

        if self.broker_endpoint.port == 0 {
            return Err(OrchestratorError::config("broker port must be greater than 0"));
        }

        for (name, budget) in [
            ("run_state", self.run_state_budget),
            ("readiness", self.readiness_budget),
            ("deploy", self.deploy_budget),
        ] {
            if budget.attempts == 0 {
                return Err(OrchestratorError::config(format!(
                    "{name} attempts must be greater than 0"
                )));
            }
        }

        Ok(())
    }

    pub fn service_id(&self, role: ServiceRole) -> &ServiceId {
        match role {
            ServiceRole::Broker => &self.broker_id,
            ServiceRole::Bridge => &self.bridge_id,
            ServiceRole::AutomationEngine => &self.engine_id,
        }
    }

    pub fn run_record_path(&self) -> PathBuf {
        self.state_dir.join("coach-run-record.json")
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join("coach-credentials.json")
    }
}

/// Settings the operator controls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorOptions {
    pub can_interface: String,
    pub can_bitrate: BusSpeed,
    pub debug_logging: bool,
    /// Allow replacing the flows of an automation engine coach did not install
    pub confirm_nodered_takeover: bool,
    pub mqtt_user: Option<String>,
    pub mqtt_pass: Option<String>,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        Self {
            can_interface: "can0".to_string(),
            can_bitrate: BusSpeed::default(),
            debug_logging: false,
            confirm_nodered_takeover: false,
            mqtt_user: None,
            mqtt_pass: None,
        }
    }
}

const OVERLAY_BOOL_KEYS: &[&str] = &["debug_logging", "confirm_nodered_takeover"];
const OVERLAY_TEXT_KEYS: &[&str] = &["can_interface", "can_bitrate", "mqtt_user", "mqtt_pass"];

impl OperatorOptions {
    /// Load `/data/options.json` and apply the settings overlay if present
    pub fn load(options_path: &Path, settings_path: &Path) -> Result<Self> {
        let mut merged = match std::fs::read_to_string(options_path) {
            Ok(text) => parse_object(&text).map_err(|e| {
                OrchestratorError::config(format!(
                    "{} is not a valid options document: {e}",
                    options_path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %options_path.display(), "No options file, using defaults");
                Map::new()
            }
            Err(e) => return Err(OrchestratorError::state(options_path, e)),
        };

        match std::fs::read_to_string(settings_path) {
            Ok(text) => match parse_object(&text) {
                Ok(overlay) => apply_overlay(&mut merged, overlay),
                Err(e) => {
                    warn!(path = %settings_path.display(), error = %e, "Ignoring unreadable settings overlay")
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %settings_path.display(), error = %e, "Ignoring unreadable settings overlay")
            }
        }

        serde_json::from_value(Value::Object(merged))
            .map_err(|e| OrchestratorError::config(format!("invalid operator options: {e}")))
    }

    /// Credentials the operator supplied explicitly, if both halves are set
    pub fn operator_credentials(&self) -> Option<Credentials> {
        let user = self.mqtt_user.as_deref().map(str::trim).unwrap_or_default();
        let pass = self.mqtt_pass.as_deref().unwrap_or_default();
        if user.is_empty() || pass.is_empty() {
            return None;
        }
        Some(Credentials::new(user, pass))
    }
}

fn parse_object(text: &str) -> std::result::Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Known keys only; the overlay wins and loose types are coerced
fn apply_overlay(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        if OVERLAY_BOOL_KEYS.contains(&key.as_str()) {
            let flag = match &value {
                Value::Bool(b) => *b,
                Value::String(s) => s.eq_ignore_ascii_case("true"),
                Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
                _ => false,
            };
            base.insert(key, Value::Bool(flag));
        } else if OVERLAY_TEXT_KEYS.contains(&key.as_str()) {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                other => other.to_string(),
            };
            base.insert(key, Value::String(text));
        } else {
            debug!(key, "Ignoring unknown settings overlay key");
        }
    }
}
