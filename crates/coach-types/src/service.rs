//! Managed-service model
//!
//! Value types describing one dependent add-on as reported by the control
//! plane. A [`ManagedService`] is rebuilt from every fresh query and never
//! carries identity across runs beyond its [`ServiceId`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};

/// Stable identifier of a dependent service (the add-on slug)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hostname the service is reachable under on the internal network.
    ///
    /// The platform derives it from the slug by replacing underscores.
    pub fn hostname(&self) -> String {
        self.0.replace('_', "-")
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The part a service plays in the appliance stack
#[derive(
    Debug, Clone, Copy, Display, EnumString, IntoStaticStr, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    #[strum(serialize = "broker")]
    Broker,
    #[strum(serialize = "bridge")]
    Bridge,
    #[strum(serialize = "automation_engine")]
    AutomationEngine,
}

impl ServiceRole {
    /// Whether a failure of this role aborts the whole run
    pub fn essentiality(&self) -> Essentiality {
        match self {
            ServiceRole::Broker | ServiceRole::AutomationEngine => Essentiality::Essential,
            // the CAN hardware may legitimately be absent
            ServiceRole::Bridge => Essentiality::BestEffort,
        }
    }

    /// Default add-on slug for this role
    pub fn default_id(&self) -> ServiceId {
        match self {
            ServiceRole::Broker => ServiceId::new("core_mosquitto"),
            ServiceRole::Bridge => ServiceId::new("c2a8b1f0_can_mqtt_bridge"),
            ServiceRole::AutomationEngine => ServiceId::new("a0d7b954_nodered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Essentiality {
    Essential,
    BestEffort,
}

#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    #[strum(serialize = "absent")]
    Absent,
    #[strum(serialize = "installed")]
    Installed,
}

/// Run state as reported by the control plane
#[derive(Debug, Clone, Copy, Display, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[strum(serialize = "unknown")]
    Unknown,
    #[strum(serialize = "stopped")]
    Stopped,
    #[strum(serialize = "starting")]
    Starting,
    #[strum(serialize = "started")]
    Started,
}

impl RunState {
    /// Map the platform's state string onto the model.
    pub fn from_platform(state: Option<&str>) -> Self {
        match state {
            Some("started") => RunState::Started,
            Some("startup") => RunState::Starting,
            Some("stopped") | Some("error") => RunState::Stopped,
            _ => RunState::Unknown,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, RunState::Started)
    }
}

/// Persistent boot behaviour of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootPolicy {
    pub autostart: bool,
    pub watchdog: bool,
}

impl BootPolicy {
    pub fn new(autostart: bool, watchdog: bool) -> Self {
        Self {
            autostart,
            watchdog,
        }
    }

    /// Body accepted by the platform's options endpoint
    pub fn to_request_body(&self) -> Value {
        serde_json::json!({
            "boot": if self.autostart { "auto" } else { "manual" },
            "watchdog": self.watchdog,
        })
    }
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// Info payload returned by the control plane for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(default)]
    pub installed: Option<bool>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub boot: Option<String>,
    #[serde(default)]
    pub watchdog: Option<bool>,
}

impl ServiceInfo {
    /// `installed` when reported, otherwise inferred from a present version
    pub fn is_installed(&self) -> bool {
        self.installed.unwrap_or(self.version.is_some())
    }

    pub fn run_state(&self) -> RunState {
        RunState::from_platform(self.state.as_deref())
    }

    /// Boot policy, only when both halves are reported
    pub fn boot_policy(&self) -> Option<BootPolicy> {
        let autostart = match self.boot.as_deref()? {
            "auto" => true,
            "manual" => false,
            _ => return None,
        };
        Some(BootPolicy::new(autostart, self.watchdog?))
    }
}

/// One dependent service as observed by the latest query
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedService {
    pub id: ServiceId,
    pub role: ServiceRole,
    pub install_state: InstallState,
    pub run_state: RunState,
    pub version: Option<String>,
    pub configuration: Map<String, Value>,
    pub boot_policy: Option<BootPolicy>,
}

impl ManagedService {
    pub fn from_info(id: ServiceId, role: ServiceRole, info: ServiceInfo) -> Self {
        let install_state = if info.is_installed() {
            InstallState::Installed
        } else {
            InstallState::Absent
        };
        let run_state = info.run_state();
        let boot_policy = info.boot_policy();

        Self {
            id,
            role,
            install_state,
            run_state,
            version: info.version,
            configuration: info.options,
            boot_policy,
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.install_state, InstallState::Installed)
    }

    pub fn essentiality(&self) -> Essentiality {
        self.role.essentiality()
    }
}
