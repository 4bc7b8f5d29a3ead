//! Desired configuration documents
//!
//! Each dependent service gets a typed options document computed from the
//! operator settings and the active credentials. Documents render to the
//! JSON object the control plane accepts and know which of their keys are
//! material (always force an update-and-restart when they differ).

use crate::{Credentials, ServiceRole};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::str::FromStr;
use strum::{Display, EnumString};

/// CAN bus bitrate accepted by the bridge
#[derive(Debug, Clone, Copy, Default, Display, EnumString, PartialEq, Eq, Hash)]
pub enum BusSpeed {
    #[strum(serialize = "125000")]
    Kbps125,
    #[default]
    #[strum(serialize = "250000")]
    Kbps250,
    #[strum(serialize = "500000")]
    Kbps500,
    #[strum(serialize = "1000000")]
    Kbps1000,
}

impl Serialize for BusSpeed {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BusSpeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        let raw = match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text,
            Raw::Number(number) => number.to_string(),
        };
        BusSpeed::from_str(raw.trim())
            .map_err(|_| serde::de::Error::custom(format!("unsupported CAN bitrate: {raw}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Broker customization directory switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customize {
    pub active: bool,
    pub folder: String,
}

impl Default for Customize {
    fn default() -> Self {
        Self {
            active: false,
            folder: "mosquitto".to_string(),
        }
    }
}

/// Broker (Mosquitto) options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOptions {
    pub logins: Vec<Login>,
    pub require_certificate: bool,
    pub certfile: String,
    pub keyfile: String,
    pub customize: Customize,
    /// Usernames of earlier coach pairs to drop from the live logins
    #[serde(skip)]
    pub retired_logins: Vec<String>,
}

impl BrokerOptions {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            logins: vec![Login {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            }],
            require_certificate: false,
            certfile: "fullchain.pem".to_string(),
            keyfile: "privkey.pem".to_string(),
            customize: Customize::default(),
            retired_logins: Vec::new(),
        }
    }

    /// Remove the login of a pair being rotated out, unless it shares the new username
    pub fn retire(mut self, previous: Option<&Credentials>) -> Self {
        if let Some(previous) = previous {
            if self.logins.iter().all(|l| l.username != previous.username) {
                self.retired_logins.push(previous.username.clone());
            }
        }
        self
    }
}

/// Bridge (CAN to MQTT) options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeOptions {
    pub can_interface: String,
    pub can_bitrate: BusSpeed,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub mqtt_topic_raw: String,
    pub mqtt_topic_send: String,
    pub mqtt_topic_status: String,
    pub debug_logging: bool,
}

impl BridgeOptions {
    pub fn new(
        can_interface: impl Into<String>,
        can_bitrate: BusSpeed,
        broker: &BrokerEndpoint,
        credentials: &Credentials,
        debug_logging: bool,
    ) -> Self {
        Self {
            can_interface: can_interface.into(),
            can_bitrate,
            mqtt_host: broker.host.clone(),
            mqtt_port: broker.port,
            mqtt_user: credentials.username.clone(),
            mqtt_pass: credentials.password.clone(),
            mqtt_topic_raw: "can/raw".to_string(),
            mqtt_topic_send: "can/send".to_string(),
            mqtt_topic_status: "can/status".to_string(),
            debug_logging,
        }
    }
}

/// Automation engine (Node-RED) options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOptions {
    pub credential_secret: String,
    pub ssl: bool,
    pub certfile: String,
    pub keyfile: String,
    pub init_commands: Vec<String>,
    pub env_vars: Vec<EnvVar>,
    pub system_packages: Vec<String>,
    pub npm_packages: Vec<String>,
}

impl EngineOptions {
    pub const ENV_MQTT_HOST: &'static str = "MQTT_HOST";
    pub const ENV_MQTT_PORT: &'static str = "MQTT_PORT";
    pub const ENV_MQTT_USER: &'static str = "MQTT_USER";
    pub const ENV_MQTT_PASS: &'static str = "MQTT_PASS";

    pub fn new(
        credential_secret: impl Into<String>,
        init_commands: Vec<String>,
        broker: &BrokerEndpoint,
        credentials: &Credentials,
    ) -> Self {
        Self {
            credential_secret: credential_secret.into(),
            ssl: false,
            certfile: "fullchain.pem".to_string(),
            keyfile: "privkey.pem".to_string(),
            init_commands,
            env_vars: vec![
                EnvVar::new(Self::ENV_MQTT_HOST, broker.host.clone()),
                EnvVar::new(Self::ENV_MQTT_PORT, broker.port.to_string()),
                EnvVar::new(Self::ENV_MQTT_USER, credentials.username.clone()),
                EnvVar::new(Self::ENV_MQTT_PASS, credentials.password.clone()),
            ],
            system_packages: Vec::new(),
            npm_packages: Vec::new(),
        }
    }
}

/// Where consumers reach the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for BrokerEndpoint {
    fn default() -> Self {
        Self {
            host: "core-mosquitto".to_string(),
            port: 1883,
        }
    }
}

/// How an array-valued option is reconciled with the live array, so entries
/// the operator added themselves are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMerge {
    /// Objects identified by this field; a desired entry replaces the live
    /// entry with the same identity
    KeyedBy(&'static str),
    /// Plain values; missing desired entries are appended
    Union,
}

/// Desired configuration of one service
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredDocument {
    Broker(BrokerOptions),
    Bridge(BridgeOptions),
    Engine(EngineOptions),
}

impl DesiredDocument {
    pub fn role(&self) -> ServiceRole {
        match self {
            DesiredDocument::Broker(_) => ServiceRole::Broker,
            DesiredDocument::Bridge(_) => ServiceRole::Bridge,
            DesiredDocument::Engine(_) => ServiceRole::AutomationEngine,
        }
    }

    /// Keys that are compared by exact equality and always force an update
    pub fn material_keys(&self) -> &'static [&'static str] {
        match self {
            DesiredDocument::Broker(_) => &["logins"],
            DesiredDocument::Bridge(_) => &["mqtt_user", "mqtt_pass"],
            DesiredDocument::Engine(_) => &["init_commands", "env_vars"],
        }
    }

    /// Merge rule for array keys that may also hold operator entries
    pub fn list_merge(&self, key: &str) -> Option<ListMerge> {
        match (self, key) {
            (DesiredDocument::Broker(_), "logins") => Some(ListMerge::KeyedBy("username")),
            (DesiredDocument::Engine(_), "env_vars") => Some(ListMerge::KeyedBy("name")),
            (
                DesiredDocument::Engine(_),
                "init_commands" | "npm_packages" | "system_packages",
            ) => Some(ListMerge::Union),
            _ => None,
        }
    }

    /// Identities under a keyed array that must no longer be live
    pub fn retired(&self, key: &str) -> &[String] {
        match (self, key) {
            (DesiredDocument::Broker(options), "logins") => options.retired_logins.as_slice(),
            _ => &[],
        }
    }

    /// Render to the JSON object sent to the control plane
    pub fn render(&self) -> Map<String, Value> {
        let value = match self {
            DesiredDocument::Broker(options) => serde_json::to_value(options),
            DesiredDocument::Bridge(options) => serde_json::to_value(options),
            DesiredDocument::Engine(options) => serde_json::to_value(options),
        };
        match value {
            Ok(Value::Object(map)) => map,
            // plain structs of strings, bools and numbers always serialize to objects
            _ => Map::new(),
        }
    }
}

/// Every credential pair a live document of `role` carries
pub fn credentials_in(role: ServiceRole, live: &Map<String, Value>) -> Vec<Credentials> {
    match role {
        ServiceRole::Broker => live
            .get("logins")
            .and_then(Value::as_array)
            .map(|logins| {
                logins
                    .iter()
                    .filter_map(|login| {
                        Some(Credentials::new(
                            login.get("username")?.as_str()?,
                            login.get("password")?.as_str()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ServiceRole::Bridge => {
            let user = live.get("mqtt_user").and_then(Value::as_str);
            let pass = live.get("mqtt_pass").and_then(Value::as_str);
            match (user, pass) {
                (Some(user), Some(pass)) => vec![Credentials::new(user, pass)],
                _ => Vec::new(),
            }
        }
        ServiceRole::AutomationEngine => {
            let vars: Vec<EnvVar> = live
                .get("env_vars")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            let lookup = |name: &str| {
                vars.iter()
                    .find(|var| var.name == name)
                    .map(|var| var.value.clone())
            };
            match (
                lookup(EngineOptions::ENV_MQTT_USER),
                lookup(EngineOptions::ENV_MQTT_PASS),
            ) {
                (Some(user), Some(pass)) => vec![Credentials::new(user, pass)],
                _ => Vec::new(),
            }
        }
    }
}
