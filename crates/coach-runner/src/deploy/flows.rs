//! Broker wiring inside a Node-RED flow document

use coach_types::{BrokerEndpoint, Credentials};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const BROKER_NODE_TYPE: &str = "mqtt-broker";
const DEFAULT_BROKER_NODE_ID: &str = "coach_mqtt_broker";
/// Node property recording which credential pair was wired in. The engine
/// never returns `credentials` on read, so this is what makes re-runs quiet.
const CREDENTIAL_TAG: &str = "coachCredentialTag";

/// Flow document in the v2 admin API shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub flows: Vec<Value>,
}

/// Broker target every `mqtt-broker` config node must carry
#[derive(Debug, Clone)]
pub struct BrokerWiring {
    pub endpoint: BrokerEndpoint,
    pub credentials: Credentials,
    tag: String,
}

impl BrokerWiring {
    /// `tag_key` is a per-install secret; the stored tag is keyed with it so
    /// flows.json reveals nothing about the password.
    pub fn new(endpoint: BrokerEndpoint, credentials: Credentials, tag_key: &str) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            tag_key,
            credentials.username.as_str(),
            credentials.password.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        let tag = format!("{:x}", hasher.finalize());
        Self {
            endpoint,
            credentials,
            tag,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

fn is_broker_node(node: &Value) -> bool {
    node.get("type").and_then(Value::as_str) == Some(BROKER_NODE_TYPE)
}

fn is_wired(node: &Value, wiring: &BrokerWiring) -> bool {
    let port = wiring.endpoint.port.to_string();
    node.get("broker").and_then(Value::as_str) == Some(wiring.endpoint.host.as_str())
        && node.get("port").and_then(Value::as_str) == Some(port.as_str())
        && node.get(CREDENTIAL_TAG).and_then(Value::as_str) == Some(wiring.tag())
}

/// Whether every broker config node already carries `wiring`
pub fn is_fully_wired(flows: &[Value], wiring: &BrokerWiring) -> bool {
    let mut brokers = flows.iter().filter(|n| is_broker_node(n)).peekable();
    brokers.peek().is_some() && brokers.all(|n| is_wired(n, wiring))
}

/// Point every `mqtt-broker` config node at the broker with the active
/// credentials, adding one if the flows have none. Returns whether anything
/// changed.
pub fn wire_broker_nodes(flows: &mut Vec<Value>, wiring: &BrokerWiring) -> bool {
    if !flows.iter().any(is_broker_node) {
        flows.push(json!({
            "id": DEFAULT_BROKER_NODE_ID,
            "type": BROKER_NODE_TYPE,
            "name": "LibreCoach broker",
            "clientid": "",
            "usetls": false,
            "protocolVersion": "4",
            "keepalive": "60",
            "cleansession": true,
        }));
    }

    let mut changed = false;
    for node in flows.iter_mut().filter(|n| is_broker_node(n)) {
        if is_wired(node, wiring) {
            continue;
        }
        if let Value::Object(fields) = node {
            fields.insert("broker".into(), json!(wiring.endpoint.host));
            fields.insert("port".into(), json!(wiring.endpoint.port.to_string()));
            fields.insert(CREDENTIAL_TAG.into(), json!(wiring.tag()));
            fields.insert(
                "credentials".into(),
                json!({"user": wiring.credentials.username, "password": wiring.credentials.password}),
            );
            changed = true;
        }
    }
    changed
}
