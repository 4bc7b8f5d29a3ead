//! Response envelope normalization
//!
//! Every control-plane answer looks like
//! `{"result": "ok" | "error", "message": "...", "data": {...}}`.

use crate::error::{ControlPlaneError, Result};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Envelope {
    result: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// Turn a raw HTTP answer into the `data` payload or a typed failure
pub fn parse_response(endpoint: &str, status: u16, body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Err(ControlPlaneError::unreachable(
            endpoint,
            format!("empty response body (HTTP {status})"),
        ));
    }

    let envelope: Envelope = serde_json::from_str(body).map_err(|e| {
        ControlPlaneError::unreachable(endpoint, format!("malformed response (HTTP {status}): {e}"))
    })?;

    if envelope.result == "ok" && (200..300).contains(&status) {
        return Ok(envelope.data.unwrap_or(Value::Null));
    }

    let message = envelope
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("request failed with result '{}'", envelope.result));
    Err(ControlPlaneError::api(status, message))
}
