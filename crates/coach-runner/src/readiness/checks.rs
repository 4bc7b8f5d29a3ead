//! Concrete readiness checks

use super::{ProbeResult, ReadinessCheck, ReadinessLevel};
use crate::deploy::AdminAuth;
use async_trait::async_trait;
use coach_supervisor::ControlPlane;
use coach_types::{BrokerEndpoint, Credentials, ServiceId};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Process-level: a fresh control-plane query reports `started`
pub struct ProcessCheck {
    control_plane: Arc<dyn ControlPlane>,
    id: ServiceId,
    target: String,
}

impl ProcessCheck {
    pub fn new(control_plane: Arc<dyn ControlPlane>, id: ServiceId) -> Self {
        let target = id.to_string();
        Self {
            control_plane,
            id,
            target,
        }
    }
}

#[async_trait]
impl ReadinessCheck for ProcessCheck {
    fn target(&self) -> &str {
        &self.target
    }

    fn level(&self) -> ReadinessLevel {
        ReadinessLevel::Process
    }

    async fn probe(&self) -> ProbeResult {
        let start_time = Instant::now();
        let result = ProbeResult::new(self.target.clone());
        let result = match self.control_plane.query(&self.id).await {
            Ok(info) if info.run_state().is_started() => result.ready(),
            Ok(info) => result.not_ready(format!("run state is {}", info.run_state())),
            Err(e) => result.not_ready(e.to_string()),
        };
        result.with_response_time(start_time.elapsed())
    }
}

/// Protocol-level broker check: authenticate and get a QoS 1 publish acked
pub struct BrokerCheck {
    endpoint: BrokerEndpoint,
    credentials: Credentials,
    attempt_timeout: Duration,
    target: String,
}

impl BrokerCheck {
    pub fn new(endpoint: BrokerEndpoint, credentials: Credentials, attempt_timeout: Duration) -> Self {
        let target = format!("mqtt://{}:{}", endpoint.host, endpoint.port);
        Self {
            endpoint,
            credentials,
            attempt_timeout,
            target,
        }
    }

    async fn publish_once(&self) -> Result<(), String> {
        let client_id = format!("coach-probe-{}", Uuid::new_v4().simple());
        let mut options = MqttOptions::new(client_id, &self.endpoint.host, self.endpoint.port);
        options.set_credentials(&self.credentials.username, &self.credentials.password);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let topic = format!("coach/probe/{}", Uuid::new_v4());
        client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, b"ping".to_vec())
            .await
            .map_err(|e| format!("failed to queue probe publish: {e}"))?;

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => {
                    debug!(topic = %topic, "Broker acknowledged probe publish");
                    let _ = client.try_disconnect();
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

#[async_trait]
impl ReadinessCheck for BrokerCheck {
    fn target(&self) -> &str {
        &self.target
    }

    fn level(&self) -> ReadinessLevel {
        ReadinessLevel::Protocol
    }

    async fn probe(&self) -> ProbeResult {
        let start_time = Instant::now();
        let result = ProbeResult::new(self.target.clone());
        let result = match timeout(self.attempt_timeout, self.publish_once()).await {
            Ok(Ok(())) => result.ready(),
            Ok(Err(reason)) => result.not_ready(reason),
            Err(_) => result.not_ready(format!(
                "no publish acknowledgement within {}ms",
                self.attempt_timeout.as_millis()
            )),
        };
        result.with_response_time(start_time.elapsed())
    }
}

/// Protocol-level HTTP check: any non-error status counts as ready
pub struct HttpCheck {
    client: reqwest::Client,
    url: String,
    auth: AdminAuth,
}

impl HttpCheck {
    pub fn new(client: reqwest::Client, url: impl Into<String>, auth: AdminAuth) -> Self {
        Self {
            client,
            url: url.into(),
            auth,
        }
    }
}

#[async_trait]
impl ReadinessCheck for HttpCheck {
    fn target(&self) -> &str {
        &self.url
    }

    fn level(&self) -> ReadinessLevel {
        ReadinessLevel::Protocol
    }

    async fn probe(&self) -> ProbeResult {
        let start_time = Instant::now();
        let result = ProbeResult::new(self.url.clone());
        let request = self.auth.apply(self.client.get(&self.url));
        let result = match request.send().await {
            Ok(response)
                if !response.status().is_client_error() && !response.status().is_server_error() =>
            {
                result.ready()
            }
            Ok(response) => result.not_ready(format!("HTTP {}", response.status())),
            Err(e) => result.not_ready(format!("HTTP request failed: {e}")),
        };
        result.with_response_time(start_time.elapsed())
    }
}
