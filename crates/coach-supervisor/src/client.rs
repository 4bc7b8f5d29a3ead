//! Supervisor HTTP client

use crate::envelope::parse_response;
use crate::error::{ControlPlaneError, Result};
use crate::ControlPlane;
use async_trait::async_trait;
use coach_types::{BootPolicy, ServiceId, ServiceInfo};
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the Supervisor API
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the management API
    pub base_url: String,
    /// Bearer token issued by the platform
    pub token: Option<String>,
    /// Upper bound for any single request
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://supervisor".to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// [`ControlPlane`] implementation backed by the Supervisor REST API
#[derive(Clone)]
pub struct SupervisorClient {
    http: Client,
    config: ClientConfig,
}

impl SupervisorClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("coach/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ControlPlaneError::unreachable(
                    config.base_url.clone(),
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn call(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = self.url(path);
        debug!(%method, url = %url, "Calling control plane");

        let mut request = self.http.request(method, &url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ControlPlaneError::unreachable(url.clone(), e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| ControlPlaneError::unreachable(url.clone(), e.to_string()))?;

        parse_response(&url, status, &text)
    }

    async fn post_action(&self, id: &ServiceId, action: &str) -> Result<()> {
        info!(service = %id, action, "Requesting service action");
        self.call(Method::POST, &format!("/addons/{id}/{action}"), None)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ControlPlane for SupervisorClient {
    async fn query(&self, id: &ServiceId) -> Result<ServiceInfo> {
        let path = format!("/addons/{id}/info");
        let data = self.call(Method::GET, &path, None).await?;
        if data.is_null() {
            return Err(ControlPlaneError::unreachable(
                self.url(&path),
                "info response carried no data",
            ));
        }
        serde_json::from_value(data).map_err(|e| {
            ControlPlaneError::unreachable(self.url(&path), format!("malformed info data: {e}"))
        })
    }

    async fn install(&self, id: &ServiceId) -> Result<()> {
        info!(service = %id, "Installing service");
        self.call(Method::POST, &format!("/store/addons/{id}/install"), None)
            .await
            .map(|_| ())
    }

    async fn set_configuration(&self, id: &ServiceId, options: &Map<String, Value>) -> Result<()> {
        info!(service = %id, keys = options.len(), "Writing service options");
        let body = serde_json::json!({ "options": options });
        self.call(Method::POST, &format!("/addons/{id}/options"), Some(body))
            .await
            .map(|_| ())
    }

    async fn start(&self, id: &ServiceId) -> Result<()> {
        self.post_action(id, "start").await
    }

    async fn stop(&self, id: &ServiceId) -> Result<()> {
        self.post_action(id, "stop").await
    }

    async fn restart(&self, id: &ServiceId) -> Result<()> {
        self.post_action(id, "restart").await
    }

    async fn set_boot_policy(&self, id: &ServiceId, policy: BootPolicy) -> Result<()> {
        info!(
            service = %id,
            autostart = policy.autostart,
            watchdog = policy.watchdog,
            "Setting boot policy"
        );
        self.call(
            Method::POST,
            &format!("/addons/{id}/options"),
            Some(policy.to_request_body()),
        )
        .await
        .map(|_| ())
    }
}
