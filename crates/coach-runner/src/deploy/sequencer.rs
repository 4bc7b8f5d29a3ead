//! Node-RED admin API deployer

use super::flows::{is_fully_wired, wire_broker_nodes, BrokerWiring, FlowSet};
use super::{AdminAuth, DeployOutcome, FlowDeployer};
use crate::config::PollBudget;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

const API_VERSION_HEADER: &str = "Node-RED-API-Version";
const DEPLOYMENT_TYPE_HEADER: &str = "Node-RED-Deployment-Type";

/// Deploys wired flows through `GET`/`POST /flows`
#[derive(Debug, Clone)]
pub struct DeploymentSequencer {
    client: Client,
    base_url: String,
    auth: AdminAuth,
    budget: PollBudget,
}

impl DeploymentSequencer {
    pub fn new(client: Client, base_url: impl Into<String>, auth: AdminAuth, budget: PollBudget) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
            budget,
        }
    }

    fn flows_url(&self) -> String {
        format!("{}/flows", self.base_url.trim_end_matches('/'))
    }

    async fn fetch(&self) -> Result<FlowSet, String> {
        let response = self
            .auth
            .apply(self.client.get(self.flows_url()))
            .header(API_VERSION_HEADER, "v2")
            .send()
            .await
            .map_err(|e| format!("GET /flows failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET /flows returned HTTP {status}"));
        }
        response
            .json::<FlowSet>()
            .await
            .map_err(|e| format!("GET /flows returned an unexpected document: {e}"))
    }

    async fn submit(&self, flows: &FlowSet) -> Result<(StatusCode, String), String> {
        let response = self
            .auth
            .apply(self.client.post(self.flows_url()))
            .header(API_VERSION_HEADER, "v2")
            .header(DEPLOYMENT_TYPE_HEADER, "full")
            .json(flows)
            .send()
            .await
            .map_err(|e| format!("POST /flows failed: {e}"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    /// Wait for an accepted deployment to become visible
    async fn confirm(&self, previous_rev: Option<&str>, wiring: &BrokerWiring) -> DeployOutcome {
        for attempt in 1..=self.budget.attempts {
            tokio::time::sleep(self.budget.interval).await;
            match self.fetch().await {
                Ok(current)
                    if current.rev.as_deref() != previous_rev
                        && is_fully_wired(&current.flows, wiring) =>
                {
                    info!(attempt, rev = current.rev.as_deref().unwrap_or_default(), "Deployment confirmed");
                    return DeployOutcome::Applied;
                }
                Ok(_) => debug!(attempt, "Deployment still pending"),
                Err(e) => debug!(attempt, error = %e, "Deployment check failed"),
            }
        }
        DeployOutcome::Timeout {
            attempts: self.budget.attempts,
        }
    }
}

#[async_trait]
impl FlowDeployer for DeploymentSequencer {
    async fn deploy(&self, wiring: &BrokerWiring) -> DeployOutcome {
        let mut flows = match self.fetch().await {
            Ok(flows) => flows,
            Err(reason) => {
                warn!(%reason, "Could not read current flows");
                return DeployOutcome::Failed { reason };
            }
        };
        let previous_rev = flows.rev.clone();

        if !wire_broker_nodes(&mut flows.flows, wiring) {
            info!("Flows already wired to the broker, skipping deployment");
            return DeployOutcome::Unchanged;
        }

        info!(nodes = flows.flows.len(), "Submitting wired flows");
        let (status, body) = match self.submit(&flows).await {
            Ok(answer) => answer,
            Err(reason) => {
                warn!(%reason, "Flow submission failed");
                return DeployOutcome::Failed { reason };
            }
        };

        let outcome = match status {
            StatusCode::OK | StatusCode::NO_CONTENT => DeployOutcome::Applied,
            StatusCode::ACCEPTED => {
                info!("Deployment accepted, waiting for it to apply");
                self.confirm(previous_rev.as_deref(), wiring).await
            }
            other => DeployOutcome::Rejected {
                status: other.as_u16(),
                message: body.trim().to_string(),
            },
        };

        match &outcome {
            DeployOutcome::Applied => info!("Flows deployed"),
            other => warn!(outcome = ?other, "Flow deployment did not complete"),
        }
        outcome
    }
}
