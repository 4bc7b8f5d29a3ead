//! Readiness probing for dependent services
//!
//! A service that reports `started` is not necessarily usable. Checks come
//! in two levels: process-level (the control plane says it runs) and
//! protocol-level (the service answers its own protocol). Gating uses the
//! protocol level wherever one exists.

pub mod checks;
pub mod prober;

pub use checks::{BrokerCheck, HttpCheck, ProcessCheck};
pub use prober::{ProbeOutcome, ReadinessProber};

use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum Readiness {
    Ready,
    NotReady(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessLevel {
    Process,
    Protocol,
}

/// Result of one probe attempt
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub target: String,
    pub status: Readiness,
    pub response_time: Duration,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ProbeResult {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: Readiness::NotReady("not probed".to_string()),
            response_time: Duration::ZERO,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn ready(mut self) -> Self {
        self.status = Readiness::Ready;
        self
    }

    pub fn not_ready(mut self, reason: impl Into<String>) -> Self {
        self.status = Readiness::NotReady(reason.into());
        self
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = response_time;
        self
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status, Readiness::Ready)
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.status {
            Readiness::Ready => None,
            Readiness::NotReady(reason) => Some(reason),
        }
    }
}

/// Something that can tell whether a service is usable right now
#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// Human readable name used in logs and errors
    fn target(&self) -> &str;

    fn level(&self) -> ReadinessLevel;

    async fn probe(&self) -> ProbeResult;
}
