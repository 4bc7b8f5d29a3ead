//! Control-plane client for coach
//!
//! The host platform exposes every dependent service through a management
//! API. This crate wraps it behind the [`ControlPlane`] trait so the
//! orchestrator can be driven against the real Supervisor
//! ([`SupervisorClient`]) or an in-memory fake in tests.
//!
//! The client never retries: transport failures and malformed responses
//! surface as [`ControlPlaneError::Unreachable`] and the caller decides
//! whether to poll again.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::{ClientConfig, SupervisorClient};
pub use error::{ControlPlaneError, Result};

use async_trait::async_trait;
use coach_types::{BootPolicy, ServiceId, ServiceInfo};
use serde_json::{Map, Value};

/// Management operations on one dependent service
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the live info document of a service
    async fn query(&self, id: &ServiceId) -> Result<ServiceInfo>;

    /// Install a service from the store
    async fn install(&self, id: &ServiceId) -> Result<()>;

    /// Replace a service's options document
    async fn set_configuration(&self, id: &ServiceId, options: &Map<String, Value>) -> Result<()>;

    async fn start(&self, id: &ServiceId) -> Result<()>;

    async fn stop(&self, id: &ServiceId) -> Result<()>;

    async fn restart(&self, id: &ServiceId) -> Result<()>;

    /// Persist autostart and watchdog behaviour
    async fn set_boot_policy(&self, id: &ServiceId, policy: BootPolicy) -> Result<()>;
}
