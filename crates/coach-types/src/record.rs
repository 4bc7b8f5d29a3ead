use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable "is this resource under our management" record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Resource is under this system's management
    pub managed: bool,
    /// Orchestrator version that last converged the resource
    pub version: String,
    /// When the resource was last converged
    pub last_update: DateTime<Utc>,
}

impl RunRecord {
    /// Record stamped with the given version at the current time
    pub fn managed_now(version: impl Into<String>) -> Self {
        Self {
            managed: true,
            version: version.into(),
            last_update: Utc::now(),
        }
    }

    pub fn is_managed(record: Option<&RunRecord>) -> bool {
        record.is_some_and(|r| r.managed)
    }
}
