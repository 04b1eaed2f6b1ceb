//! Application state for API handlers

use crate::engine::Broker;
use crate::storage::Store;
use osb_types::Catalog;
use osb_upstream::ProvisioningApi;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Protocol engine
    pub broker: Arc<Broker>,

    /// Catalog served from `/v2/catalog`
    pub catalog: Arc<Catalog>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(broker: Arc<Broker>, catalog: Catalog) -> Self {
        Self {
            broker,
            catalog: Arc::new(catalog),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.broker.store()
    }

    pub fn upstream(&self) -> &Arc<dyn ProvisioningApi> {
        self.broker.upstream()
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let duration = chrono::Utc::now() - self.started_at;
        let secs = duration.num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else if secs < 86400 {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        } else {
            format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
        }
    }
}
