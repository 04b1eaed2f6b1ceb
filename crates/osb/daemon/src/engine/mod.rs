//! OSB protocol engine
//!
//! Validation and state-transition rules for every OSB verb. The engine owns
//! no records itself: everything goes through the injected [`Store`] and
//! [`ProvisioningApi`], and the synchronous path and detached jobs share the
//! same code.
//!
//! Lifecycle of an instance:
//!
//! ```text
//! absent -> provisioning? -> active -> updating? -> deprovisioning? -> absent
//! ```
//!
//! Bindings live strictly inside the active window.

mod bindings;
mod instances;
mod jobs;
mod locks;

pub use bindings::BindOutcome;
pub use instances::{DeprovisionOutcome, ProvisionOutcome};
pub use locks::{InstanceGuard, InstanceLocks};

use crate::config::{AsyncMode, BrokerConfig};
use crate::error::{BrokerError, BrokerResult};
use crate::storage::Store;
use osb_types::{LastOperationQuery, LastOperationResponse};
use osb_upstream::ProvisioningApi;
use std::sync::Arc;

/// The broker: protocol rules over a store and an upstream client
pub struct Broker {
    store: Arc<dyn Store>,
    upstream: Arc<dyn ProvisioningApi>,
    locks: InstanceLocks,
    config: BrokerConfig,
}

impl Broker {
    pub fn new(
        store: Arc<dyn Store>,
        upstream: Arc<dyn ProvisioningApi>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            store,
            upstream,
            locks: InstanceLocks::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn upstream(&self) -> &Arc<dyn ProvisioningApi> {
        &self.upstream
    }

    /// Report the state of a recorded operation
    pub async fn last_operation(
        &self,
        instance_id: &str,
        query: LastOperationQuery,
    ) -> BrokerResult<LastOperationResponse> {
        let operation_id = query
            .operation
            .filter(|op| !op.is_empty())
            .ok_or_else(|| {
                BrokerError::Validation("operation query parameter is required".to_string())
            })?;

        let operation = self
            .store
            .get_operation(&operation_id)
            .await?
            .filter(|op| op.instance_id == instance_id)
            .ok_or_else(|| {
                BrokerError::NotFound(format!("operation {} not found", operation_id))
            })?;

        Ok(LastOperationResponse {
            state: operation.state,
            description: operation.description,
        })
    }

    /// Whether this request runs in the background.
    ///
    /// `Required` mode refuses callers that cannot poll.
    fn run_async(&self, accepts_incomplete: bool) -> BrokerResult<bool> {
        match self.config.async_mode {
            AsyncMode::Disabled => Ok(false),
            AsyncMode::Optional => Ok(accepts_incomplete),
            AsyncMode::Required if accepts_incomplete => Ok(true),
            AsyncMode::Required => Err(BrokerError::AsyncRequired),
        }
    }

    fn dashboard_url(&self, instance_id: &str) -> String {
        format!(
            "{}/instances/{}",
            self.config.dashboard_base_url.trim_end_matches('/'),
            instance_id
        )
    }
}

/// Both ids of an OSB request, or a validation error naming what is missing
fn require_ids(
    service_id: Option<String>,
    plan_id: Option<String>,
) -> BrokerResult<(String, String)> {
    let service_id = service_id.filter(|s| !s.is_empty());
    let plan_id = plan_id.filter(|p| !p.is_empty());
    match (service_id, plan_id) {
        (Some(service_id), Some(plan_id)) => Ok((service_id, plan_id)),
        (None, _) => Err(BrokerError::Validation("service_id is required".to_string())),
        (_, None) => Err(BrokerError::Validation("plan_id is required".to_string())),
    }
}
