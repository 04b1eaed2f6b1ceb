//! Service instance records
//!
//! A ServiceInstance exists only once the upstream account and protection
//! service backing it have been created.

use crate::Params;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provisioned firewall instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Caller-chosen instance identifier
    pub instance_id: String,

    /// OSB service offering id
    pub service_id: String,

    /// OSB plan id
    pub plan_id: String,

    /// Platform context bag
    #[serde(default)]
    pub context: Params,

    /// Provisioning parameters
    #[serde(default)]
    pub parameters: Params,

    /// Identifiers of the resources created upstream
    pub upstream: UpstreamRefs,

    /// Management UI link returned to the platform
    pub dashboard_url: String,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

/// Upstream identifiers kept apart from the OSB `service_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamRefs {
    pub account_id: String,
    pub service_id: String,
}

/// Data needed to create an instance; the store stamps the timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewServiceInstance {
    pub service_id: String,
    pub plan_id: String,
    pub context: Params,
    pub parameters: Params,
    pub upstream: UpstreamRefs,
    pub dashboard_url: String,
}

impl NewServiceInstance {
    /// Materialize the record under `instance_id` at time `now`.
    pub fn into_instance(self, instance_id: &str, now: DateTime<Utc>) -> ServiceInstance {
        ServiceInstance {
            instance_id: instance_id.to_string(),
            service_id: self.service_id,
            plan_id: self.plan_id,
            context: self.context,
            parameters: self.parameters,
            upstream: self.upstream,
            dashboard_url: self.dashboard_url,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied by `PATCH`.
///
/// Top-level fields replace the stored value when present. `parameters` is
/// merged key by key so unrelated keys survive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstancePatch {
    pub plan_id: Option<String>,
    pub context: Option<Params>,
    pub parameters: Option<Params>,
}

impl InstancePatch {
    pub fn is_empty(&self) -> bool {
        self.plan_id.is_none() && self.context.is_none() && self.parameters.is_none()
    }
}

impl ServiceInstance {
    /// Whether a request naming `(service_id, plan_id)` matches this record.
    pub fn matches(&self, service_id: &str, plan_id: &str) -> bool {
        self.service_id == service_id && self.plan_id == plan_id
    }

    /// Apply a partial update and stamp `updated_at`.
    pub fn apply(&mut self, patch: InstancePatch, now: DateTime<Utc>) {
        if let Some(plan_id) = patch.plan_id {
            self.plan_id = plan_id;
        }
        if let Some(context) = patch.context {
            self.context = context;
        }
        if let Some(parameters) = patch.parameters {
            for (key, value) in parameters {
                self.parameters.insert(key, value);
            }
        }
        self.updated_at = now;
    }
}
