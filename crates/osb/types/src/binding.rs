//! Service binding records
//!
//! Binding this service creates a named contact user on the upstream account
//! that owns the instance; the credentials identify that user.

use crate::Params;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A binding scoped to one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBinding {
    /// Caller-chosen binding identifier, unique across the store
    pub binding_id: String,

    /// Owning instance
    pub instance_id: String,

    pub service_id: String,
    pub plan_id: String,

    /// Opaque `bind_resource` as sent by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<serde_json::Value>,

    #[serde(default)]
    pub parameters: Params,

    pub credentials: BindingCredentials,

    /// Contact user id on the upstream side
    pub upstream_user_id: String,

    pub created_at: DateTime<Utc>,
}

/// Credentials handed back to the platform on bind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingCredentials {
    pub user_id: String,
    pub email: String,
    pub account_id: String,
}

/// Data needed to create a binding; the store stamps `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewServiceBinding {
    pub service_id: String,
    pub plan_id: String,
    pub bind_resource: Option<serde_json::Value>,
    pub parameters: Params,
    pub credentials: BindingCredentials,
    pub upstream_user_id: String,
}

impl NewServiceBinding {
    pub fn into_binding(
        self,
        instance_id: &str,
        binding_id: &str,
        now: DateTime<Utc>,
    ) -> ServiceBinding {
        ServiceBinding {
            binding_id: binding_id.to_string(),
            instance_id: instance_id.to_string(),
            service_id: self.service_id,
            plan_id: self.plan_id,
            bind_resource: self.bind_resource,
            parameters: self.parameters,
            credentials: self.credentials,
            upstream_user_id: self.upstream_user_id,
            created_at: now,
        }
    }
}

impl ServiceBinding {
    pub fn matches(&self, service_id: &str, plan_id: &str) -> bool {
        self.service_id == service_id && self.plan_id == plan_id
    }
}
