//! Provisioning contract consumed by the broker engine

use crate::error::UpstreamResult;
use async_trait::async_trait;
use osb_types::Params;
use serde::{Deserialize, Serialize};

/// Tenant account to create for a new instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    /// Broker-side instance id, recorded upstream for traceability
    pub external_id: String,
    pub plan_id: String,
    #[serde(default)]
    pub context: Params,
}

/// Protection service to create under an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub account_id: String,
    pub name: String,
    pub plan_id: String,
    #[serde(default)]
    pub parameters: Params,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Lifecycle intents against the upstream provisioning service.
///
/// Both the synchronous request path and detached jobs go through this one
/// contract.
#[async_trait]
pub trait ProvisioningApi: Send + Sync {
    async fn create_account(&self, request: &CreateAccountRequest)
        -> UpstreamResult<AccountRecord>;

    async fn create_service(&self, request: &CreateServiceRequest)
        -> UpstreamResult<ServiceRecord>;

    async fn delete_service(&self, service_id: &str) -> UpstreamResult<()>;

    async fn delete_account(&self, account_id: &str) -> UpstreamResult<()>;

    /// Create a named contact user on `account_id`
    async fn create_contact_user(
        &self,
        account_id: &str,
        email: &str,
        extra: &Params,
    ) -> UpstreamResult<UserRecord>;

    async fn delete_contact_user(&self, user_id: &str) -> UpstreamResult<()>;

    /// Move an upstream service to `new_plan_id`
    async fn update_plan(
        &self,
        service_id: &str,
        new_plan_id: &str,
        extra: &Params,
    ) -> UpstreamResult<ServiceRecord>;

    /// Side-effect-free connectivity check, for health reporting only
    async fn ping(&self) -> bool;
}
