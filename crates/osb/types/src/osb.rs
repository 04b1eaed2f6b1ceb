//! OSB v2.12 request and response bodies
//!
//! Required ids are modelled as `Option` so that their absence is reported as
//! a broker validation error instead of a deserialization failure.

use crate::{BindingCredentials, OperationState, Params};
use serde::{Deserialize, Serialize};

/// `PUT /v2/service_instances/{id}` body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub context: Option<Params>,
    #[serde(default)]
    pub parameters: Option<Params>,
}

/// `?accepts_incomplete=` on provision and update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvisionQuery {
    #[serde(default)]
    pub accepts_incomplete: bool,
}

/// `PATCH /v2/service_instances/{id}` body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Params>,
    #[serde(default)]
    pub previous_values: Option<serde_json::Value>,
    #[serde(default)]
    pub context: Option<Params>,
}

/// `DELETE /v2/service_instances/{id}` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeprovisionQuery {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub accepts_incomplete: bool,
}

/// `GET .../last_operation` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastOperationQuery {
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/// `PUT .../service_bindings/{id}` body
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BindRequest {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub bind_resource: Option<serde_json::Value>,
    #[serde(default)]
    pub parameters: Option<Params>,
}

/// `DELETE .../service_bindings/{id}` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnbindQuery {
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/// Provision response: `dashboard_url` on 200/201, `operation` on 202
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// 202 body for an accepted deprovision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResponse {
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperationResponse {
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindResponse {
    pub credentials: BindingCredentials,
}

/// The `{}` body OSB expects on synchronous update, deprovision and unbind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// Error body; `error` carries the OSB machine-readable code when one applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub description: String,
}
