//! OSB Types - Core types for the web-application-firewall service broker
//!
//! The broker exposes the firewall product through the Open Service Broker
//! (OSB) v2.12 contract. This crate holds the records the broker keeps about
//! each lifecycle resource and the JSON shapes exchanged with the platform.
//!
//! ## Key Concepts
//!
//! - **ServiceInstance**: one provisioned unit, keyed by a caller-chosen id
//! - **ServiceBinding**: a named contact user granted on one instance
//! - **Operation**: handle for an asynchronous provision or deprovision
//! - **Catalog**: the static service/plan listing advertised to the platform

#![deny(unsafe_code)]

pub mod binding;
pub mod catalog;
pub mod instance;
pub mod operation;
pub mod osb;
pub mod retry;

/// Opaque key-value bag passed through from the platform (`context`,
/// `parameters`).
pub type Params = serde_json::Map<String, serde_json::Value>;

pub use binding::{BindingCredentials, NewServiceBinding, ServiceBinding};
pub use catalog::{Catalog, ServiceOffering, ServicePlan};
pub use instance::{InstancePatch, NewServiceInstance, ServiceInstance, UpstreamRefs};
pub use operation::{NewOperation, Operation, OperationState, OperationType, ParseStateError};
pub use osb::{
    BindRequest, BindResponse, DeprovisionQuery, EmptyResponse, ErrorBody, LastOperationQuery,
    LastOperationResponse, OperationResponse, ProvisionQuery, ProvisionRequest,
    ProvisionResponse, UnbindQuery, UpdateRequest,
};
pub use retry::RetryPolicy;
