//! Upstream provisioning client
//!
//! Translates broker lifecycle intents (create tenant account, create
//! protection service, contact users, plan changes, deletes) into calls
//! against the firewall provisioning API. Every call goes through one
//! retrying executor and every failure is normalized into [`UpstreamError`].

pub mod api;
pub mod client;
pub mod config;
pub mod error;

pub use api::{
    AccountRecord, CreateAccountRequest, CreateServiceRequest, ProvisioningApi, ServiceRecord,
    UserRecord,
};
pub use client::UpstreamClient;
pub use config::UpstreamConfig;
pub use error::{UpstreamError, UpstreamFailureKind, UpstreamResult};
