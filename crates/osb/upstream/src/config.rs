//! Upstream client configuration

use osb_types::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the provisioning API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token presented to the provisioning API
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            timeout_secs: default_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:9090/api/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}
