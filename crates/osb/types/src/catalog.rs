//! Static service catalog served on `GET /v2/catalog`

use serde::{Deserialize, Serialize};

/// Catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub services: Vec<ServiceOffering>,
}

/// A service offering with its plans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default = "default_true")]
    pub bindable: bool,
    #[serde(default = "default_true")]
    pub plan_updateable: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub plans: Vec<ServicePlan>,
}

/// A plan within an offering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub free: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Default for Catalog {
    /// The built-in firewall offering with `standard` and `enterprise` plans
    fn default() -> Self {
        Self {
            services: vec![ServiceOffering {
                id: "waf".to_string(),
                name: "web-application-firewall".to_string(),
                description: "Managed web application firewall protecting HTTP workloads"
                    .to_string(),
                bindable: true,
                plan_updateable: true,
                tags: vec!["waf".to_string(), "security".to_string()],
                metadata: Some(serde_json::json!({
                    "displayName": "Web Application Firewall",
                })),
                plans: vec![
                    ServicePlan {
                        id: "standard".to_string(),
                        name: "standard".to_string(),
                        description: "Managed rule sets and rate limiting".to_string(),
                        free: false,
                        metadata: None,
                    },
                    ServicePlan {
                        id: "enterprise".to_string(),
                        name: "enterprise".to_string(),
                        description: "Custom rules, bot protection and priority support"
                            .to_string(),
                        free: false,
                        metadata: None,
                    },
                ],
            }],
        }
    }
}

impl Catalog {
    pub fn find_plan(&self, service_id: &str, plan_id: &str) -> Option<&ServicePlan> {
        self.services
            .iter()
            .find(|s| s.id == service_id)
            .and_then(|s| s.plans.iter().find(|p| p.id == plan_id))
    }
}
