//! Asynchronous operation records
//!
//! For a given instance at most one operation may be `in progress` at a time.
//! Terminal operations are kept so the platform's final poll can observe them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operation lifecycle state, serialized with the OSB spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::InProgress => "in progress",
            OperationState::Succeeded => "succeeded",
            OperationState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an [`OperationState`] from its wire spelling
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation state: {0}")]
pub struct ParseStateError(pub String);

impl FromStr for OperationState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in progress" => Ok(OperationState::InProgress),
            "succeeded" => Ok(OperationState::Succeeded),
            "failed" => Ok(OperationState::Failed),
            other => Err(ParseStateError(other.to_string())),
        }
    }
}

/// Kind of lifecycle action an operation tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Provision,
    Deprovision,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Provision => "provision",
            OperationType::Deprovision => "deprovision",
        }
    }

    /// Operation id in the `{type}-{instanceId}-{timestamp}` form platforms
    /// use to correlate polls; the timestamp is in epoch milliseconds.
    pub fn operation_id(&self, instance_id: &str, at: DateTime<Utc>) -> String {
        format!("{}-{}-{}", self.as_str(), instance_id, at.timestamp_millis())
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracked asynchronous operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: String,
    pub instance_id: String,
    pub operation_type: OperationType,
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to register an operation
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub operation_type: OperationType,
    pub state: OperationState,
    pub description: Option<String>,
}

impl NewOperation {
    /// A freshly accepted operation
    pub fn in_progress(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            state: OperationState::InProgress,
            description: None,
        }
    }

    pub fn into_operation(
        self,
        instance_id: &str,
        operation_id: &str,
        now: DateTime<Utc>,
    ) -> Operation {
        Operation {
            operation_id: operation_id.to_string(),
            instance_id: instance_id.to_string(),
            operation_type: self.operation_type,
            state: self.state,
            description: self.description,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Operation {
    pub fn is_pending(&self) -> bool {
        self.state == OperationState::InProgress
    }
}
