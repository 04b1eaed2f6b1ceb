//! Error types for osb-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use osb_types::ErrorBody;
use osb_upstream::UpstreamError;
use thiserror::Error;

/// Description returned for any fault the platform should not see details of
pub const GENERIC_FAILURE: &str = "internal server error";

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key already taken
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

/// Broker errors, one variant per OSB failure class
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Malformed or missing request fields
    #[error("{0}")]
    Validation(String),

    /// Missing or unsupported `X-Broker-API-Version`
    #[error("{0}")]
    UnsupportedVersion(String),

    #[error("{0}")]
    NotFound(String),

    /// Absent on delete, which OSB treats as already done
    #[error("{0}")]
    Gone(String),

    /// Existing entity with divergent attributes
    #[error("{0}")]
    Conflict(String),

    /// Another operation holds the instance
    #[error("{0}")]
    OperationInProgress(String),

    #[error("This service plan requires client support for asynchronous service operations.")]
    AsyncRequired,

    /// Binding needs a contact identity
    #[error("{0}")]
    RequiresApp(String),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    pub fn status(&self) -> StatusCode {
        match self {
            BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
            BrokerError::UnsupportedVersion(_) => StatusCode::PRECONDITION_FAILED,
            BrokerError::NotFound(_) => StatusCode::NOT_FOUND,
            BrokerError::Gone(_) => StatusCode::GONE,
            BrokerError::Conflict(_) => StatusCode::CONFLICT,
            BrokerError::OperationInProgress(_)
            | BrokerError::AsyncRequired
            | BrokerError::RequiresApp(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BrokerError::Upstream(e) => {
                StatusCode::from_u16(e.status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            BrokerError::Storage(_) | BrokerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// OSB machine-readable error code, when one applies
    pub fn code(&self) -> Option<&'static str> {
        match self {
            BrokerError::AsyncRequired => Some("AsyncRequired"),
            BrokerError::RequiresApp(_) => Some("RequiresApp"),
            BrokerError::OperationInProgress(_) => Some("ConcurrencyError"),
            _ => None,
        }
    }

    /// Description safe to hand to the platform
    pub fn description(&self) -> String {
        match self {
            BrokerError::Upstream(e) => e.description.clone(),
            BrokerError::Storage(_) | BrokerError::Internal(_) => GENERIC_FAILURE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.code().map(str::to_string),
            description: self.description(),
        }
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            BrokerError::Storage(_) | BrokerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
            }
            BrokerError::Upstream(e) => {
                tracing::warn!(status = e.status, error = %e, "Upstream call failed");
            }
            _ => {
                tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
            }
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
