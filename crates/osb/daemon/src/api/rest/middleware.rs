//! HTTP middleware: OSB version gate, request identity and panic handling.

use crate::error::BrokerError;
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use tracing::Instrument;

pub const API_VERSION_HEADER: &str = "x-broker-api-version";
pub const REQUEST_IDENTITY_HEADER: &str = "x-broker-api-request-identity";

/// OSB API versions this broker speaks
pub const SUPPORTED_VERSIONS: [&str; 2] = ["2.12", "2.13"];

/// Reject `/v2` requests without a supported `X-Broker-API-Version` (412).
pub async fn require_api_version(request: Request, next: Next) -> Response {
    let version = request
        .headers()
        .get(API_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());

    match version {
        Some(v) if SUPPORTED_VERSIONS.contains(&v.as_str()) => next.run(request).await,
        Some(v) => BrokerError::UnsupportedVersion(format!(
            "unsupported X-Broker-API-Version {}, expected one of {}",
            v,
            SUPPORTED_VERSIONS.join(", ")
        ))
        .into_response(),
        None => BrokerError::UnsupportedVersion(
            "missing X-Broker-API-Version header".to_string(),
        )
        .into_response(),
    }
}

/// Run the request inside a span keyed by the platform's request identity,
/// or a fresh UUID, and echo that id on the response.
pub async fn request_identity(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_IDENTITY_HEADER, value);
    }
    response
}

/// Turn a handler panic into the generic 500 body
pub fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    BrokerError::Internal("handler panicked".to_string()).into_response()
}
