//! Upstream failure taxonomy
//!
//! Every upstream failure maps to the status the broker surfaces to the
//! platform. The mapping is fixed:
//!
//! | upstream            | surfaced          |
//! |---------------------|-------------------|
//! | no response         | 502 Bad Gateway   |
//! | 400                 | 400               |
//! | 401 / 403           | 502               |
//! | 404                 | 410 Gone          |
//! | 409                 | 409               |
//! | 422                 | 422               |
//! | anything else       | 502               |

use thiserror::Error;

/// Longest upstream message passed through to the platform, in characters
pub const MAX_DETAIL_CHARS: usize = 200;

/// Result type for upstream calls
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Classified cause of an upstream failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailureKind {
    /// Connection, timeout or other transport failure
    NoResponse,
    BadRequest,
    /// Upstream refused the broker's own credentials
    AuthRejected,
    /// Resource already absent upstream
    Gone,
    Conflict,
    Unprocessable,
    /// Any other status, including exhausted 5xx/408/429 retries
    BadGateway,
    /// Upstream answered 2xx with a body the broker could not read
    InvalidResponse,
}

/// A normalized upstream failure
#[derive(Debug, Clone, Error)]
#[error("{description} (status {status})")]
pub struct UpstreamError {
    /// Status the broker reports for this failure
    pub status: u16,
    pub kind: UpstreamFailureKind,
    /// Human-readable description safe to return to the platform
    pub description: String,
}

impl UpstreamError {
    /// Failure with no HTTP response at all
    pub fn no_response(operation: &str) -> Self {
        Self {
            status: 502,
            kind: UpstreamFailureKind::NoResponse,
            description: format!("provisioning service unreachable during {}", operation),
        }
    }

    /// Map an upstream HTTP status. `detail` is the upstream message, which is
    /// only passed through, cut down by [`sanitize_detail`], for statuses the
    /// platform is allowed to see.
    pub fn from_status(operation: &str, status: u16, detail: Option<&str>) -> Self {
        let detail = detail.and_then(sanitize_detail);
        let with_detail = |prefix: String| match &detail {
            Some(d) => format!("{}: {}", prefix, d),
            None => prefix,
        };

        match status {
            400 => Self {
                status: 400,
                kind: UpstreamFailureKind::BadRequest,
                description: with_detail(format!(
                    "provisioning service rejected the {} request",
                    operation
                )),
            },
            401 | 403 => Self {
                status: 502,
                kind: UpstreamFailureKind::AuthRejected,
                description: format!(
                    "broker is not authorized by the provisioning service during {}",
                    operation
                ),
            },
            404 => Self {
                status: 410,
                kind: UpstreamFailureKind::Gone,
                description: format!("resource already absent upstream during {}", operation),
            },
            409 => Self {
                status: 409,
                kind: UpstreamFailureKind::Conflict,
                description: with_detail(format!(
                    "provisioning service reported a conflict during {}",
                    operation
                )),
            },
            422 => Self {
                status: 422,
                kind: UpstreamFailureKind::Unprocessable,
                description: with_detail(format!(
                    "provisioning service could not process the {} request",
                    operation
                )),
            },
            other => Self {
                status: 502,
                kind: UpstreamFailureKind::BadGateway,
                description: format!(
                    "provisioning service failed during {} (upstream status {})",
                    operation, other
                ),
            },
        }
    }

    /// A 2xx response whose body did not have the expected shape
    pub fn invalid_response(operation: &str) -> Self {
        Self {
            status: 502,
            kind: UpstreamFailureKind::InvalidResponse,
            description: format!(
                "provisioning service returned an unreadable response during {}",
                operation
            ),
        }
    }

    pub fn is_gone(&self) -> bool {
        self.kind == UpstreamFailureKind::Gone
    }
}

/// Reduce an upstream message to its first line, without control characters
/// or runs of whitespace, capped at [`MAX_DETAIL_CHARS`].
pub fn sanitize_detail(detail: &str) -> Option<String> {
    let first_line = detail.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned = first_line
        .split(|c: char| c.is_whitespace() || c.is_control())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.chars().count() <= MAX_DETAIL_CHARS {
        return Some(cleaned);
    }
    let mut cut: String = cleaned.chars().take(MAX_DETAIL_CHARS).collect();
    cut.push_str("...");
    Some(cut)
}

/// Whether a status is worth retrying: any 5xx, 408 or 429.
pub fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) || status == 408 || status == 429
}
