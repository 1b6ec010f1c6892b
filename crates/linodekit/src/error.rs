//! Error types for Linode API operations.
//!
//! Every failure carries enough context to decide whether the call may be
//! retried and whether the remote resource is simply gone (HTTP 404).

use thiserror::Error;

/// Categories of API errors for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Connection, DNS, TLS or timeout failures (transient, retryable)
    Network,
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx (transient, retryable)
    Server,
    /// HTTP 404
    NotFound,
    /// Any other 4xx rejection
    Rejected,
    /// Operation not offered by the API
    Unsupported,
    /// Malformed response or other errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimited | Self::Server)
    }

    /// Whether the request was refused before the API acted on it, so even
    /// non-idempotent calls may be re-sent.
    pub fn is_safe_to_resend(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::RateLimited => "Rate limited by the API",
            Self::Server => "Linode API server error",
            Self::NotFound => "Resource not found",
            Self::Rejected => "Request rejected",
            Self::Unsupported => "Operation not supported",
            Self::Other => "Unexpected error",
        }
    }
}

/// Errors that can occur while talking to the Linode API.
#[derive(Debug, Error)]
pub enum Error {
    /// Non-2xx HTTP response
    #[error("[{status}] {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Reasons reported by the API, joined
        message: String,
    },

    /// Transport-level failure (no HTTP status available)
    #[error("network error: {message}")]
    Network {
        /// Detailed error message from the transport
        message: String,
    },

    /// The API offers no such operation for this resource
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// Name of the operation
        operation: &'static str,
    },

    /// A response body could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller gave up while waiting to retry
    #[error("interrupted while waiting to retry")]
    Interrupted,
}

impl Error {
    /// Build an API error from a status code and a raw response body.
    ///
    /// Linode reports failures as `{"errors": [{"reason": "...", "field": "..."}]}`;
    /// the reasons are joined, prefixed with the field when present. Bodies
    /// that do not follow that shape are passed through verbatim.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) if !parsed.errors.is_empty() => parsed
                .errors
                .iter()
                .map(|e| match &e.field {
                    Some(field) => format!("{field}: {}", e.reason),
                    None => e.reason.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            _ if body.trim().is_empty() => format!("HTTP {status}"),
            _ => body.trim().to_string(),
        };
        Self::Api { status, message }
    }

    /// Shorthand for a 404 error, mostly useful in backends and tests.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Api {
            status: 404,
            message: format!("Not found: {}", what.into()),
        }
    }

    /// Get the error category for retry logic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Api { status: 404, .. } => ErrorCategory::NotFound,
            Error::Api { status: 429, .. } => ErrorCategory::RateLimited,
            Error::Api { status, .. } if *status >= 500 => ErrorCategory::Server,
            Error::Api { .. } => ErrorCategory::Rejected,
            Error::Network { .. } => ErrorCategory::Network,
            Error::Unsupported { .. } => ErrorCategory::Unsupported,
            Error::InvalidResponse(_) | Error::Json(_) | Error::Interrupted => ErrorCategory::Other,
        }
    }

    /// HTTP status, when the API answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the API reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Message without the status prefix.
    pub fn message(&self) -> String {
        match self {
            Error::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => Self::Api {
                status: code,
                message: format!("HTTP {code}"),
            },
            other => Self::Network {
                message: other.to_string(),
            },
        }
    }
}

#[derive(serde::Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(serde::Deserialize)]
struct ErrorReason {
    reason: String,
    field: Option<String>,
}

/// Result type for Linode API operations.
pub type Result<T> = std::result::Result<T, Error>;
