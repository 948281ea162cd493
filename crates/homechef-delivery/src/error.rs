//! Error types for webhook delivery and the public ingress operations.
//!
//! `DeliveryError` describes why one outbound attempt did not succeed and
//! drives the retry state machine. `IngressError` is what producers and the
//! management surface see; each variant has a stable `kind()` string.

use std::fmt;

use homechef_core::{models::UnknownEventType, signing::SigningError, CoreError};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Status codes that are worth retrying besides 5xx.
pub const RETRIABLE_CLIENT_STATUSES: [u16; 3] = [408, 425, 429];

/// Why a delivery attempt did not succeed.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Number of seconds before the request timed out
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx other than 429).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Truncated response body
        body: String,
        /// Parsed `Retry-After`, if the response carried one
        retry_after_seconds: Option<u64>,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Truncated response body
        body: String,
        /// Parsed `Retry-After`, if the response carried one
        retry_after_seconds: Option<u64>,
    },

    /// Subscriber answered 429.
    #[error("rate limited by subscriber")]
    RateLimited {
        /// Truncated response body
        body: String,
        /// Parsed `Retry-After`, if the response carried one
        retry_after_seconds: Option<u64>,
    },

    /// Any other non-2xx status, including redirects, which are not followed.
    #[error("unexpected response: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
        /// Truncated response body
        body: String,
    },

    /// The request could not be built from the endpoint configuration.
    #[error("invalid endpoint configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Store operation failed around a delivery.
    #[error("database error: {message}")]
    DatabaseError {
        /// Database error message
        message: String,
    },

    /// Submission channel is full.
    #[error("dispatch queue is full")]
    Backpressure,

    /// Engine is shutting down.
    #[error("delivery engine is shutting down")]
    ShutdownRequested,
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Classifies a non-2xx response.
    pub fn from_status(
        status_code: u16,
        body: impl Into<String>,
        retry_after_seconds: Option<u64>,
    ) -> Self {
        let body = body.into();
        match status_code {
            429 => Self::RateLimited { body, retry_after_seconds },
            400..=499 => Self::ClientError { status_code, body, retry_after_seconds },
            500..=599 => Self::ServerError { status_code, body, retry_after_seconds },
            _ => Self::UnexpectedStatus { status_code, body },
        }
    }

    /// Creates a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::DatabaseError { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Whether another attempt may succeed.
    ///
    /// Network errors, timeouts, 5xx, 408, 425 and 429 are retriable. Every
    /// other status is an explicit rejection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ServerError { .. }
            | Self::RateLimited { .. }
            | Self::DatabaseError { .. }
            | Self::Backpressure => true,

            Self::ClientError { status_code, .. } => {
                RETRIABLE_CLIENT_STATUSES.contains(status_code)
            },

            Self::UnexpectedStatus { .. }
            | Self::ConfigurationError { .. }
            | Self::ShutdownRequested => false,
        }
    }

    /// `Retry-After` from the response, when the subscriber sent a usable one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_seconds, .. }
            | Self::ClientError { retry_after_seconds, .. }
            | Self::ServerError { retry_after_seconds, .. } => *retry_after_seconds,
            _ => None,
        }
    }

    /// HTTP status, when a response was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Response body, when a response was received.
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::RateLimited { body, .. }
            | Self::ClientError { body, .. }
            | Self::ServerError { body, .. }
            | Self::UnexpectedStatus { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        Self::database(err.to_string())
    }
}

/// Category of delivery error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues and timeouts.
    Network,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx).
    Server,
    /// Rate limiting.
    RateLimit,
    /// Redirects and other unexpected statuses.
    Protocol,
    /// Database operations.
    Database,
    /// Configuration problems.
    Configuration,
    /// Backpressure and shutdown.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } | DeliveryError::Timeout { .. } => Self::Network,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } => Self::Server,
            DeliveryError::RateLimited { .. } => Self::RateLimit,
            DeliveryError::UnexpectedStatus { .. } => Self::Protocol,
            DeliveryError::DatabaseError { .. } => Self::Database,
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::Backpressure | DeliveryError::ShutdownRequested => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Protocol => write!(f, "protocol"),
            Self::Database => write!(f, "database"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors returned by `Enqueue` and the management operations.
#[derive(Debug, Clone, Error)]
pub enum IngressError {
    /// Event type is not in the catalog.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload exceeds the configured maximum.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Configured limit
        max: usize,
    },

    /// Endpoint URL is malformed or uses an unsupported scheme.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Custom header is not allowed.
    #[error("unsafe custom header: {0}")]
    UnsafeHeader(String),

    /// Any other rejected input.
    #[error("{0}")]
    Validation(String),

    /// Entity does not exist or belongs to another owner.
    #[error("{0} not found")]
    NotFound(String),

    /// Manual retry of a delivery that is not failed.
    #[error("delivery {id} is {status}; only failed deliveries can be retried")]
    NotRetryable {
        /// Delivery id
        id: String,
        /// Current status
        status: String,
    },

    /// Store call failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Secure RNG failed; no endpoint can be minted.
    #[error("secret generation failed: {0}")]
    SecretGeneration(String),

    /// Engine is draining; new work is refused.
    #[error("service is shutting down")]
    ShuttingDown,
}

impl IngressError {
    /// Stable machine-readable kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnknownEventType(_) => "unknown_event_type",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::InvalidUrl(_) => "invalid_url",
            Self::UnsafeHeader(_) => "unsafe_header",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::NotRetryable { .. } => "not_retryable",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::SecretGeneration(_) => "secret_generation_failed",
            Self::ShuttingDown => "shutting_down",
        }
    }

    /// HTTP status code for the management surface.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::UnknownEventType(_)
            | Self::InvalidUrl(_)
            | Self::UnsafeHeader(_)
            | Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::NotRetryable { .. } => 409,
            Self::PayloadTooLarge { .. } => 413,
            Self::StoreUnavailable(_) | Self::SecretGeneration(_) | Self::ShuttingDown => 503,
        }
    }
}

impl From<CoreError> for IngressError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(what) => Self::NotFound(what),
            CoreError::InvalidInput(message) | CoreError::ConstraintViolation(message) => {
                Self::Validation(message)
            },
            CoreError::Database(message) => Self::StoreUnavailable(message),
        }
    }
}

impl From<UnknownEventType> for IngressError {
    fn from(err: UnknownEventType) -> Self {
        Self::UnknownEventType(err.0)
    }
}

impl From<SigningError> for IngressError {
    fn from(err: SigningError) -> Self {
        Self::SecretGeneration(err.to_string())
    }
}
