use bb8_redis::redis::RedisError;
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for the view-count engine.
#[derive(Error, Debug, Clone)]
pub enum ViewCountError {
    /// Caller supplied a bad content id or visitor id
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The shared cache could not be reached or rejected the command
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    TimedOut(String),

    /// Durable store refused or failed a request
    #[error("Store error: {0}")]
    StoreError(String),

    /// Durable store returned an HTTP error status
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Network error - connection refused, circuit open, etc.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Configuration failed validation
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl ViewCountError {
    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ViewCountError::TimedOut(_)
                | ViewCountError::NetworkError(_)
                | ViewCountError::CacheUnavailable(_)
                | ViewCountError::ApiError {
                    status: 408 | 429 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Check if this error came from infrastructure rather than from the caller.
    /// Infrastructure faults drop the view; caller faults are reported back.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(
            self,
            ViewCountError::InvalidArgument(_) | ViewCountError::ValidationError(_)
        )
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for ViewCountError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::TimedOut => ViewCountError::TimedOut(e.to_string()),
    std::io::ErrorKind::InvalidInput => ViewCountError::InvalidArgument(e.to_string()),
    _ => ViewCountError::IoError(e.to_string()),
});

impl_from_error!(reqwest::Error, e => if e.is_timeout() {
    ViewCountError::TimedOut(e.to_string())
} else if e.is_connect() {
    ViewCountError::NetworkError(format!("Store disconnected: {}", e))
} else if e.is_request() {
    ViewCountError::NetworkError(e.to_string())
} else if e.is_decode() {
    ViewCountError::ParseError(e.to_string())
} else {
    ViewCountError::StoreError(format!("HTTP error: {}", e))
});

impl_from_error!(RedisError, e => if e.is_timeout() {
    ViewCountError::TimedOut(e.to_string())
} else {
    ViewCountError::CacheUnavailable(e.to_string())
});

impl_from_error!(serde_json::Error, e => ViewCountError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => ViewCountError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with ViewCountError.
pub type ViewCountResult<T> = Result<T, ViewCountError>;
