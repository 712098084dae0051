use std::time::Duration;

/// Shared error type used across all runtime crates.
///
/// Variants at the top are the canonical kinds surfaced across the agent
/// message envelope; the ones below carry ambient infrastructure failures
/// (I/O, serialization, configuration) that get folded into `Internal` or
/// `Config` at the boundary via `#[from]`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("circuit open, retry after {retry_after_ms}ms")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("corrupt: {0}")]
    Corrupt(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Construct a [`Error::CircuitOpen`] from a retry duration.
    pub fn circuit_open(retry_after: Duration) -> Self {
        Error::CircuitOpen {
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    /// The canonical error kind name, stable across the agent message
    /// envelope's `error.code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "InvalidInput",
            Error::NotFound(_) => "NotFound",
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::InvalidTransition(_) => "InvalidTransition",
            Error::CircuitOpen { .. } => "CircuitOpen",
            Error::Timeout(_) => "Timeout",
            Error::Corrupt(_) => "Corrupt",
            Error::Internal(_) | Error::Io(_) | Error::Json(_) | Error::Toml(_) => "Internal",
            Error::Config(_) => "Config",
        }
    }

    /// Whether this error should be logged to the audit sink at `warn`
    /// (recoverable / expected) rather than `error` (unexpected) severity.
    pub fn is_warn(&self) -> bool {
        matches!(self, Error::Corrupt(_) | Error::InvalidInput(_) | Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
