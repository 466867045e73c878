//! Error taxonomy shared by every layer of the client.
//!
//! Transport outcomes (status codes, connection failures, malformed bodies)
//! are folded into [`ClientError`] so callers can match on the kind of
//! failure instead of inspecting strings.

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Bad credentials or endpoint. Raised before any network call.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A caller-supplied value (run id, session token, path, input) is out of contract.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Authorization failed: {0}")]
    AuthorizationFailure(String),

    /// 412 (quota or precondition) or 429 (rate limit).
    #[error("Resource limit exceeded ({status}): {message}")]
    ResourceLimitExceeded { status: u16, message: String },

    /// The session no longer exists server-side (404 on a session path).
    /// Recreate it instead of retrying.
    #[error("Kernel expired: {0}")]
    KernelExpired(String),

    #[error("Service unavailable ({status}): {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Failed to decode response: {0}")]
    DecodeFailure(String),

    #[error("Session {0} has not been created yet")]
    SessionNotCreated(String),

    #[error("Session {0} was already destroyed")]
    SessionDestroyed(String),

    /// Any other non-2xx status.
    #[error("{status} {message}")]
    Unknown { status: u16, message: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Whether retrying the same call later may succeed.
    ///
    /// The client never retries on its own; this only informs caller policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ServiceUnavailable { .. } | ClientError::NetworkFailure(_)
        )
    }

    /// Whether the caller must provision a new session to make progress.
    pub fn requires_new_session(&self) -> bool {
        matches!(
            self,
            ClientError::KernelExpired(_) | ClientError::SessionDestroyed(_)
        )
    }

    /// HTTP status of the response the error was classified from.
    ///
    /// `None` for errors raised locally or by the connection itself.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::ResourceLimitExceeded { status, .. }
            | ClientError::ServiceUnavailable { status, .. }
            | ClientError::Unknown { status, .. } => Some(*status),
            ClientError::AuthorizationFailure(_) => Some(401),
            ClientError::KernelExpired(_) => Some(404),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::NetworkFailure(err.to_string())
    }
}
