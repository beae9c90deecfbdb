//! Error types for sitepush deploys.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    /// Connection failures, request timeouts, 5xx and 429 responses.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A 4xx response other than 401/403/429.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("archive failed: {0}")]
    ArchiveFailure(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl DeployError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeployError::Transient(_))
    }
}

pub type DeployResult<T> = std::result::Result<T, DeployError>;
