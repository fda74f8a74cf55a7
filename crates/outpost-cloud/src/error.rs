//! Cloud provider error types

use thiserror::Error;

/// Errors returned by the provider API clients
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CloudError {
    /// The provider reports the addressed resource as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
            || matches!(self, CloudError::Api { code: 404, .. })
    }

    /// Transient failures a later attempt is expected to clear.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Throttled(_) | CloudError::Timeout(_) | CloudError::Conflict(_) => true,
            CloudError::Api { code, .. } => *code >= 500 || *code == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        assert!(CloudError::ResourceNotFound("vpc-1".into()).is_not_found());
        assert!(
            CloudError::Api {
                code: 404,
                message: "gone".into()
            }
            .is_not_found()
        );
        assert!(!CloudError::Throttled("slow down".into()).is_not_found());
    }

    #[test]
    fn test_retryable() {
        assert!(CloudError::Throttled("x".into()).is_retryable());
        assert!(
            CloudError::Api {
                code: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(!CloudError::InvalidRequest("bad cidr".into()).is_retryable());
    }
}
