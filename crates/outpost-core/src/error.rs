use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Subnet not found: {0}")]
    UnknownSubnet(String),

    #[error("NAT service not found: {0}")]
    UnknownNatService(String),

    #[error("Security group not found: {0}")]
    UnknownSecurityGroup(String),

    #[error("Invalid IP range: {0}")]
    InvalidCidr(String),

    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    #[error("Status I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Status of {path} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("Status file version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

impl CoreError {
    /// Errors a later reconcile can clear without a spec change
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Conflict { .. } | CoreError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
