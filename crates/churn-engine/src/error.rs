// Error taxonomy for the churn engine and its platform boundary.

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Failures reported by the messaging platform.
///
/// `AlreadyExists` is kept distinct from every other kind because stream
/// provisioning treats it as success.
#[derive(thiserror::Error, Debug)]
pub enum PlatformError {
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("platform unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("{0} timed out")]
    TimedOut(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl PlatformError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, PlatformError::AlreadyExists(_))
    }
}

/// Stream provisioning gave up; nothing can attach without the backing log.
#[derive(thiserror::Error, Debug)]
#[error("failed to provision stream {stream} after {attempts} attempts")]
pub struct ProvisioningError {
    pub stream: String,
    pub attempts: u32,
    #[source]
    pub source: PlatformError,
}

/// The platform connection could not be established.
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("invalid connection target: {0}")]
    InvalidTarget(String),
    #[error("failed to connect to {target}")]
    Connect {
        target: String,
        #[source]
        source: anyhow::Error,
    },
}
