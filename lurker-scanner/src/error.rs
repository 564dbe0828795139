use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Provisioning failed for profile {profile}: {message}")]
    Provisioning { profile: String, message: String },

    #[error("Session error (status {status}): {message}")]
    Session { status: u16, message: String },

    #[error("No execution handle became available within {0:?}")]
    PoolTimeout(Duration),

    #[error("No execution handles could be provisioned")]
    NoHandles,

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    /// True for transport timeouts, both our own and reqwest's.
    pub fn is_timeout(&self) -> bool {
        match self {
            ScanError::HttpError(e) => e.is_timeout(),
            ScanError::PoolTimeout(_) => true,
            _ => false,
        }
    }
}

impl From<url::ParseError> for ScanError {
    fn from(err: url::ParseError) -> Self {
        ScanError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
