use thiserror::Error;

use crate::model::FailureKind;

#[derive(Error, Debug)]
pub(crate) enum SessionError {
    #[error("Session {0} not found")]
    ProfileNotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    #[error("Network error: {0}")]
    NetworkFailure(String),

    #[error("SSH connection error: {0}")]
    ProtocolFailure(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Session {0} is not connected")]
    NotConnected(String),

    #[error("Unexpected connection error: {0}")]
    UnknownFailure(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Bucket used when a connect attempt lands in `Failed`.
    pub(crate) fn failure_kind(&self) -> FailureKind {
        match self {
            SessionError::AuthenticationFailure(_) => FailureKind::Authentication,
            SessionError::NetworkFailure(_) => FailureKind::Network,
            SessionError::ProtocolFailure(_) => FailureKind::Protocol,
            _ => FailureKind::Unknown,
        }
    }
}
