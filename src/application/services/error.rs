use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::infrastructure::data::port::StoreError;
use crate::infrastructure::security::encryption::EncryptionError;

#[derive(Debug, Error)]
pub enum MfaError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid authentication code")]
    InvalidCode,
    #[error("no active MFA challenge")]
    ChallengeNotFound,
    #[error("MFA challenge has expired")]
    ExpiredChallenge,
    #[error("account is locked until {0}")]
    LockedOut(DateTime<Utc>),
    #[error("no MFA secret is provisioned for this user")]
    SecretNotFound,
    #[error("local state conflicts with the remote credential record")]
    SyncConflict,
    #[error("storage backend is unavailable")]
    StorageUnavailable,
    #[error("all backup codes have been consumed")]
    BackupCodeExhausted,
    #[error("code has already been used in this time window")]
    Replay,
    #[error("session is not valid")]
    SessionNotFound,
    #[error("session has expired")]
    SessionExpired,
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("an internal error occurred")]
    Internal,
}

impl From<StoreError> for MfaError {
    fn from(err: StoreError) -> Self {
        match err {
            // Fail-secure: an unreadable store is never treated as "not
            // enrolled" or "unlocked".
            StoreError::Unavailable | StoreError::Serialization => MfaError::StorageUnavailable,
            StoreError::VersionConflict { .. } => MfaError::SyncConflict,
            StoreError::NotFound => MfaError::SecretNotFound,
        }
    }
}
