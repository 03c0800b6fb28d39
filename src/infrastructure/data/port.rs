use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{
    audit_entry::AuditEntry, credential::MfaCredential, session::MfaSession,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend is unavailable")]
    Unavailable,
    #[error("version conflict: stored version is {actual}")]
    VersionConflict { actual: u64 },
    #[error("record not found")]
    NotFound,
    #[error("failed to decode stored record")]
    Serialization,
}

/// Durable storage for credential, session and audit records, supplied by
/// the surrounding system. Implementations must isolate rows per user.
///
/// `upsert_credential` is an optimistic-concurrency write: it commits only
/// when the stored version equals `expected_version`, bumps the version by
/// one, and remembers `operation_id` so a resubmitted operation is a no-op
/// returning the already-committed record.
#[async_trait]
pub trait PersistencePort: Send + Sync + 'static {
    async fn get_credential(&self, user_id: &str) -> Result<Option<MfaCredential>, StoreError>;

    async fn upsert_credential(
        &self,
        credential: &MfaCredential,
        expected_version: u64,
        operation_id: Uuid,
    ) -> Result<MfaCredential, StoreError>;

    /// Attempt log for audit/forensics; lockout policy lives in the guard,
    /// not here.
    async fn record_attempt(&self, user_id: &str, success: bool) -> Result<(), StoreError>;

    async fn create_session(&self, session: &MfaSession) -> Result<(), StoreError>;

    async fn get_session(&self, token: &str) -> Result<Option<MfaSession>, StoreError>;

    async fn update_session(&self, session: &MfaSession) -> Result<(), StoreError>;

    async fn invalidate_session(&self, token: &str) -> Result<(), StoreError>;

    /// Sessions whose `expires_at` lies before `now`, for the idle sweeper.
    async fn expired_sessions(&self, now: DateTime<Utc>)
        -> Result<Vec<MfaSession>, StoreError>;

    async fn append_audit_event(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}
