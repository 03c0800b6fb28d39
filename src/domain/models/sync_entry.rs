use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::models::credential::MfaCredential;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Enable,
    Disable,
    RotateSecret,
    ConsumeBackupCode,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntryStatus {
    Pending,
    Inflight,
    Committed,
    Failed,
}

/// One queued local mutation awaiting remote commit. `operation_id` is the
/// idempotency key: the remote store treats a resubmission as a no-op.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncQueueEntry {
    pub operation_id: Uuid,
    pub user_id: String,
    pub operation: SyncOperation,
    /// Full credential snapshot as of the local mutation.
    pub payload: MfaCredential,
    /// Credential version the mutation was based on; the remote rejects the
    /// upsert if its stored version has moved past this.
    pub base_version: u64,
    pub retry_count: u32,
    pub status: SyncEntryStatus,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl SyncQueueEntry {
    pub fn new(operation: SyncOperation, payload: MfaCredential) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            user_id: payload.user_id.clone(),
            base_version: payload.version,
            operation,
            payload,
            retry_count: 0,
            status: SyncEntryStatus::Pending,
            last_error: None,
            queued_at: Utc::now(),
        }
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = SyncEntryStatus::Failed;
        self.last_error = Some(reason.into());
    }
}
