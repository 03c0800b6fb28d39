use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::{
    audit_entry::AuditEntry, credential::MfaCredential, session::MfaSession,
};
use crate::infrastructure::data::port::{PersistencePort, StoreError};

#[derive(Default)]
struct Inner {
    credentials: HashMap<String, MfaCredential>,
    sessions: HashMap<String, MfaSession>,
    committed_ops: HashSet<Uuid>,
    attempts: Vec<(String, bool, DateTime<Utc>)>,
    audit: Vec<AuditEntry>,
}

/// In-memory implementation of the persistence port. Backs the tests and
/// the demo wiring; the offline toggle makes every call fail with
/// `Unavailable`, which is how connectivity loss is simulated.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates connectivity loss: every call fails with `Unavailable`
    /// until toggled back.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Attempts recorded for a user.
    #[cfg(test)]
    pub async fn attempt_count(&self, user_id: &str) -> usize {
        let inner = self.inner.read().await;
        inner.attempts.iter().filter(|(id, _, _)| id == user_id).count()
    }

    #[cfg(test)]
    pub async fn audit_len(&self) -> usize {
        self.inner.read().await.audit.len()
    }
}

#[async_trait]
impl PersistencePort for MemoryStore {
    async fn get_credential(&self, user_id: &str) -> Result<Option<MfaCredential>, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner.credentials.get(user_id).cloned())
    }

    async fn upsert_credential(
        &self,
        credential: &MfaCredential,
        expected_version: u64,
        operation_id: Uuid,
    ) -> Result<MfaCredential, StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;

        if inner.committed_ops.contains(&operation_id) {
            return inner
                .credentials
                .get(&credential.user_id)
                .cloned()
                .ok_or(StoreError::NotFound);
        }

        let stored_version = inner
            .credentials
            .get(&credential.user_id)
            .map(|stored| stored.version)
            .unwrap_or(0);

        if stored_version != expected_version {
            return Err(StoreError::VersionConflict {
                actual: stored_version,
            });
        }

        let mut committed = credential.clone();
        committed.version = expected_version + 1;
        committed.updated_at = Utc::now();
        inner
            .credentials
            .insert(committed.user_id.clone(), committed.clone());
        inner.committed_ops.insert(operation_id);
        Ok(committed)
    }

    async fn record_attempt(&self, user_id: &str, success: bool) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        inner.attempts.push((user_id.to_string(), success, Utc::now()));
        Ok(())
    }

    async fn create_session(&self, session: &MfaSession) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        inner
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<MfaSession>, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(token).cloned())
    }

    async fn update_session(&self, session: &MfaSession) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        if !inner.sessions.contains_key(&session.session_token) {
            return Err(StoreError::NotFound);
        }
        inner
            .sessions
            .insert(session.session_token.clone(), session.clone());
        Ok(())
    }

    async fn invalidate_session(&self, token: &str) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        inner.sessions.remove(token);
        Ok(())
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MfaSession>, StoreError> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|session| session.is_expired(now))
            .cloned()
            .collect())
    }

    async fn append_audit_event(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        inner.audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_rejects_stale_versions() {
        let store = MemoryStore::new();
        let cred = MfaCredential::new("user-1");

        let committed = store
            .upsert_credential(&cred, 0, Uuid::new_v4())
            .await
            .expect("initial upsert should commit");
        assert_eq!(committed.version, 1);

        // A second writer based on the stale version must be rejected.
        let err = store
            .upsert_credential(&cred, 0, Uuid::new_v4())
            .await
            .expect_err("stale upsert must conflict");
        assert!(matches!(err, StoreError::VersionConflict { actual: 1 }));
    }

    #[tokio::test]
    async fn duplicate_operation_id_is_a_noop() {
        let store = MemoryStore::new();
        let cred = MfaCredential::new("user-1");
        let op = Uuid::new_v4();

        let first = store
            .upsert_credential(&cred, 0, op)
            .await
            .expect("first submission commits");
        let second = store
            .upsert_credential(&cred, 0, op)
            .await
            .expect("resubmission is a no-op");

        assert_eq!(first.version, second.version);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);

        let err = store
            .get_credential("user-1")
            .await
            .expect_err("offline store must not answer");
        assert!(matches!(err, StoreError::Unavailable));
    }
}
