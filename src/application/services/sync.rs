use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::services::config::SyncPolicy;
use crate::application::services::error::MfaError;
use crate::application::services::events::{MfaEvent, MfaEventBus};
use crate::domain::models::credential::MfaCredential;
use crate::domain::models::sync_entry::{SyncEntryStatus, SyncOperation, SyncQueueEntry};
use crate::infrastructure::data::port::{PersistencePort, StoreError};

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub pending_count: usize,
    pub last_error: Option<String>,
}

/// Offline-first propagation of local MFA state to the remote store.
///
/// Every mutation lands in the local cache (read-your-writes) and an ordered
/// queue keyed by `operation_id`. A background drain pushes queued entries
/// as idempotent upserts; the request path never waits on the drain. Remote
/// state is authoritative: a version conflict rejects the local operation,
/// except backup-code consumption which is commutative and merged by
/// set-difference.
pub struct SyncCoordinator {
    port: Arc<dyn PersistencePort>,
    policy: SyncPolicy,
    events: MfaEventBus,
    cache: RwLock<HashMap<String, MfaCredential>>,
    queue: Mutex<VecDeque<SyncQueueEntry>>,
    failed: Mutex<Vec<SyncQueueEntry>>,
    notify: Notify,
}

impl SyncCoordinator {
    pub fn new(port: Arc<dyn PersistencePort>, policy: SyncPolicy, events: MfaEventBus) -> Self {
        Self {
            port,
            policy,
            events,
            cache: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            failed: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    /// Most recent locally committed credential state. The cache wins over
    /// the remote so a verification that follows a local mutation observes
    /// that mutation even before the queue drains.
    pub async fn credential(&self, user_id: &str) -> Result<Option<MfaCredential>, MfaError> {
        if let Some(cached) = self.cache.read().await.get(user_id).cloned() {
            return Ok(Some(cached));
        }

        match self.port.get_credential(user_id).await {
            Ok(Some(credential)) => {
                self.cache
                    .write()
                    .await
                    .insert(user_id.to_string(), credential.clone());
                Ok(Some(credential))
            }
            Ok(None) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn update_cache(&self, credential: &MfaCredential) {
        self.cache
            .write()
            .await
            .insert(credential.user_id.clone(), credential.clone());
    }

    /// Caches are invalidated on every confirmed remote write that this
    /// device did not make, forcing a re-fetch.
    pub async fn invalidate_cache(&self, user_id: &str) {
        self.cache.write().await.remove(user_id);
    }

    /// Applies a mutation locally and queues it for remote commit. Returns
    /// the idempotency key of the queued operation.
    pub async fn apply(
        &self,
        operation: SyncOperation,
        credential: MfaCredential,
    ) -> Result<Uuid, MfaError> {
        // The cached copy advances one version optimistically so a second
        // local mutation queued before this one drains bases itself on the
        // version this one will commit.
        let mut cached = credential.clone();
        cached.version += 1;
        self.update_cache(&cached).await;
        let entry = SyncQueueEntry::new(operation, credential);
        let operation_id = entry.operation_id;
        debug!(
            user_id = %entry.user_id,
            operation = ?operation,
            %operation_id,
            base_version = entry.base_version,
            "queued local mutation"
        );
        self.queue.lock().await.push_back(entry);
        self.notify.notify_one();
        Ok(operation_id)
    }

    /// Immediate remote write, bypassing the queue. Used for lockout
    /// counters, which must be remote-authoritative rather than eventually
    /// consistent. Fails closed when the remote is unreachable.
    pub async fn commit_now(&self, credential: &MfaCredential) -> Result<MfaCredential, MfaError> {
        match self
            .port
            .upsert_credential(credential, credential.version, Uuid::new_v4())
            .await
        {
            Ok(stored) => {
                self.update_cache(&stored).await;
                Ok(stored)
            }
            Err(StoreError::VersionConflict { actual }) => {
                warn!(
                    user_id = %credential.user_id,
                    local_version = credential.version,
                    remote_version = actual,
                    "direct commit conflicted with remote state"
                );
                self.invalidate_cache(&credential.user_id).await;
                Err(MfaError::SyncConflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drains the queue in order until it is empty or the remote becomes
    /// unreachable. Called by the background task and by `force_sync`;
    /// never by the verification path.
    pub async fn drain(&self) {
        loop {
            let mut entry = {
                let mut queue = self.queue.lock().await;
                match queue.pop_front() {
                    Some(entry) => entry,
                    None => return,
                }
            };
            entry.status = SyncEntryStatus::Inflight;

            match self
                .port
                .upsert_credential(&entry.payload, entry.base_version, entry.operation_id)
                .await
            {
                Ok(stored) => {
                    entry.status = SyncEntryStatus::Committed;
                    self.update_cache(&stored).await;
                    debug!(
                        user_id = %entry.user_id,
                        operation_id = %entry.operation_id,
                        version = stored.version,
                        "sync entry committed"
                    );
                }
                Err(StoreError::VersionConflict { actual }) => {
                    self.resolve_conflict(entry, actual).await;
                }
                Err(StoreError::Unavailable) => {
                    entry.retry_count += 1;
                    if entry.retry_count > self.policy.max_retries {
                        self.fail_entry(entry, "retries exhausted while remote unreachable")
                            .await;
                        continue;
                    }
                    entry.status = SyncEntryStatus::Pending;
                    self.queue.lock().await.push_front(entry);
                    return;
                }
                Err(err) => {
                    self.fail_entry(entry, err.to_string()).await;
                }
            }
        }
    }

    /// Remote version moved past the queued operation's base. Backup-code
    /// consumption commutes across devices and is merged by set-difference;
    /// everything else is rejected and the caller must re-fetch.
    async fn resolve_conflict(&self, entry: SyncQueueEntry, remote_version: u64) {
        if entry.operation != SyncOperation::ConsumeBackupCode {
            info!(
                user_id = %entry.user_id,
                operation = ?entry.operation,
                base_version = entry.base_version,
                remote_version,
                "rejecting conflicting sync entry, remote is authoritative"
            );
            self.invalidate_cache(&entry.user_id).await;
            self.fail_entry(entry, MfaError::SyncConflict.to_string())
                .await;
            return;
        }

        let remote = match self.port.get_credential(&entry.user_id).await {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                self.fail_entry(entry, "credential deleted remotely").await;
                return;
            }
            Err(_) => {
                // Remote went away mid-merge; requeue and let the drain
                // loop back off.
                self.queue.lock().await.push_front(entry);
                return;
            }
        };

        // Codes absent from the local payload were consumed here; drop them
        // from the remote set so both consumptions survive the merge.
        let mut merged = remote.clone();
        merged
            .backup_codes
            .retain(|code| entry.payload.backup_codes.contains(code));
        merged.mark_updated();

        match self
            .port
            .upsert_credential(&merged, remote.version, entry.operation_id)
            .await
        {
            Ok(stored) => {
                self.update_cache(&stored).await;
                debug!(
                    user_id = %stored.user_id,
                    remaining = stored.backup_codes.len(),
                    "merged concurrent backup-code consumption"
                );
            }
            Err(StoreError::Unavailable) => {
                self.queue.lock().await.push_front(entry);
            }
            Err(err) => {
                self.fail_entry(entry, err.to_string()).await;
            }
        }
    }

    async fn fail_entry(&self, mut entry: SyncQueueEntry, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            user_id = %entry.user_id,
            operation_id = %entry.operation_id,
            reason = %reason,
            "sync entry failed"
        );
        metrics::counter!("mfa_sync_failures_total", 1);
        entry.mark_failed(reason.clone());
        self.events.publish(MfaEvent::SyncFailed {
            user_id: entry.user_id.clone(),
            operation_id: entry.operation_id,
            reason,
        });
        self.failed.lock().await.push(entry);
    }

    /// Marks every pending and in-flight entry for the user as failed.
    /// Revocation calls this so queued work is surfaced, never silently
    /// discarded.
    pub async fn abandon_user(&self, user_id: &str) {
        let abandoned: Vec<SyncQueueEntry> = {
            let mut queue = self.queue.lock().await;
            let mut kept = VecDeque::with_capacity(queue.len());
            let mut abandoned = Vec::new();
            while let Some(entry) = queue.pop_front() {
                if entry.user_id == user_id {
                    abandoned.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
            abandoned
        };

        for entry in abandoned {
            self.fail_entry(entry, "abandoned by revocation").await;
        }
    }

    pub async fn status(&self, user_id: &str) -> SyncStatus {
        let pending_count = self
            .queue
            .lock()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .count();
        let last_error = self
            .failed
            .lock()
            .await
            .iter()
            .rev()
            .find(|entry| entry.user_id == user_id)
            .and_then(|entry| entry.last_error.clone());
        SyncStatus {
            pending_count,
            last_error,
        }
    }

    /// Runs one drain pass immediately and reports what is left.
    pub async fn force_sync(&self, user_id: &str) -> SyncStatus {
        self.drain().await;
        self.status(user_id).await
    }

    /// Background drain loop. Wakes on queued work or on an interval, and
    /// backs off exponentially while the head entry keeps failing to reach
    /// the remote.
    pub fn spawn_drain(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = coordinator.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(
                        coordinator.policy.drain_interval_ms,
                    )) => {}
                }

                coordinator.drain().await;

                let head_retries = coordinator
                    .queue
                    .lock()
                    .await
                    .front()
                    .map(|entry| entry.retry_count)
                    .unwrap_or(0);
                if head_retries > 0 {
                    let delay = coordinator.policy.backoff_ms(head_retries - 1);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::data::memory::MemoryStore;

    fn coordinator(store: Arc<MemoryStore>) -> SyncCoordinator {
        SyncCoordinator::new(store, SyncPolicy::default(), MfaEventBus::default())
    }

    fn enabled_credential(user_id: &str) -> MfaCredential {
        let mut cred = MfaCredential::new(user_id);
        cred.secret_ciphertext = "ct".into();
        cred.secret_nonce = "n".into();
        cred.enabled = true;
        cred.verified = true;
        cred
    }

    #[tokio::test]
    async fn offline_mutation_drains_after_reconnect() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator(Arc::clone(&store));

        store.set_offline(true);
        sync.apply(SyncOperation::Enable, enabled_credential("user-1"))
            .await
            .expect("offline apply should succeed locally");

        // Local state is immediately visible (read-your-writes).
        let local = sync
            .credential("user-1")
            .await
            .expect("cache read works offline")
            .expect("credential is cached");
        assert!(local.enabled);

        let status = sync.force_sync("user-1").await;
        assert_eq!(status.pending_count, 1, "entry waits for connectivity");

        store.set_offline(false);
        let status = sync.force_sync("user-1").await;
        assert_eq!(status.pending_count, 0);

        let remote = store
            .get_credential("user-1")
            .await
            .expect("store is online")
            .expect("credential was replicated");
        assert!(remote.enabled);
        assert_eq!(remote.version, 1);
    }

    #[tokio::test]
    async fn duplicate_drain_of_same_operation_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator(Arc::clone(&store));

        let cred = enabled_credential("user-1");
        store
            .upsert_credential(&cred, 0, Uuid::new_v4())
            .await
            .expect("seed remote");

        // Same operation_id resubmitted directly: the store answers with
        // the committed record instead of applying it twice.
        let op = Uuid::new_v4();
        let mut update = store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("seeded");
        update.last_used_at = Some(chrono::Utc::now());
        let first = store
            .upsert_credential(&update, 1, op)
            .await
            .expect("first commit");
        let second = store
            .upsert_credential(&update, 1, op)
            .await
            .expect("resubmission");
        assert_eq!(first.version, second.version);
        drop(sync);
    }

    #[tokio::test]
    async fn conflicting_enable_is_rejected_and_surfaced() {
        let store = Arc::new(MemoryStore::new());
        let events = MfaEventBus::default();
        let mut rx = events.subscribe();
        let sync = SyncCoordinator::new(
            Arc::clone(&store) as Arc<dyn PersistencePort>,
            SyncPolicy::default(),
            events,
        );

        // Remote is already at version 1; a queued op based on version 0
        // lost the race.
        store
            .upsert_credential(&enabled_credential("user-1"), 0, Uuid::new_v4())
            .await
            .expect("seed remote");

        sync.apply(SyncOperation::Enable, enabled_credential("user-1"))
            .await
            .expect("apply");
        let status = sync.force_sync("user-1").await;

        assert_eq!(status.pending_count, 0);
        let reason = status.last_error.expect("conflict must be surfaced");
        assert!(reason.contains("conflict"), "got: {reason}");

        let event = rx.try_recv().expect("SyncFailed event published");
        assert!(matches!(event, MfaEvent::SyncFailed { user_id, .. } if user_id == "user-1"));
    }

    #[tokio::test]
    async fn concurrent_backup_code_consumption_merges_by_set_difference() {
        use crate::domain::models::credential::BackupCode;

        let store = Arc::new(MemoryStore::new());
        let sync = coordinator(Arc::clone(&store));

        let code = |tag: &str| BackupCode {
            ciphertext: format!("ct-{tag}"),
            nonce: format!("n-{tag}"),
        };

        let mut seed = enabled_credential("user-1");
        seed.backup_codes = vec![code("a"), code("b"), code("c")];
        store
            .upsert_credential(&seed, 0, Uuid::new_v4())
            .await
            .expect("seed remote at version 1");

        // Device B consumed "c" and already committed (remote now at v2,
        // holding [a, b]).
        let mut device_b = store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("seeded");
        device_b.backup_codes = vec![code("a"), code("b")];
        store
            .upsert_credential(&device_b, 1, Uuid::new_v4())
            .await
            .expect("device B commit");

        // This device consumed "a" based on version 1, holding [b, c].
        let mut local = seed.clone();
        local.version = 1;
        local.backup_codes = vec![code("b"), code("c")];
        sync.apply(SyncOperation::ConsumeBackupCode, local)
            .await
            .expect("apply");

        let status = sync.force_sync("user-1").await;
        assert_eq!(status.pending_count, 0);
        assert!(status.last_error.is_none(), "merge must not fail");

        let remote = store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("still present");
        assert_eq!(
            remote.backup_codes,
            vec![code("b")],
            "both consumptions survive the merge"
        );
        assert_eq!(remote.version, 3);
    }

    #[tokio::test]
    async fn abandoned_entries_are_failed_not_dropped() {
        let store = Arc::new(MemoryStore::new());
        let sync = coordinator(Arc::clone(&store));

        store.set_offline(true);
        sync.apply(SyncOperation::Disable, enabled_credential("user-1"))
            .await
            .expect("apply");

        sync.abandon_user("user-1").await;

        let status = sync.status("user-1").await;
        assert_eq!(status.pending_count, 0);
        let reason = status.last_error.expect("abandonment is surfaced");
        assert!(reason.contains("abandoned"));
    }

    #[tokio::test]
    async fn retries_exhaust_into_a_failed_entry() {
        let store = Arc::new(MemoryStore::new());
        let policy = SyncPolicy {
            max_retries: 2,
            ..SyncPolicy::default()
        };
        let sync = SyncCoordinator::new(
            Arc::clone(&store) as Arc<dyn PersistencePort>,
            policy,
            MfaEventBus::default(),
        );

        store.set_offline(true);
        sync.apply(SyncOperation::Enable, enabled_credential("user-1"))
            .await
            .expect("apply");

        // Each drain pass costs one retry while the store is unreachable.
        for _ in 0..3 {
            sync.drain().await;
        }

        let status = sync.status("user-1").await;
        assert_eq!(status.pending_count, 0);
        assert!(status
            .last_error
            .expect("exhaustion is surfaced")
            .contains("retries exhausted"));
    }
}
