use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::application::services::config::LockoutPolicy;
use crate::application::services::error::MfaError;
use crate::application::services::sync::SyncCoordinator;
use crate::domain::models::credential::MfaCredential;
use crate::infrastructure::data::port::PersistencePort;

/// One async mutex per user. Verification and attempt-counter mutation for
/// the same user run under this lock, closing the check/increment race;
/// different users proceed concurrently.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            Arc::clone(
                map.entry(user_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drops entries nobody currently holds; the next acquire recreates
    /// them. Called from the idle sweeper so the map does not grow with
    /// every user ever seen.
    pub async fn prune(&self) {
        self.inner
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Tracks failed-attempt counters and enforces timed lockout. Consulted
/// before the TOTP engine on every verification; policy is fail-secure, so
/// an unknown state is never treated as unlocked.
pub struct LockoutGuard {
    policy: LockoutPolicy,
    pub(crate) sync: Arc<SyncCoordinator>,
    port: Arc<dyn PersistencePort>,
}

impl LockoutGuard {
    pub fn new(
        policy: LockoutPolicy,
        sync: Arc<SyncCoordinator>,
        port: Arc<dyn PersistencePort>,
    ) -> Self {
        Self { policy, sync, port }
    }

    /// Rejects while `locked_until` lies in the future, independent of code
    /// correctness.
    pub fn check(&self, cred: &MfaCredential, now: DateTime<Utc>) -> Result<(), MfaError> {
        match cred.locked_until {
            Some(until) if now < until => Err(MfaError::LockedOut(until)),
            _ => Ok(()),
        }
    }

    /// Counts a failed verification. Reaching the threshold sets the
    /// lockout window. The counter is committed to the remote immediately;
    /// if the remote is unreachable the cached counter still enforces
    /// lockout locally and the miss is logged.
    pub async fn record_failure(&self, cred: &mut MfaCredential, now: DateTime<Utc>) {
        cred.failed_attempts += 1;
        if cred.failed_attempts >= self.policy.max_failed_attempts {
            cred.locked_until = Some(now + Duration::minutes(self.policy.lockout_minutes));
            metrics::counter!("mfa_lockouts_total", 1);
            warn!(
                user_id = %cred.user_id,
                attempts = cred.failed_attempts,
                "failed-attempt threshold reached, locking account"
            );
        }
        cred.mark_updated();

        self.sync.update_cache(cred).await;
        match self.sync.commit_now(cred).await {
            Ok(stored) => *cred = stored,
            Err(MfaError::SyncConflict) => self.reapply_after_conflict(cred).await,
            Err(err) => {
                warn!(
                    user_id = %cred.user_id,
                    error = %err,
                    "could not commit attempt counter remotely, enforcing from local cache"
                );
            }
        }

        if let Err(err) = self.port.record_attempt(&cred.user_id, false).await {
            warn!(user_id = %cred.user_id, error = %err, "failed to record attempt");
        }
    }

    /// Another device moved the credential while the counter commit was in
    /// flight. The counters are re-applied on top of the fresh remote
    /// record and committed again, so a failed attempt is never forgotten
    /// to a version race. If the remote stays unreachable the merged copy
    /// is kept in the cache and enforced from there.
    async fn reapply_after_conflict(&self, cred: &mut MfaCredential) {
        match self.sync.credential(&cred.user_id).await {
            Ok(Some(mut remote)) => {
                remote.failed_attempts = remote.failed_attempts.max(cred.failed_attempts);
                remote.locked_until = match (remote.locked_until, cred.locked_until) {
                    (Some(theirs), Some(ours)) => Some(theirs.max(ours)),
                    (theirs, ours) => theirs.or(ours),
                };
                remote.mark_updated();
                self.sync.update_cache(&remote).await;
                match self.sync.commit_now(&remote).await {
                    Ok(stored) => *cred = stored,
                    Err(err) => {
                        self.sync.update_cache(&remote).await;
                        *cred = remote;
                        warn!(
                            user_id = %cred.user_id,
                            error = %err,
                            "conflict re-commit failed, enforcing from local cache"
                        );
                    }
                }
            }
            Ok(None) | Err(_) => {
                self.sync.update_cache(cred).await;
                warn!(
                    user_id = %cred.user_id,
                    "could not re-read remote after version conflict, enforcing from local cache"
                );
            }
        }
    }

    /// Clears counters after a successful verification. The caller commits
    /// the credential itself; this only mutates the in-memory record and
    /// writes the attempt log.
    pub async fn record_success(&self, cred: &mut MfaCredential) {
        cred.reset_lockout();
        if let Err(err) = self.port.record_attempt(&cred.user_id, true).await {
            warn!(user_id = %cred.user_id, error = %err, "failed to record attempt");
        }
    }
}
