use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::services::audit::AuditLog;
use crate::application::services::config::{SessionPolicy, TotpConfig};
use crate::application::services::error::MfaError;
use crate::application::services::events::{MfaEvent, MfaEventBus};
use crate::application::services::lockout::{LockoutGuard, UserLocks};
use crate::application::services::sync::SyncCoordinator;
use crate::application::services::totp;
use crate::application::services::vault::SecretVault;
use crate::domain::models::credential::MfaCredential;
use crate::domain::models::session::MfaSession;
use crate::domain::models::sync_entry::SyncOperation;
use crate::infrastructure::data::port::PersistencePort;
use crate::infrastructure::security::encryption::generate_random_bytes;

const SESSION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: String,
    pub user_id: String,
    pub issued_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

impl Challenge {
    fn new(user_id: &str, minutes: i64) -> Self {
        let issued_at = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            issued_at,
            expires_at: issued_at + ChronoDuration::minutes(minutes),
        }
    }

    pub fn is_expired(&self, now: chrono::DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Unverified,
    ChallengeIssued,
    Verified,
    Expired,
    Revoked,
}

#[derive(Debug, Clone)]
struct UserGate {
    state: GateState,
    /// Bumped on every revocation; an in-flight verification that observed
    /// an older epoch may not finalize.
    epoch: u64,
}

impl Default for UserGate {
    fn default() -> Self {
        Self {
            state: GateState::Unverified,
            epoch: 0,
        }
    }
}

/// Gates protected-resource access behind MFA verification.
///
/// Composes the vault, the TOTP engine and the lockout guard, and owns the
/// `Unverified → ChallengeIssued → Verified → {Expired, Revoked}` state
/// machine. Every verification for a user runs under that user's lock.
pub struct SessionGate {
    session_policy: SessionPolicy,
    totp_config: TotpConfig,
    vault: Arc<SecretVault>,
    lockout: Arc<LockoutGuard>,
    sync: Arc<SyncCoordinator>,
    port: Arc<dyn PersistencePort>,
    audit: AuditLog,
    events: MfaEventBus,
    locks: UserLocks,
    challenges: RwLock<HashMap<String, Challenge>>,
    gates: RwLock<HashMap<String, UserGate>>,
    /// Local revocation record: revocation is unconditional even when the
    /// remote session row cannot be deleted right now. Each token carries
    /// the instant its session would have expired anyway; past that the
    /// sweeper forgets it, since the store no longer answers for it.
    revoked_tokens: RwLock<HashMap<String, chrono::DateTime<Utc>>>,
}

impl SessionGate {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_policy: SessionPolicy,
        totp_config: TotpConfig,
        vault: Arc<SecretVault>,
        lockout: Arc<LockoutGuard>,
        sync: Arc<SyncCoordinator>,
        port: Arc<dyn PersistencePort>,
        events: MfaEventBus,
    ) -> Self {
        Self {
            session_policy,
            totp_config,
            vault,
            lockout,
            sync,
            audit: AuditLog::new(Arc::clone(&port)),
            port,
            events,
            locks: UserLocks::new(),
            challenges: RwLock::new(HashMap::new()),
            gates: RwLock::new(HashMap::new()),
            revoked_tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn gate_state(&self, user_id: &str) -> GateState {
        self.gates
            .read()
            .await
            .get(user_id)
            .map(|gate| gate.state)
            .unwrap_or(GateState::Unverified)
    }

    async fn set_state(&self, user_id: &str, state: GateState) {
        self.gates
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .state = state;
    }

    async fn epoch(&self, user_id: &str) -> u64 {
        self.gates
            .read()
            .await
            .get(user_id)
            .map(|gate| gate.epoch)
            .unwrap_or(0)
    }

    /// Whether MFA must be enforced at login. Errors mean the answer is
    /// unknown; callers must fail secure and require MFA, never skip it.
    pub async fn is_enabled(&self, user_id: &str) -> Result<bool, MfaError> {
        let cred = self.sync.credential(user_id).await?;
        Ok(cred.map(|c| c.enabled).unwrap_or(false))
    }

    /// `UNVERIFIED → CHALLENGE_ISSUED`. Storage failure surfaces as
    /// `StorageUnavailable` and never silently verifies.
    pub async fn request_challenge(&self, user_id: &str) -> Result<Challenge, MfaError> {
        let cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        if !cred.enabled {
            return Err(MfaError::Validation(
                "MFA is not enabled for this account".into(),
            ));
        }

        let challenge = Challenge::new(user_id, self.session_policy.challenge_minutes);
        self.challenges
            .write()
            .await
            .insert(user_id.to_string(), challenge.clone());
        self.set_state(user_id, GateState::ChallengeIssued).await;
        self.audit
            .record(&challenge.user_id, "mfa.challenge.issued", None)
            .await;
        Ok(challenge)
    }

    /// Confirms a pending setup with a live code: `enabled=true,
    /// verified=true`. The mutation is queued through the SyncCoordinator,
    /// so this works against the local cache while offline and replicates
    /// on reconnect.
    pub async fn verify_and_enable(&self, user_id: &str, code: &str) -> Result<(), MfaError> {
        let _guard = self.locks.acquire(user_id).await;
        let now = Utc::now();

        let mut cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        if cred.enabled {
            return Err(MfaError::Validation("MFA is already enabled".into()));
        }
        if !cred.is_pending() {
            return Err(MfaError::SecretNotFound);
        }
        self.lockout.check(&cred, now)?;

        let secret = self.vault.decrypt_secret(&cred)?;
        match totp::verify_code(&secret, code, now, cred.last_used_step, &self.totp_config) {
            Ok(verification) => {
                cred.enabled = true;
                cred.verified = true;
                cred.last_used_step = Some(verification.matched_step);
                cred.last_used_at = Some(now);
                self.lockout.record_success(&mut cred).await;
                self.sync.apply(SyncOperation::Enable, cred).await?;
                self.events.publish(MfaEvent::Enabled {
                    user_id: user_id.to_string(),
                });
                self.audit.record(user_id, "mfa.setup.verified", None).await;
                info!(user_id, "MFA setup verified and enabled");
                Ok(())
            }
            Err(err @ (MfaError::InvalidCode | MfaError::Replay)) => {
                self.lockout.record_failure(&mut cred, now).await;
                self.audit
                    .record(user_id, "mfa.setup.rejected", Some(json!({"reason": err.to_string()})))
                    .await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// `CHALLENGE_ISSUED → VERIFIED`, provided the lockout guard does not
    /// object. Exactly one of `code`/`backup_code` must be given.
    pub async fn verify_login(
        &self,
        user_id: &str,
        code: Option<&str>,
        backup_code: Option<&str>,
        device_fingerprint: Option<String>,
    ) -> Result<MfaSession, MfaError> {
        let _guard = self.locks.acquire(user_id).await;
        let now = Utc::now();
        let epoch = self.epoch(user_id).await;

        if code.is_some() == backup_code.is_some() {
            return Err(MfaError::Validation(
                "provide either a TOTP code or a backup code".into(),
            ));
        }

        let challenge_expired = {
            let challenges = self.challenges.read().await;
            match challenges.get(user_id) {
                None => return Err(MfaError::ChallengeNotFound),
                Some(challenge) => challenge.is_expired(now),
            }
        };
        if challenge_expired {
            self.challenges.write().await.remove(user_id);
            return Err(MfaError::ExpiredChallenge);
        }

        let mut cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        if !cred.enabled {
            return Err(MfaError::Validation(
                "MFA is not enabled for this account".into(),
            ));
        }
        let lockout_state = self.lockout.check(&cred, now);

        if let Some(code) = code {
            // The code check runs even while locked out, so a locked
            // rejection costs the same as a wrong-code rejection.
            let secret = self.vault.decrypt_secret(&cred)?;
            let verification =
                totp::verify_code(&secret, code, now, cred.last_used_step, &self.totp_config);
            lockout_state?;
            match verification {
                Ok(verification) => {
                    cred.last_used_step = Some(verification.matched_step);
                    cred.last_used_at = Some(now);
                    self.lockout.record_success(&mut cred).await;
                    self.sync.commit_now(&cred).await?;
                }
                Err(err @ (MfaError::InvalidCode | MfaError::Replay)) => {
                    self.reject_attempt(&mut cred, now, &err).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        } else if let Some(backup) = backup_code {
            // The comparison scan runs even while locked out, so a locked
            // rejection costs the same as a wrong-code rejection. Nothing
            // is consumed until the lockout verdict is in.
            let matched = self.vault.match_backup_code(user_id, backup).await;
            lockout_state?;
            match matched {
                Ok(()) => {
                    let mut updated = self.vault.consume_backup_code(user_id, backup).await?;
                    self.lockout.record_success(&mut updated).await;
                    // The consumption is already queued at this version;
                    // the cached copy must stay one ahead of it.
                    updated.version += 1;
                    self.sync.update_cache(&updated).await;
                }
                Err(err @ (MfaError::InvalidCode | MfaError::BackupCodeExhausted)) => {
                    self.reject_attempt(&mut cred, now, &err).await;
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        let token = URL_SAFE_NO_PAD.encode(generate_random_bytes(SESSION_TOKEN_BYTES));
        let session = MfaSession::new(
            token,
            user_id,
            device_fingerprint,
            self.session_policy.timeout_minutes,
        );
        self.port.create_session(&session).await?;
        self.finalize_verified(user_id, epoch, &session).await?;

        self.challenges.write().await.remove(user_id);
        self.events.publish(MfaEvent::Verified {
            user_id: user_id.to_string(),
            session_token: session.session_token.clone(),
        });
        self.audit
            .record(
                user_id,
                "mfa.login.verified",
                session
                    .device_fingerprint
                    .as_ref()
                    .map(|fp| json!({"device_fingerprint": fp})),
            )
            .await;
        Ok(session)
    }

    /// Commits the `VERIFIED` transition if and only if no revocation
    /// landed after `observed_epoch` was read. A revocation that landed
    /// while the verification was in flight wins: the freshly created
    /// session must not become visible, and the `Revoked` state must not
    /// be overwritten. The epoch check and the transition share one
    /// critical section.
    async fn finalize_verified(
        &self,
        user_id: &str,
        observed_epoch: u64,
        session: &MfaSession,
    ) -> Result<(), MfaError> {
        let epoch_moved = {
            let mut gates = self.gates.write().await;
            let gate = gates.entry(user_id.to_string()).or_default();
            if gate.epoch == observed_epoch {
                gate.state = GateState::Verified;
                false
            } else {
                true
            }
        };

        if epoch_moved {
            if let Err(err) = self.port.invalidate_session(&session.session_token).await {
                warn!(user_id, error = %err, "failed to discard superseded session");
            }
            return Err(MfaError::ExpiredChallenge);
        }
        Ok(())
    }

    async fn reject_attempt(&self, cred: &mut MfaCredential, now: chrono::DateTime<Utc>, err: &MfaError) {
        self.lockout.record_failure(cred, now).await;
        self.audit
            .record(
                &cred.user_id,
                "mfa.login.rejected",
                Some(json!({"reason": err.to_string()})),
            )
            .await;
    }

    /// Turns MFA off for the account and clears transient gate state, so a
    /// later re-setup starts from `UNVERIFIED`.
    pub async fn disable(&self, user_id: &str) -> Result<(), MfaError> {
        let _guard = self.locks.acquire(user_id).await;
        self.vault.disable(user_id).await?;
        self.challenges.write().await.remove(user_id);
        self.set_state(user_id, GateState::Unverified).await;
        self.events.publish(MfaEvent::Disabled {
            user_id: user_id.to_string(),
        });
        self.audit.record(user_id, "mfa.disabled", None).await;
        Ok(())
    }

    /// Checks a session on protected-resource access and extends its idle
    /// window. Never answers from a cache older than the store.
    pub async fn validate_session(&self, token: &str) -> Result<MfaSession, MfaError> {
        if self.revoked_tokens.read().await.contains_key(token) {
            return Err(MfaError::SessionNotFound);
        }

        let mut session = self
            .port
            .get_session(token)
            .await?
            .ok_or(MfaError::SessionNotFound)?;
        if !session.valid {
            return Err(MfaError::SessionNotFound);
        }

        let now = Utc::now();
        if session.is_expired(now) {
            self.expire_session(&session).await;
            return Err(MfaError::SessionExpired);
        }

        session.touch(now, self.session_policy.timeout_minutes);
        self.port.update_session(&session).await?;
        Ok(session)
    }

    async fn expire_session(&self, session: &MfaSession) {
        if let Err(err) = self.port.invalidate_session(&session.session_token).await {
            warn!(
                user_id = %session.user_id,
                error = %err,
                "failed to remove expired session"
            );
        }
        self.set_state(&session.user_id, GateState::Expired).await;
        self.events.publish(MfaEvent::SessionExpired {
            user_id: session.user_id.clone(),
            session_token: session.session_token.clone(),
        });
        self.audit
            .record(&session.user_id, "mfa.session.expired", None)
            .await;
    }

    /// `VERIFIED/CHALLENGE_ISSUED → REVOKED`. Synchronous and
    /// unconditional: local challenge and session state is cleared and
    /// pending sync work abandoned regardless of network or lockout state.
    pub async fn revoke_session(&self, token: &str) {
        let now = Utc::now();
        let session = match self.port.get_session(token).await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "could not resolve session during revoke");
                None
            }
        };
        let forget_after = session
            .as_ref()
            .map(|s| s.expires_at.max(now))
            .unwrap_or_else(|| now + ChronoDuration::minutes(self.session_policy.timeout_minutes));
        self.revoked_tokens
            .write()
            .await
            .insert(token.to_string(), forget_after);

        if let Err(err) = self.port.invalidate_session(token).await {
            warn!(error = %err, "failed to invalidate session remotely, revoked locally");
        }

        if let Some(session) = session {
            self.revoke_user(&session.user_id, token).await;
        }
    }

    /// Emergency revoke for a user: clears challenges, bumps the
    /// revocation epoch so in-flight verifications cannot finalize, and
    /// abandons queued sync work (surfaced as failed, not dropped).
    pub async fn revoke_user(&self, user_id: &str, token: &str) {
        self.challenges.write().await.remove(user_id);
        {
            let mut gates = self.gates.write().await;
            let gate = gates.entry(user_id.to_string()).or_default();
            gate.state = GateState::Revoked;
            gate.epoch += 1;
        }
        self.sync.abandon_user(user_id).await;
        self.events.publish(MfaEvent::SessionRevoked {
            user_id: user_id.to_string(),
            session_token: token.to_string(),
        });
        self.audit.record(user_id, "mfa.session.revoked", None).await;
        info!(user_id, "MFA state revoked");
    }

    /// One sweep of the idle timer: expires every session past its window.
    /// Invalidation removes a session from later sweeps, so each idle
    /// period fires exactly once.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let expired = match self.port.expired_sessions(now).await {
            Ok(expired) => expired,
            Err(err) => {
                warn!(error = %err, "session sweep skipped, store unavailable");
                return;
            }
        };
        for session in expired {
            self.expire_session(&session).await;
        }

        // Tokens whose session window has lapsed need no local record any
        // more; the store rejects them on its own.
        self.revoked_tokens
            .write()
            .await
            .retain(|_, forget_after| *forget_after > now);
        self.locks.prune().await;
        // Default-equivalent gate entries are recreated on demand.
        self.gates
            .write()
            .await
            .retain(|_, gate| gate.epoch != 0 || gate.state != GateState::Unverified);
    }

    #[cfg(test)]
    async fn revoked_token_count(&self) -> usize {
        self.revoked_tokens.read().await.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(gate.session_policy.sweep_interval_secs));
            loop {
                interval.tick().await;
                gate.sweep_expired().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::config::{LockoutPolicy, SyncPolicy};
    use crate::application::services::vault::SetupMaterial;
    use crate::infrastructure::data::memory::MemoryStore;
    use crate::infrastructure::security::encryption::SecretCipher;
    use data_encoding::BASE32_NOPAD;

    struct Harness {
        gate: Arc<SessionGate>,
        store: Arc<MemoryStore>,
        events: MfaEventBus,
    }

    fn harness() -> Harness {
        let key = base64::engine::general_purpose::STANDARD_NO_PAD.encode([5u8; 32]);
        let cipher = Arc::new(SecretCipher::from_base64(&key).expect("key parses"));
        let store = Arc::new(MemoryStore::new());
        let port: Arc<dyn PersistencePort> = Arc::clone(&store) as _;
        let events = MfaEventBus::default();
        let sync = Arc::new(SyncCoordinator::new(
            Arc::clone(&port),
            SyncPolicy::default(),
            events.clone(),
        ));
        let totp_config = TotpConfig::default();
        let vault = Arc::new(SecretVault::new(
            cipher,
            Arc::clone(&sync),
            totp_config.clone(),
            10,
            12,
        ));
        let lockout = Arc::new(LockoutGuard::new(
            LockoutPolicy::default(),
            Arc::clone(&sync),
            Arc::clone(&port),
        ));
        let gate = Arc::new(SessionGate::new(
            SessionPolicy::default(),
            totp_config,
            vault,
            lockout,
            sync,
            port,
            events.clone(),
        ));
        Harness { gate, store, events }
    }

    fn code_at(material: &SetupMaterial, step_offset: i64) -> String {
        let secret = BASE32_NOPAD
            .decode(material.secret.as_bytes())
            .expect("setup secret is base32");
        let config = TotpConfig::default();
        let step = totp::expected_step(Utc::now(), &config) + step_offset;
        totp::code_at_step(&secret, step, &config)
    }

    fn current_code(material: &SetupMaterial) -> String {
        code_at(material, 0)
    }

    // Confirms setup with the previous step's code, which the drift window
    // accepts, so a login in the same test can still use the current step
    // without tripping the replay guard.
    async fn enroll(h: &Harness, user_id: &str) -> SetupMaterial {
        let material = h
            .gate
            .vault
            .generate(user_id, "user@example.com")
            .await
            .expect("setup starts");
        h.gate
            .verify_and_enable(user_id, &code_at(&material, -1))
            .await
            .expect("setup verifies");
        h.gate.sync.force_sync(user_id).await;
        material
    }

    #[tokio::test]
    async fn fresh_setup_enables_with_ten_backup_codes() {
        let h = harness();
        let material = h
            .gate
            .vault
            .generate("user-1", "alice@example.com")
            .await
            .expect("setup starts");

        h.gate
            .verify_and_enable("user-1", &current_code(&material))
            .await
            .expect("live code confirms setup");

        h.gate.sync.force_sync("user-1").await;
        let remote = h
            .store
            .get_credential("user-1")
            .await
            .expect("store online")
            .expect("credential replicated");
        assert!(remote.enabled);
        assert!(remote.verified);
        assert_eq!(remote.backup_codes.len(), 10);
    }

    #[tokio::test]
    async fn third_wrong_code_locks_out_even_a_correct_fourth() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate
            .request_challenge("user-1")
            .await
            .expect("challenge issues");
        for _ in 0..3 {
            let err = h
                .gate
                .verify_login("user-1", Some("000000"), None, None)
                .await
                .expect_err("wrong code fails");
            assert!(matches!(err, MfaError::InvalidCode));
        }

        let err = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect_err("locked out despite correct code");
        assert!(matches!(err, MfaError::LockedOut(_)));
    }

    #[tokio::test]
    async fn offline_enable_replicates_after_reconnect() {
        let h = harness();
        let material = h
            .gate
            .vault
            .generate("user-1", "alice@example.com")
            .await
            .expect("setup while online");

        h.store.set_offline(true);
        h.gate
            .verify_and_enable("user-1", &current_code(&material))
            .await
            .expect("verification works against the local cache");
        assert!(
            h.gate.is_enabled("user-1").await.expect("cache answers"),
            "read-your-writes"
        );

        h.store.set_offline(false);
        let status = h.gate.sync.force_sync("user-1").await;
        assert_eq!(status.pending_count, 0);

        let remote = h
            .store
            .get_credential("user-1")
            .await
            .expect("store online")
            .expect("credential replicated");
        assert!(remote.enabled);
        assert_eq!(remote.version, 2, "rotate + enable both committed");
    }

    #[tokio::test]
    async fn idle_session_expires_and_user_rechallenges() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate
            .request_challenge("user-1")
            .await
            .expect("challenge issues");
        let session = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect("login verifies");
        assert_eq!(h.gate.gate_state("user-1").await, GateState::Verified);

        // Push the session past its idle window.
        let mut idle = h
            .store
            .get_session(&session.session_token)
            .await
            .expect("online")
            .expect("session stored");
        idle.expires_at = Utc::now() - ChronoDuration::minutes(1);
        h.store.update_session(&idle).await.expect("update");

        h.gate.sweep_expired().await;
        assert_eq!(h.gate.gate_state("user-1").await, GateState::Expired);

        let err = h
            .gate
            .validate_session(&session.session_token)
            .await
            .expect_err("expired session rejected");
        assert!(matches!(err, MfaError::SessionNotFound | MfaError::SessionExpired));

        // Re-entry goes back through a fresh challenge.
        h.gate
            .request_challenge("user-1")
            .await
            .expect("new challenge issues");
        assert_eq!(h.gate.gate_state("user-1").await, GateState::ChallengeIssued);
    }

    #[tokio::test]
    async fn activity_extends_the_session() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        let session = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect("login verifies");

        let refreshed = h
            .gate
            .validate_session(&session.session_token)
            .await
            .expect("valid session touches");
        assert!(refreshed.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn revoke_wins_over_inflight_sync() {
        let h = harness();
        let material = h
            .gate
            .vault
            .generate("user-1", "alice@example.com")
            .await
            .expect("setup while online");
        h.gate.sync.force_sync("user-1").await;

        // Enable while offline: the Enable operation sits in the queue.
        h.store.set_offline(true);
        h.gate
            .verify_and_enable("user-1", &current_code(&material))
            .await
            .expect("offline enable");

        let mut rx = h.events.subscribe();
        h.gate.revoke_user("user-1", "no-session").await;
        assert_eq!(h.gate.gate_state("user-1").await, GateState::Revoked);

        // Reconnect: the abandoned operation must not commit.
        h.store.set_offline(false);
        let status = h.gate.sync.force_sync("user-1").await;
        assert_eq!(status.pending_count, 0);
        assert!(status
            .last_error
            .expect("abandonment surfaced")
            .contains("abandoned"));

        let remote = h
            .store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("pending credential exists");
        assert!(!remote.enabled, "in-flight enable cannot land after revoke");

        // Both the sync failure and the revocation were broadcast.
        let mut saw_revoked = false;
        let mut saw_sync_failed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                MfaEvent::SessionRevoked { .. } => saw_revoked = true,
                MfaEvent::SyncFailed { .. } => saw_sync_failed = true,
                _ => {}
            }
        }
        assert!(saw_revoked);
        assert!(saw_sync_failed);
    }

    #[tokio::test]
    async fn revoked_session_is_rejected_immediately() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        let session = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect("login verifies");

        h.gate.revoke_session(&session.session_token).await;
        assert_eq!(h.gate.gate_state("user-1").await, GateState::Revoked);

        let err = h
            .gate
            .validate_session(&session.session_token)
            .await
            .expect_err("revoked session rejected");
        assert!(matches!(err, MfaError::SessionNotFound));
    }

    #[tokio::test]
    async fn backup_code_login_counts_toward_lockout_when_wrong() {
        let h = harness();
        let _material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        for _ in 0..3 {
            let err = h
                .gate
                .verify_login("user-1", None, Some("WRONGWRONG22"), None)
                .await
                .expect_err("wrong backup code fails");
            assert!(matches!(err, MfaError::InvalidCode));
        }

        let err = h
            .gate
            .verify_login("user-1", None, Some("WRONGWRONG22"), None)
            .await
            .expect_err("guard applies to backup codes too");
        assert!(matches!(err, MfaError::LockedOut(_)));
    }

    #[tokio::test]
    async fn backup_code_login_succeeds_and_consumes() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        let session = h
            .gate
            .verify_login("user-1", None, Some(&material.backup_codes[0]), None)
            .await
            .expect("backup code verifies");
        assert!(session.valid);

        h.gate.sync.force_sync("user-1").await;
        let remote = h
            .store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("credential");
        assert_eq!(remote.backup_codes.len(), 9);
    }

    #[tokio::test]
    async fn backup_code_login_durably_resets_failure_count() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        for _ in 0..2 {
            let err = h
                .gate
                .verify_login("user-1", Some("000000"), None, None)
                .await
                .expect_err("wrong code fails");
            assert!(matches!(err, MfaError::InvalidCode));
        }

        h.gate
            .verify_login("user-1", None, Some(&material.backup_codes[0]), None)
            .await
            .expect("backup code verifies");

        h.gate.sync.force_sync("user-1").await;
        let remote = h
            .store
            .get_credential("user-1")
            .await
            .expect("online")
            .expect("credential");
        assert_eq!(
            remote.failed_attempts, 0,
            "replication must not resurrect pre-success failures"
        );
        assert!(remote.locked_until.is_none());
        assert_eq!(remote.backup_codes.len(), 9);
    }

    #[tokio::test]
    async fn locked_out_backup_attempt_does_not_consume_the_code() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        for _ in 0..3 {
            let _ = h
                .gate
                .verify_login("user-1", Some("000000"), None, None)
                .await
                .expect_err("wrong code fails");
        }

        let err = h
            .gate
            .verify_login("user-1", None, Some(&material.backup_codes[0]), None)
            .await
            .expect_err("locked out despite correct backup code");
        assert!(matches!(err, MfaError::LockedOut(_)));

        let cred = h
            .gate
            .sync
            .credential("user-1")
            .await
            .expect("cache answers")
            .expect("credential");
        assert_eq!(
            cred.backup_codes.len(),
            10,
            "a locked attempt must not burn the code"
        );
    }

    #[tokio::test]
    async fn revocation_during_finalization_cannot_restore_verified() {
        let h = harness();
        enroll(&h, "user-1").await;

        let observed = h.gate.epoch("user-1").await;
        let session = MfaSession::new("token-1".to_string(), "user-1", None, 15);
        h.store
            .create_session(&session)
            .await
            .expect("session stored");

        h.gate.revoke_user("user-1", "token-0").await;

        let err = h
            .gate
            .finalize_verified("user-1", observed, &session)
            .await
            .expect_err("revocation wins");
        assert!(matches!(err, MfaError::ExpiredChallenge));
        assert_eq!(h.gate.gate_state("user-1").await, GateState::Revoked);
        assert!(
            h.store
                .get_session("token-1")
                .await
                .expect("online")
                .is_none(),
            "superseded session discarded"
        );
    }

    #[tokio::test]
    async fn sweep_forgets_revoked_tokens_after_their_window() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        h.gate.request_challenge("user-1").await.expect("challenge");
        let session = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect("login verifies");

        // Let the session's own window lapse before revoking.
        let mut stale = h
            .store
            .get_session(&session.session_token)
            .await
            .expect("online")
            .expect("session stored");
        stale.expires_at = Utc::now() - ChronoDuration::minutes(1);
        h.store.update_session(&stale).await.expect("update");

        h.gate.revoke_session(&session.session_token).await;
        assert_eq!(h.gate.revoked_token_count().await, 1);

        h.gate.sweep_expired().await;
        assert_eq!(
            h.gate.revoked_token_count().await,
            0,
            "the token is forgotten once its window has passed"
        );

        let err = h
            .gate
            .validate_session(&session.session_token)
            .await
            .expect_err("session is gone either way");
        assert!(matches!(err, MfaError::SessionNotFound));
    }

    #[tokio::test]
    async fn login_without_a_challenge_is_rejected() {
        let h = harness();
        let material = enroll(&h, "user-1").await;

        let err = h
            .gate
            .verify_login("user-1", Some(&current_code(&material)), None, None)
            .await
            .expect_err("no challenge was issued");
        assert!(matches!(err, MfaError::ChallengeNotFound));
    }

    #[tokio::test]
    async fn storage_outage_fails_closed_not_verified() {
        let h = harness();
        enroll(&h, "user-1").await;

        h.store.set_offline(true);
        // No cached state for an unknown user: eligibility is unknowable.
        let err = h
            .gate
            .request_challenge("user-2")
            .await
            .expect_err("fail closed");
        assert!(matches!(err, MfaError::StorageUnavailable));
        let err = h
            .gate
            .is_enabled("user-2")
            .await
            .expect_err("enabled state unknown");
        assert!(matches!(err, MfaError::StorageUnavailable));
    }
}
