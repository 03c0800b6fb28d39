use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single-use recovery credential, stored encrypted so it can be
/// re-displayed during a pending setup and compared in constant time.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BackupCode {
    pub ciphertext: String,
    pub nonce: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MfaCredential {
    pub user_id: String,
    pub secret_ciphertext: String,
    pub secret_nonce: String,
    pub backup_codes: Vec<BackupCode>,
    /// MFA is required at login. Implies `verified`.
    pub enabled: bool,
    /// Initial setup has been confirmed with a correct code.
    pub verified: bool,
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    /// Most recent accepted TOTP time step, rejected on reuse.
    pub last_used_step: Option<i64>,
    /// Monotonically increasing, bumped by the store on every committed
    /// write. Conflict resolution compares against this.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MfaCredential {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            secret_ciphertext: String::new(),
            secret_nonce: String::new(),
            backup_codes: Vec::new(),
            enabled: false,
            verified: false,
            failed_attempts: 0,
            locked_until: None,
            last_used_at: None,
            last_used_step: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_updated(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Setup was started but never confirmed with a correct code.
    pub fn is_pending(&self) -> bool {
        !self.verified && !self.secret_ciphertext.is_empty()
    }

    pub fn backup_codes_remaining(&self) -> usize {
        self.backup_codes.len()
    }

    pub fn reset_lockout(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
        self.mark_updated();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn fresh_credential_is_neither_enabled_nor_verified() {
        let cred = MfaCredential::new("user-1");
        assert!(!cred.enabled);
        assert!(!cred.verified);
        assert!(!cred.is_pending(), "no secret provisioned yet");
        assert_eq!(cred.version, 0);
    }

    #[test]
    fn lockout_window_is_respected() {
        let mut cred = MfaCredential::new("user-1");
        let now = Utc::now();

        cred.locked_until = Some(now + Duration::minutes(30));
        assert!(cred.is_locked(now));
        assert!(!cred.is_locked(now + Duration::minutes(31)));

        cred.reset_lockout();
        assert!(!cred.is_locked(now));
        assert_eq!(cred.failed_attempts, 0);
    }
}
