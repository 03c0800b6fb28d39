use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Proof of "verified for this device within this window". Checked on every
/// protected-resource access and never trusted past `expires_at`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MfaSession {
    pub session_token: String,
    pub user_id: String,
    pub verified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub device_fingerprint: Option<String>,
    pub valid: bool,
}

impl MfaSession {
    pub fn new(
        session_token: String,
        user_id: impl Into<String>,
        device_fingerprint: Option<String>,
        timeout_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_token,
            user_id: user_id.into(),
            verified_at: now,
            expires_at: now + Duration::minutes(timeout_minutes),
            last_activity_at: now,
            device_fingerprint,
            valid: true,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Observed user activity extends the idle window.
    pub fn touch(&mut self, now: DateTime<Utc>, timeout_minutes: i64) {
        self.last_activity_at = now;
        self.expires_at = now + Duration::minutes(timeout_minutes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_extends_the_idle_window() {
        let mut session = MfaSession::new("token".into(), "user-1", None, 15);
        let original_expiry = session.expires_at;

        let later = Utc::now() + Duration::minutes(10);
        session.touch(later, 15);

        assert!(session.expires_at > original_expiry);
        assert!(!session.is_expired(later));
        assert!(session.is_expired(later + Duration::minutes(16)));
    }
}
