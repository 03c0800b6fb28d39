const DEFAULT_ISSUER: &str = "MfaGate";

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub digits: u32,
    pub step: u64,
    /// Accepted drift in steps on either side of "now".
    pub window: i32,
    pub issuer: String,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            step: 30,
            window: 1,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 3,
            lockout_minutes: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub timeout_minutes: i64,
    pub challenge_minutes: i64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            timeout_minutes: 15,
            challenge_minutes: 5,
            sweep_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
    pub drain_interval_ms: u64,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_retries: 6,
            drain_interval_ms: 500,
        }
    }
}

impl SyncPolicy {
    /// Exponential backoff for the given retry, capped at `max_delay_ms`.
    pub fn backoff_ms(&self, retry_count: u32) -> u64 {
        let exp = retry_count.min(16);
        self.base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct MfaConfig {
    pub totp: TotpConfig,
    pub lockout: LockoutPolicy,
    pub session: SessionPolicy,
    pub sync: SyncPolicy,
    pub backup_code_count: usize,
    pub backup_code_length: usize,
    pub encryption_key: Option<String>,
    pub jwt_secret: Option<String>,
}

impl MfaConfig {
    pub fn from_env() -> Self {
        let totp = TotpConfig {
            digits: env_parse("MFA_TOTP_DIGITS", 6),
            step: env_parse("MFA_TOTP_STEP", 30),
            window: env_parse("MFA_TOTP_WINDOW", 1),
            issuer: std::env::var("MFA_TOTP_ISSUER")
                .unwrap_or_else(|_| DEFAULT_ISSUER.to_string()),
        };

        let lockout = LockoutPolicy {
            max_failed_attempts: env_parse("MFA_LOCKOUT_MAX_ATTEMPTS", 3),
            lockout_minutes: env_parse("MFA_LOCKOUT_MINUTES", 30),
        };

        let session = SessionPolicy {
            timeout_minutes: env_parse("MFA_SESSION_TIMEOUT_MINUTES", 15),
            challenge_minutes: env_parse("MFA_CHALLENGE_MINUTES", 5),
            sweep_interval_secs: env_parse("MFA_SESSION_SWEEP_SECS", 30),
        };

        let sync = SyncPolicy {
            base_delay_ms: env_parse("MFA_SYNC_BASE_DELAY_MS", 1_000),
            max_delay_ms: env_parse("MFA_SYNC_MAX_DELAY_MS", 60_000),
            max_retries: env_parse("MFA_SYNC_MAX_RETRIES", 6),
            drain_interval_ms: env_parse("MFA_SYNC_DRAIN_INTERVAL_MS", 500),
        };

        Self {
            totp,
            lockout,
            session,
            sync,
            backup_code_count: env_parse("MFA_BACKUP_CODE_COUNT", 10),
            backup_code_length: env_parse("MFA_BACKUP_CODE_LENGTH", 12),
            encryption_key: std::env::var("MFA_ENCRYPTION_KEY").ok(),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.backoff_ms(0), 1_000);
        assert_eq!(policy.backoff_ms(1), 2_000);
        assert_eq!(policy.backoff_ms(3), 8_000);
        assert_eq!(policy.backoff_ms(10), 60_000, "delay is capped");
    }
}
