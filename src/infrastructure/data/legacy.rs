use chrono::{DateTime, Utc};
use data_encoding::BASE32_NOPAD;
use serde_json::Value;

use crate::domain::models::credential::{BackupCode, MfaCredential};
use crate::infrastructure::data::port::StoreError;
use crate::infrastructure::security::encryption::SecretCipher;

/// One-time upgrade of a legacy-format MFA record into the unified schema.
///
/// The legacy generation stored camelCase keys, the TOTP secret as plaintext
/// base32 and backup codes as bare strings. Adapters call this when typed
/// decoding of a stored record fails, then rewrite the record in place so
/// the upgrade happens exactly once per credential.
pub fn upgrade_record(value: &Value, cipher: &SecretCipher) -> Result<MfaCredential, StoreError> {
    let obj = value.as_object().ok_or(StoreError::Serialization)?;

    let user_id = obj
        .get("userId")
        .or_else(|| obj.get("user_id"))
        .and_then(Value::as_str)
        .ok_or(StoreError::Serialization)?;

    let secret_b32 = obj
        .get("secret")
        .or_else(|| obj.get("totpSecret"))
        .and_then(Value::as_str)
        .ok_or(StoreError::Serialization)?;
    let secret = BASE32_NOPAD
        .decode(secret_b32.trim().to_uppercase().as_bytes())
        .map_err(|_| StoreError::Serialization)?;
    let (secret_ciphertext, secret_nonce) = cipher
        .encrypt(&secret)
        .map_err(|_| StoreError::Serialization)?;

    let mut backup_codes = Vec::new();
    if let Some(codes) = obj.get("backupCodes").and_then(Value::as_array) {
        for code in codes {
            let Some(plaintext) = code.as_str() else {
                continue;
            };
            let (ciphertext, nonce) = cipher
                .encrypt(plaintext.as_bytes())
                .map_err(|_| StoreError::Serialization)?;
            backup_codes.push(BackupCode { ciphertext, nonce });
        }
    }

    let enabled = obj
        .get("mfaEnabled")
        .or_else(|| obj.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let verified = obj
        .get("mfaVerified")
        .or_else(|| obj.get("verified"))
        .and_then(Value::as_bool)
        // The legacy schema had no separate verified flag; an enabled
        // credential must have been confirmed once.
        .unwrap_or(enabled);

    let parse_ts = |key: &str| -> Option<DateTime<Utc>> {
        obj.get(key)
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse().ok())
    };

    let now = Utc::now();
    Ok(MfaCredential {
        user_id: user_id.to_string(),
        secret_ciphertext,
        secret_nonce,
        backup_codes,
        enabled,
        verified,
        failed_attempts: obj
            .get("failedAttempts")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        locked_until: parse_ts("lockedUntil"),
        last_used_at: parse_ts("lastUsedAt"),
        last_used_step: None,
        version: obj.get("version").and_then(Value::as_u64).unwrap_or(1),
        created_at: parse_ts("createdAt").unwrap_or(now),
        updated_at: now,
    })
}
