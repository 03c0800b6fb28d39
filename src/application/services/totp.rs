use chrono::{DateTime, Utc};
use ring::hmac;

use crate::application::services::config::TotpConfig;
use crate::application::services::error::MfaError;
use crate::infrastructure::security::encryption::constant_time_eq;

#[derive(Debug, Clone)]
pub struct TotpVerification {
    pub matched_step: i64,
}

/// RFC 4226 dynamic truncation over an HMAC-SHA1 of the big-endian counter.
fn compute_totp(secret: &[u8], counter: u64, config: &TotpConfig) -> u32 {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret);
    let counter_bytes = counter.to_be_bytes();
    let signature = hmac::sign(&key, &counter_bytes);
    let bytes = signature.as_ref();
    let offset = (bytes[bytes.len() - 1] & 0xf) as usize;

    let slice = &bytes[offset..offset + 4];
    let mut binary = u32::from_be_bytes(slice.try_into().expect("slice is 4 bytes"));
    binary &= 0x7FFF_FFFF;

    binary % 10u32.pow(config.digits)
}

pub fn code_at_step(secret: &[u8], step: i64, config: &TotpConfig) -> String {
    let value = compute_totp(secret, step as u64, config);
    format!("{value:0width$}", width = config.digits as usize)
}

pub fn expected_step(now: DateTime<Utc>, config: &TotpConfig) -> i64 {
    now.timestamp() / config.step as i64
}

fn validate_shape(code: &str, digits: u32) -> Result<&str, MfaError> {
    let trimmed = code.trim();
    if trimmed.len() != digits as usize || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(MfaError::InvalidCode);
    }
    Ok(trimmed)
}

/// Checks a submitted code against every step in the acceptance window.
///
/// All window candidates are compared in constant time with no early exit,
/// so a match at the first offset costs the same as a miss. A match on the
/// step recorded in `last_used_step` is a replay and is rejected even
/// though the code itself is correct.
pub fn verify_code(
    secret: &[u8],
    code: &str,
    now: DateTime<Utc>,
    last_used_step: Option<i64>,
    config: &TotpConfig,
) -> Result<TotpVerification, MfaError> {
    let submitted = validate_shape(code, config.digits)?;
    let base_step = expected_step(now, config);

    let mut matched: Option<i64> = None;
    for offset in -config.window..=config.window {
        let step = base_step + offset as i64;
        if step < 0 {
            continue;
        }
        let candidate = code_at_step(secret, step, config);
        if constant_time_eq(candidate.as_bytes(), submitted.as_bytes()) && matched.is_none() {
            matched = Some(step);
        }
    }

    match matched {
        Some(step) if last_used_step == Some(step) => Err(MfaError::Replay),
        Some(step) => Ok(TotpVerification { matched_step: step }),
        None => Err(MfaError::InvalidCode),
    }
}
