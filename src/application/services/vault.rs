use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use data_encoding::BASE32_NOPAD;
use qrcode::{render::svg, QrCode};
use tracing::info;

use crate::application::services::config::TotpConfig;
use crate::application::services::error::MfaError;
use crate::application::services::sync::SyncCoordinator;
use crate::domain::models::credential::{BackupCode, MfaCredential};
use crate::domain::models::sync_entry::SyncOperation;
use crate::infrastructure::security::encryption::{
    constant_time_eq, generate_random_bytes, generate_secure_string, SecretCipher,
};

const SECRET_LEN_BYTES: usize = 20; // 160 bits

/// Returned exactly once per setup, for QR/manual entry display. Nothing in
/// it is ever persisted in plaintext.
#[derive(Debug, Clone)]
pub struct SetupMaterial {
    pub secret: String,
    pub provisioning_uri: String,
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

/// Generates, encrypts and decrypts TOTP secrets and backup codes. All
/// mutations route through the SyncCoordinator so they are durable and
/// replicated, never memory-only.
pub struct SecretVault {
    cipher: Arc<SecretCipher>,
    pub(crate) sync: Arc<SyncCoordinator>,
    totp: TotpConfig,
    backup_code_count: usize,
    backup_code_length: usize,
}

impl SecretVault {
    pub fn new(
        cipher: Arc<SecretCipher>,
        sync: Arc<SyncCoordinator>,
        totp: TotpConfig,
        backup_code_count: usize,
        backup_code_length: usize,
    ) -> Self {
        Self {
            cipher,
            sync,
            totp,
            backup_code_count,
            backup_code_length,
        }
    }

    /// Starts (or resumes) MFA setup for a user.
    ///
    /// Calling this again before the first code is verified returns the
    /// *same* pending secret and backup codes rather than silently minting
    /// a second live secret; an enabled credential must use `rotate`.
    pub async fn generate(
        &self,
        user_id: &str,
        identity_label: &str,
    ) -> Result<SetupMaterial, MfaError> {
        let existing = self.sync.credential(user_id).await?;

        if let Some(cred) = &existing {
            if cred.enabled {
                return Err(MfaError::Validation(
                    "MFA is already enabled for this account".into(),
                ));
            }
            if cred.is_pending() {
                return self.resume_pending(cred, identity_label);
            }
        }

        let mut cred = existing.unwrap_or_else(|| MfaCredential::new(user_id));
        let secret = generate_random_bytes(SECRET_LEN_BYTES);
        let (ciphertext, nonce) = self.cipher.encrypt(&secret)?;
        let (raw_codes, stored_codes) = self.generate_backup_codes()?;

        cred.secret_ciphertext = ciphertext;
        cred.secret_nonce = nonce;
        cred.backup_codes = stored_codes;
        cred.enabled = false;
        cred.verified = false;
        cred.last_used_step = None;
        cred.reset_lockout();

        self.sync
            .apply(SyncOperation::RotateSecret, cred.clone())
            .await?;
        info!(user_id, "provisioned pending MFA secret");

        self.build_material(&secret, raw_codes, identity_label)
    }

    /// Re-displays a pending setup: decrypts the stored secret and codes
    /// instead of re-rolling them.
    fn resume_pending(
        &self,
        cred: &MfaCredential,
        identity_label: &str,
    ) -> Result<SetupMaterial, MfaError> {
        let secret = self.decrypt_secret(cred)?;
        let mut raw_codes = Vec::with_capacity(cred.backup_codes.len());
        for code in &cred.backup_codes {
            let plaintext = self.cipher.decrypt(&code.ciphertext, &code.nonce)?;
            raw_codes.push(String::from_utf8(plaintext).map_err(|_| MfaError::Internal)?);
        }
        self.build_material(&secret, raw_codes, identity_label)
    }

    /// Regenerates the secret and backup codes for an enabled credential.
    /// The authenticator must be re-provisioned from the returned material.
    pub async fn rotate(
        &self,
        user_id: &str,
        identity_label: &str,
    ) -> Result<SetupMaterial, MfaError> {
        let mut cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        if !cred.enabled {
            return Err(MfaError::Validation(
                "cannot rotate a credential that is not enabled".into(),
            ));
        }

        let secret = generate_random_bytes(SECRET_LEN_BYTES);
        let (ciphertext, nonce) = self.cipher.encrypt(&secret)?;
        let (raw_codes, stored_codes) = self.generate_backup_codes()?;

        cred.secret_ciphertext = ciphertext;
        cred.secret_nonce = nonce;
        cred.backup_codes = stored_codes;
        cred.last_used_step = None;
        cred.mark_updated();

        self.sync
            .apply(SyncOperation::RotateSecret, cred.clone())
            .await?;
        info!(user_id, "rotated MFA secret");

        self.build_material(&secret, raw_codes, identity_label)
    }

    /// Disables MFA for the user. The credential record survives so audit
    /// history and version continuity are preserved.
    pub async fn disable(&self, user_id: &str) -> Result<(), MfaError> {
        let mut cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        cred.enabled = false;
        cred.mark_updated();
        self.sync.apply(SyncOperation::Disable, cred).await?;
        info!(user_id, "disabled MFA");
        Ok(())
    }

    /// Used only on the verification path; the plaintext never leaves it.
    pub fn decrypt_secret(&self, cred: &MfaCredential) -> Result<Vec<u8>, MfaError> {
        if cred.secret_ciphertext.is_empty() {
            return Err(MfaError::SecretNotFound);
        }
        Ok(self
            .cipher
            .decrypt(&cred.secret_ciphertext, &cred.secret_nonce)?)
    }

    /// Compares the submitted code against every stored backup code in
    /// constant time, with no early exit.
    fn find_backup_code(
        &self,
        cred: &MfaCredential,
        submitted: &str,
    ) -> Result<Option<usize>, MfaError> {
        let submitted = submitted.trim().to_uppercase();
        let mut matched: Option<usize> = None;
        for (idx, code) in cred.backup_codes.iter().enumerate() {
            let plaintext = self.cipher.decrypt(&code.ciphertext, &code.nonce)?;
            if constant_time_eq(&plaintext, submitted.as_bytes()) && matched.is_none() {
                matched = Some(idx);
            }
        }
        Ok(matched)
    }

    /// Comparison half of backup-code verification: runs the full scan
    /// without consuming anything. Callers that must reach a separate
    /// verdict (the login gate's lockout check) before committing to the
    /// consumption check with this first.
    pub async fn match_backup_code(&self, user_id: &str, submitted: &str) -> Result<(), MfaError> {
        let cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;
        if cred.backup_codes.is_empty() {
            return Err(MfaError::BackupCodeExhausted);
        }
        match self.find_backup_code(&cred, submitted)? {
            Some(_) => Ok(()),
            None => Err(MfaError::InvalidCode),
        }
    }

    /// On match the code is removed permanently and the removal is queued
    /// for replication.
    pub async fn consume_backup_code(
        &self,
        user_id: &str,
        submitted: &str,
    ) -> Result<MfaCredential, MfaError> {
        let mut cred = self
            .sync
            .credential(user_id)
            .await?
            .ok_or(MfaError::SecretNotFound)?;

        if cred.backup_codes.is_empty() {
            return Err(MfaError::BackupCodeExhausted);
        }

        let Some(idx) = self.find_backup_code(&cred, submitted)? else {
            return Err(MfaError::InvalidCode);
        };

        cred.backup_codes.remove(idx);
        cred.last_used_at = Some(chrono::Utc::now());
        // A consumed code is a successful verification; the queued
        // snapshot carries the cleared counters so the drain cannot
        // resurrect them on the remote record.
        cred.reset_lockout();
        self.sync
            .apply(SyncOperation::ConsumeBackupCode, cred.clone())
            .await?;
        info!(
            user_id,
            remaining = cred.backup_codes.len(),
            "consumed backup code"
        );
        Ok(cred)
    }

    fn generate_backup_codes(&self) -> Result<(Vec<String>, Vec<BackupCode>), MfaError> {
        let mut raw_codes = Vec::with_capacity(self.backup_code_count);
        let mut stored = Vec::with_capacity(self.backup_code_count);
        for _ in 0..self.backup_code_count {
            let code = generate_secure_string(self.backup_code_length);
            let (ciphertext, nonce) = self.cipher.encrypt(code.as_bytes())?;
            raw_codes.push(code);
            stored.push(BackupCode { ciphertext, nonce });
        }
        Ok((raw_codes, stored))
    }

    fn build_material(
        &self,
        secret: &[u8],
        backup_codes: Vec<String>,
        identity_label: &str,
    ) -> Result<SetupMaterial, MfaError> {
        let secret_b32 = BASE32_NOPAD.encode(secret);
        let provisioning_uri = build_otpauth_uri(identity_label, &secret_b32, &self.totp);
        let qr_code = render_qr_svg(&provisioning_uri)?;
        Ok(SetupMaterial {
            secret: secret_b32,
            provisioning_uri,
            qr_code,
            backup_codes,
        })
    }
}

pub fn build_otpauth_uri(label: &str, secret_b32: &str, config: &TotpConfig) -> String {
    let encoded_label = urlencoding::encode(label);
    let issuer = urlencoding::encode(&config.issuer);
    format!(
        "otpauth://totp/{issuer}:{label}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={digits}&period={period}",
        label = encoded_label,
        issuer = issuer,
        secret = secret_b32,
        digits = config.digits,
        period = config.step,
    )
}

fn render_qr_svg(data: &str) -> Result<String, MfaError> {
    let code = QrCode::new(data.as_bytes()).map_err(|_| MfaError::Internal)?;
    let svg = code.render::<svg::Color>().min_dimensions(256, 256).build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        STANDARD.encode(svg.as_bytes())
    ))
}
