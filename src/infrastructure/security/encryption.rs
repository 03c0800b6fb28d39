use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::constant_time;
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("MFA encryption key must be a base64-encoded 256-bit key")]
    InvalidKey,
    #[error("encryption operation failed")]
    Encrypt,
    #[error("decryption operation failed")]
    Decrypt,
}

/// AES-256-GCM cipher over MFA secrets and backup codes. Constructed once
/// at startup from configuration and passed by reference; the key never
/// leaves this type.
pub struct SecretCipher {
    key_bytes: [u8; KEY_LEN],
}

impl SecretCipher {
    pub fn from_base64(key_b64: &str) -> Result<Self, EncryptionError> {
        let bytes = STANDARD_NO_PAD
            .decode(key_b64.trim().as_bytes())
            .map_err(|_| EncryptionError::InvalidKey)?;

        let key_bytes: [u8; KEY_LEN] =
            bytes.try_into().map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { key_bytes })
    }

    fn sealing_key(&self) -> Result<LessSafeKey, EncryptionError> {
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key_bytes)
            .map_err(|_| EncryptionError::InvalidKey)?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Returns `(ciphertext_b64, nonce_b64)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(String, String), EncryptionError> {
        let sealing_key = self.sealing_key()?;
        let mut in_out = plaintext.to_vec();

        let mut nonce_bytes = [0u8; NONCE_LEN];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| EncryptionError::Encrypt)?;

        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| EncryptionError::Encrypt)?;

        Ok((
            STANDARD_NO_PAD.encode(in_out),
            STANDARD_NO_PAD.encode(nonce_bytes),
        ))
    }

    pub fn decrypt(
        &self,
        ciphertext_b64: &str,
        nonce_b64: &str,
    ) -> Result<Vec<u8>, EncryptionError> {
        let opening_key = self.sealing_key()?;
        let mut ciphertext = STANDARD_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|_| EncryptionError::Decrypt)?;
        let nonce_bytes = STANDARD_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|_| EncryptionError::Decrypt)?;

        if nonce_bytes.len() != NONCE_LEN {
            return Err(EncryptionError::Decrypt);
        }

        let nonce =
            Nonce::try_assume_unique_for_key(&nonce_bytes).map_err(|_| EncryptionError::Decrypt)?;
        let plaintext = opening_key
            .open_in_place(nonce, Aad::empty(), &mut ciphertext)
            .map_err(|_| EncryptionError::Decrypt)?;

        Ok(plaintext.to_vec())
    }
}

pub fn generate_random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    SystemRandom::new()
        .fill(&mut bytes)
        .expect("system RNG should be available");
    bytes
}

/// Human-readable code alphabet: no 0/O, 1/I ambiguity.
pub fn generate_secure_string(len: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| {
            let idx = (rng.next_u32() as usize) % ALPHABET.len();
            ALPHABET[idx] as char
        })
        .collect()
}

/// Constant-time equality; length mismatch is still a fixed-cost rejection.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    constant_time::verify_slices_are_equal(a, b).is_ok()
}
