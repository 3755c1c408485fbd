//! Salted envelope encryption for values stored at rest.
//!
//! Each call to [`EnvelopeCipher::encrypt`] draws a fresh 64-byte salt and a
//! fresh 16-byte IV, derives a 256-bit key with PBKDF2-HMAC-SHA512 and seals
//! the plaintext with AES-256-GCM. The result is a self-contained string:
//!
//! ```text
//! base64(salt):base64(iv):base64(tag):base64(ciphertext)
//! ```
//!
//! There is no built-in key. A cipher constructed without a secret refuses
//! to encrypt or decrypt.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha512;
use std::fmt;

/// AES-256-GCM with a 128-bit IV.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

pub const SALT_LEN: usize = 64;
pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const ENVELOPE_SEPARATOR: &str = ":";

/// Environment variable holding the envelope secret.
pub const SECRET_ENV_VAR: &str = "ENCRYPTION_SECRET";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("encryption secret is not configured")]
    MissingSecret,
    #[error("malformed envelope")]
    MalformedEnvelope,
    #[error("envelope authentication failed")]
    AuthenticationFailed,
    #[error("encryption failed")]
    Encryption,
}

#[derive(Clone)]
pub struct EnvelopeCipher {
    secret: Option<Vec<u8>>,
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher")
            .field("configured", &self.secret.is_some())
            .finish()
    }
}

impl EnvelopeCipher {
    /// An empty secret is treated the same as no secret.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.is_empty())
                .map(String::into_bytes),
        }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(SECRET_ENV_VAR).ok())
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    fn secret(&self) -> Result<&[u8], EnvelopeError> {
        self.secret.as_deref().ok_or(EnvelopeError::MissingSecret)
    }

    fn cipher_for(secret: &[u8], salt: &[u8]) -> Result<Aes256Gcm16, EnvelopeError> {
        let mut key = [0u8; KEY_LEN];
        pbkdf2_hmac::<Sha512>(secret, salt, PBKDF2_ITERATIONS, &mut key);
        Aes256Gcm16::new_from_slice(&key).map_err(|_| EnvelopeError::Encryption)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, EnvelopeError> {
        let secret = self.secret()?;

        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let cipher = Self::cipher_for(secret, &salt)?;
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| EnvelopeError::Encryption)?;

        Ok([
            STANDARD.encode(salt),
            STANDARD.encode(iv),
            STANDARD.encode(tag),
            STANDARD.encode(buffer),
        ]
        .join(ENVELOPE_SEPARATOR))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, EnvelopeError> {
        let secret = self.secret()?;

        // The ciphertext part is empty for an empty plaintext; the other
        // three are rejected below by their fixed lengths.
        let parts: Vec<&str> = envelope.split(ENVELOPE_SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(EnvelopeError::MalformedEnvelope);
        }

        let decode = |part: &str| {
            STANDARD
                .decode(part)
                .map_err(|_| EnvelopeError::MalformedEnvelope)
        };
        let salt = decode(parts[0])?;
        let iv = decode(parts[1])?;
        let tag = decode(parts[2])?;
        let mut buffer = decode(parts[3])?;

        if salt.len() != SALT_LEN || iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(EnvelopeError::MalformedEnvelope);
        }

        let cipher = Self::cipher_for(secret, &salt)?;
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| EnvelopeError::AuthenticationFailed)?;

        String::from_utf8(buffer).map_err(|_| EnvelopeError::MalformedEnvelope)
    }

    /// Cheap structural check: four base64 parts, the first three non-empty.
    ///
    /// Does not touch the key, so it cannot tell a valid envelope from one
    /// sealed under a different secret.
    pub fn looks_like_envelope(value: &str) -> bool {
        let parts: Vec<&str> = value.split(ENVELOPE_SEPARATOR).collect();
        parts.len() == 4
            && parts[..3].iter().all(|p| !p.is_empty())
            && parts.iter().all(|p| STANDARD.decode(p).is_ok())
    }
}
