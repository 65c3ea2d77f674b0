//! Authenticated encryption of record payloads using AES-GCM
//!
//! The key length picks the AES variant: 16 bytes for AES-128, 24 for
//! AES-192 and 32 for AES-256. Every encryption draws a fresh 96-bit nonce
//! from the operating system CSPRNG.
//!
//! The framed binary format is:
//! - nonce: 12 bytes
//! - ciphertext: same length as the plaintext
//! - tag: 16 bytes (GCM authentication tag)
//!
//! No associated data is bound into the tag.

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

/// Length of the nonce prefix in bytes
pub const NONCE_LEN: usize = 12;

/// Length of the GCM authentication tag in bytes
pub const TAG_LEN: usize = 16;

/// Shortest framed ciphertext that can possibly verify (empty plaintext)
pub const MIN_FRAMED_LEN: usize = NONCE_LEN + TAG_LEN;

type Aes192Gcm = AesGcm<Aes192, U12>;

enum AesGcmCipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl AesGcmCipher {
    fn new(key: &[u8]) -> Result<Self> {
        let cipher = match key.len() {
            16 => Aes128Gcm::new_from_slice(key).map(Self::Aes128),
            24 => Aes192Gcm::new_from_slice(key).map(Self::Aes192),
            32 => Aes256Gcm::new_from_slice(key).map(Self::Aes256),
            n => {
                return Err(NbcryptError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::InvalidKey,
                    format!("invalid AES key length {n}; expected 16, 24 or 32 bytes"),
                ));
            }
        };
        cipher.map_err(|_| {
            NbcryptError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "AES-GCM rejected a key of valid length",
            )
        })
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Option<Vec<u8>> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let sealed = match self {
            Self::Aes128(c) => c.encrypt(nonce, plaintext),
            Self::Aes192(c) => c.encrypt(nonce, plaintext),
            Self::Aes256(c) => c.encrypt(nonce, plaintext),
        };
        sealed.ok()
    }

    fn open(&self, nonce: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        let nonce = Nonce::<U12>::from_slice(nonce);
        let opened = match self {
            Self::Aes128(c) => c.decrypt(nonce, sealed),
            Self::Aes192(c) => c.decrypt(nonce, sealed),
            Self::Aes256(c) => c.decrypt(nonce, sealed),
        };
        opened.ok()
    }
}

/// Encrypt plaintext under `key` using a random nonce
///
/// Returns the framed format: nonce(12) + ciphertext + tag(16)
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    encrypt_with_nonce(key, plaintext, &nonce)
}

/// Encrypt plaintext under `key` using the provided nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates a random nonce.
/// Reusing a nonce under the same key destroys both confidentiality and integrity.
pub fn encrypt_with_nonce(
    key: &[u8],
    plaintext: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = AesGcmCipher::new(key)?;

    let sealed = cipher.seal(nonce, plaintext).ok_or_else(|| {
        NbcryptError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            "AES-GCM encryption failed",
        )
    })?;

    let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
    output.extend_from_slice(nonce);
    output.extend_from_slice(&sealed);

    Ok(output)
}

/// Decrypt framed ciphertext under `key`
///
/// Framing is validated before the key, so undersized input is always
/// reported as malformed regardless of the key supplied.
pub fn decrypt(key: &[u8], framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < MIN_FRAMED_LEN {
        return Err(NbcryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::MalformedInput,
            format!(
                "ciphertext too short: {} bytes, need at least {} (nonce + tag)",
                framed.len(),
                MIN_FRAMED_LEN
            ),
        ));
    }

    let cipher = AesGcmCipher::new(key)?;
    let (nonce, sealed) = framed.split_at(NONCE_LEN);

    cipher.open(nonce, sealed).ok_or_else(|| {
        NbcryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::AuthenticationFailed,
            "authentication failed: wrong key, tampered-with data, or corrupt input",
        )
    })
}
