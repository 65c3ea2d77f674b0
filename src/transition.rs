//! Encrypt/decrypt state transition of a record
//!
//! The direction is chosen from `data` alone: non-empty plaintext is always
//! encrypted, even when `encrypted_data` is also populated. An empty `data`
//! selects decryption, which then requires `encrypted_data`.
//!
//! [`apply`] consumes the record and hands back a new one only once every
//! fallible step has succeeded, so callers never observe a record with one
//! field updated and the other not.

use std::fmt;

use tracing::debug;
use zeroize::Zeroize;

use crate::aead;
use crate::armor;
use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use crate::key_source::KeyResolver;
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Encrypt => f.write_str("encrypt"),
            Direction::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// What happens to `encrypted_data` after a successful decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecryptPolicy {
    /// Empty `encrypted_data`, leaving plaintext as the only content.
    #[default]
    ClearCiphertext,
    /// Keep `encrypted_data` next to the recovered plaintext.
    RetainCiphertext,
}

/// Pick the transition for `record`.
pub fn select_direction(record: &Record) -> Result<Direction> {
    if record.holds_plaintext() {
        Ok(Direction::Encrypt)
    } else if record.holds_ciphertext() {
        Ok(Direction::Decrypt)
    } else {
        Err(NbcryptError::with_kind(
            ErrorCategory::User,
            ErrorKind::NothingToDecrypt,
            "encrypted_data is empty, cannot decrypt",
        ))
    }
}

/// Run one transition on `record` under `key`.
pub fn apply(mut record: Record, key: &[u8], policy: DecryptPolicy) -> Result<Record> {
    match select_direction(&record)? {
        Direction::Encrypt => {
            let framed = aead::encrypt(key, record.data.as_bytes())
                .map_err(|e| e.with_context("failed to encrypt data"))?;
            record.encrypted_data = armor::encode_binary(&framed);
            record.data.zeroize();
        }
        Direction::Decrypt => {
            let framed = armor::decode_binary(&record.encrypted_data)
                .map_err(|e| e.with_context("failed to decode encrypted_data"))?;
            let plaintext = aead::decrypt(key, &framed)
                .map_err(|e| e.with_context("failed to decrypt data"))?;
            let plaintext = String::from_utf8(plaintext).map_err(|e| {
                NbcryptError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::MalformedInput,
                    "decrypted data is not valid UTF-8 text",
                    e,
                )
            })?;
            if plaintext.is_empty() {
                return Err(NbcryptError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::MalformedInput,
                    "encrypted_data decrypts to empty text",
                ));
            }

            record.data = plaintext;
            if policy == DecryptPolicy::ClearCiphertext {
                record.encrypted_data.clear();
            }
        }
    }

    Ok(record)
}

/// Resolve the record's key and run one transition.
///
/// The key lives only for the duration of this call.
pub fn run(
    record: Record,
    resolver: &mut dyn KeyResolver,
    policy: DecryptPolicy,
) -> Result<(Record, Direction)> {
    let direction = select_direction(&record)?;
    debug!(
        %direction,
        vault = %record.key_vault_name,
        secret = %record.secret_name,
        "direction selected"
    );

    let key = resolver
        .resolve_key(&record.key_vault_name, &record.secret_name)
        .map_err(|e| {
            e.with_context(format!(
                "failed to resolve key '{}' from vault '{}'",
                record.secret_name, record.key_vault_name
            ))
        })?;
    debug!(key_len = key.len(), "key resolved");

    let record = apply(record, &key, policy)?;
    Ok((record, direction))
}
