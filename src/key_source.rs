//! Key resolution
//!
//! A [`KeyResolver`] maps a record's `(key_vault_name, secret_name)` pair to
//! raw AES key bytes. The remote Azure implementation lives in
//! [`crate::azure`]; this module holds the trait, the secret encoding
//! contract and the local resolvers.

use std::io::Read;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::Zeroizing;

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};

/// Trait for resolving key material from various sources
pub trait KeyResolver {
    /// Resolve the key identified by `secret` within `vault`.
    ///
    /// Returns raw key bytes wrapped in `Zeroizing` so the material is wiped
    /// from memory when dropped. Implementations must not retry or cache on
    /// behalf of the caller.
    fn resolve_key(&mut self, vault: &str, secret: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// How a stored secret string maps to key bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// The secret is standard base64 of the key bytes.
    #[default]
    Base64,
    /// The secret's UTF-8 bytes are the key.
    Raw,
}

impl KeyEncoding {
    /// Turn secret text into key bytes.
    pub fn decode(self, secret: &str) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            KeyEncoding::Raw => Ok(Zeroizing::new(secret.as_bytes().to_vec())),
            KeyEncoding::Base64 => STANDARD
                .decode(secret.trim_ascii())
                .map(Zeroizing::new)
                .map_err(|e| {
                    NbcryptError::with_kind_and_source(
                        ErrorCategory::User,
                        ErrorKind::KeyResolutionFailed,
                        "secret value is not valid base64 key material",
                        e,
                    )
                }),
        }
    }
}

impl FromStr for KeyEncoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "base64" => Ok(KeyEncoding::Base64),
            "raw" => Ok(KeyEncoding::Raw),
            other => Err(format!("unknown key encoding '{other}' (expected base64 or raw)")),
        }
    }
}

/// Returns a fixed key regardless of vault and secret (for testing)
pub struct ConstantKeyResolver {
    key: Zeroizing<Vec<u8>>,
}

impl ConstantKeyResolver {
    pub fn new(key: Vec<u8>) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }
}

impl KeyResolver for ConstantKeyResolver {
    fn resolve_key(&mut self, _vault: &str, _secret: &str) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.key).clone()))
    }
}

/// Reads the secret text from any io::Read source, ignoring the record's
/// vault and secret names.
///
/// A single trailing `\n` (or `\r\n`) is stripped so `echo KEY | nbcrypt`
/// behaves as expected.
pub struct ReaderKeyResolver {
    reader: Box<dyn Read>,
    encoding: KeyEncoding,
}

impl ReaderKeyResolver {
    pub fn new(reader: Box<dyn Read>, encoding: KeyEncoding) -> Self {
        Self { reader, encoding }
    }
}

impl KeyResolver for ReaderKeyResolver {
    fn resolve_key(&mut self, _vault: &str, _secret: &str) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::KeyResolutionFailed,
                "error reading key material",
                e,
            )
        })?;

        let mut end = data.len();
        if data[..end].ends_with(b"\n") {
            end -= 1;
            if data[..end].ends_with(b"\r") {
                end -= 1;
            }
        }

        let text = std::str::from_utf8(&data[..end]).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::KeyResolutionFailed,
                "key material is not valid UTF-8",
                e,
            )
        })?;

        self.encoding.decode(text)
    }
}
