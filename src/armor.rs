//! Textual armoring for binary ciphertext
//!
//! Framed ciphertext is stored in the record's `encrypted_data` field as
//! standard-alphabet base64 with padding. The armored form:
//! - Contains no whitespace (including newlines)
//! - Survives JSON string escaping unchanged

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use base64::{Engine, engine::general_purpose::STANDARD};

/// Encode bytes as a single-line base64 string
pub fn encode_binary(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode a base64 string back to bytes
///
/// Leading and trailing ASCII whitespace is ignored so hand-edited records
/// still decode; whitespace inside the encoding is an error.
pub fn decode_binary(armored: &str) -> Result<Vec<u8>> {
    STANDARD.decode(armored.trim_ascii()).map_err(|e| {
        NbcryptError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedInput,
            "base64 decoding failed",
            e,
        )
    })
}
