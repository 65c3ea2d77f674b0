//! The `.nb` record and its on-disk JSON form

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};

/// The persisted four-field record.
///
/// Exactly one of `data` (plaintext) and `encrypted_data` (base64 framed
/// ciphertext) is expected to carry content between runs. Field order here is
/// the order written to disk.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Record {
    #[serde(deserialize_with = "null_as_empty")]
    pub encrypted_data: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub key_vault_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub secret_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub data: String,
}

// `null` reads the same as an absent field.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Record {
    /// Parse a record from its JSON text.
    ///
    /// Unknown fields are ignored; field names match exactly, so `"Data"`
    /// is an unknown field. Missing and `null` fields default to empty
    /// strings. Anything other than a JSON object, or a field holding a
    /// non-string, non-null value, is a malformed record.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "record is not valid JSON",
                e,
            )
        })?;

        if !value.is_object() {
            return Err(NbcryptError::with_kind(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "record must be a JSON object",
            ));
        }

        Record::deserialize(value).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::MalformedRecord,
                "record has an invalid field",
                e,
            )
        })
    }

    /// Serialize the record as two-space indented JSON with a trailing newline.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = serde_json::to_vec_pretty(self).map_err(|e| {
            NbcryptError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "failed to serialize record",
                e,
            )
        })?;
        out.push(b'\n');
        Ok(out)
    }

    pub fn holds_plaintext(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn holds_ciphertext(&self) -> bool {
        !self.encrypted_data.is_empty()
    }
}

// Plaintext stays out of logs and panic messages.
impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("encrypted_data_len", &self.encrypted_data.len())
            .field("key_vault_name", &self.key_vault_name)
            .field("secret_name", &self.secret_name)
            .field("data_len", &self.data.len())
            .finish()
    }
}
