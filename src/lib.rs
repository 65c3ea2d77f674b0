//! nbcrypt - envelope encryption for `.nb` record files
//!
//! A record holds either plaintext (`data`) or AES-GCM ciphertext
//! (`encrypted_data`) together with the Key Vault coordinates of its key.
//! Each run resolves the key and flips the record to the other form.

#![forbid(unsafe_code)]

pub mod aead;
pub mod armor;
pub mod azure;
pub mod error;
pub mod file_ops;
pub mod key_source;
pub mod record;
pub mod transition;
