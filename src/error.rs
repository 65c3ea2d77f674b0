use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// Use of Internal is never a guarantee the error is not caused by the
    /// user, merely that the code cannot tell.
    Internal,

    /// The user provided invalid input (a broken record, a wrong key, a
    /// missing file) or asked for something impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Reading or writing the record file (or stdin/stdout) failed.
    Io,
    /// The record is not a JSON object with the expected string fields.
    MalformedRecord,
    /// Invalid base64, undersized ciphertext framing, or a decrypted payload
    /// that cannot be stored as record text.
    MalformedInput,
    /// The resolved key does not have a length AES accepts (16, 24 or 32 bytes).
    InvalidKey,
    /// The GCM tag did not verify: wrong key, tampering or corruption.
    AuthenticationFailed,
    /// The key resolver could not produce key material.
    KeyResolutionFailed,
    /// The decrypt path was selected but the record carries no ciphertext.
    NothingToDecrypt,
    /// Unexpected state reached within nbcrypt logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct NbcryptError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl NbcryptError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    ///
    /// Category and kind are carried over so callers can still branch on the
    /// innermost condition after several layers of context.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Renders the message followed by every source in the chain, joined by `": "`.
    pub fn chain_message(&self) -> String {
        let mut out = self.msg.clone();
        let mut current = StdError::source(self);
        while let Some(err) = current {
            out.push_str(": ");
            out.push_str(&err.to_string());
            current = err.source();
        }
        out
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, NbcryptError>;
