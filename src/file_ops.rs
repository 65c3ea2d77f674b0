//! In-place transition of `.nb` files
//!
//! A record file is read, transitioned in memory and only then replaced, via
//! a tempfile in the same directory that is fsynced and renamed over the
//! original. A failure at any step leaves the original file untouched.

use crate::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use crate::key_source::KeyResolver;
use crate::record::Record;
use crate::transition::{self, DecryptPolicy, Direction};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionOptions {
    pub policy: DecryptPolicy,
    /// Compute the new record but do not write it back.
    pub dry_run: bool,
}

/// Result of a successful file transition.
#[derive(Debug)]
pub struct Outcome {
    pub direction: Direction,
    pub record: Record,
    /// The encoded record, exactly as written (or as it would have been written).
    pub encoded: Vec<u8>,
    pub written: bool,
}

/// Toggle the record stored at `path` between plaintext and ciphertext.
pub fn transition_file(
    path: &Path,
    resolver: &mut dyn KeyResolver,
    options: &TransitionOptions,
) -> Result<Outcome> {
    let contents = fs::read(path).map_err(|e| read_error(path, e))?;
    let record = Record::decode(&contents)
        .map_err(|e| e.with_context(format!("failed to parse {}", path.display())))?;

    let (record, direction) = transition::run(record, resolver, options.policy)?;
    let encoded = record.encode()?;

    if options.dry_run {
        info!(path = %path.display(), %direction, "dry run, record not written");
        return Ok(Outcome {
            direction,
            record,
            encoded,
            written: false,
        });
    }

    replace_file(path, &encoded)
        .map_err(|e| e.with_context(format!("failed to write to {}", path.display())))?;
    info!(path = %path.display(), %direction, "record updated");

    Ok(Outcome {
        direction,
        record,
        encoded,
        written: true,
    })
}

/// Atomically replace `path` with `contents` (tempfile + fsync + rename).
///
/// Either the old file or the new file exists afterwards, never a
/// partial one.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::Builder::new()
        .prefix(".nbcrypt-tmp")
        .tempfile_in(dir)
        .map_err(|e| io_error("failed to create tempfile", e))?;

    temp_file
        .write_all(contents)
        .map_err(|e| io_error("failed to write to tempfile", e))?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file
        .flush()
        .map_err(|e| io_error("failed to flush tempfile", e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| io_error("failed to sync file prior to rename", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp_file
            .as_file()
            .metadata()
            .map_err(|e| io_error("failed to get tempfile metadata", e))?
            .permissions();
        perms.set_mode(0o600);
        temp_file
            .as_file()
            .set_permissions(perms)
            .map_err(|e| io_error("failed to set tempfile permissions", e))?;
    }

    temp_file.persist(path).map_err(|e| {
        NbcryptError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn io_error(msg: &str, err: io::Error) -> NbcryptError {
    NbcryptError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

fn read_error(path: &Path, err: io::Error) -> NbcryptError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    NbcryptError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
