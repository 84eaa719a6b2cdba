//! Retry wrapper for filesystem rename/delete operations.
//!
//! Transient failures on networked filesystems (NFS staleness, momentary lock contention from a
//! concurrent antivirus/backup scan, etc) are tolerated with a small retry loop; exhausting
//! retries surfaces as a failure rather than panicking.

use std::{io, path::Path, thread, time::Duration};

use crate::config::RetryPolicy;

pub(crate) fn with_retry<T>(
    policy: &RetryPolicy,
    path: &Path,
    mut op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.retries => {
                tracing::warn!(
                    path = %path.display(),
                    attempt,
                    error = %err,
                    "filesystem operation failed, retrying",
                );
                attempt += 1;
                thread::sleep(policy.delay);
            }
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn rename(policy: &RetryPolicy, from: &Path, to: &Path) -> io::Result<()> {
    with_retry(policy, from, || std::fs::rename(from, to))
}

pub(crate) fn remove_file(policy: &RetryPolicy, path: &Path) -> io::Result<()> {
    with_retry(policy, path, || std::fs::remove_file(path))
}
