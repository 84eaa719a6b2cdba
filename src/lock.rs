//! Advisory, single-process exclusion on the storage directory.

use std::{
    fs,
    io::{self, Read, Write},
    path::PathBuf,
};

use fslock::LockFile;

/// Holds the advisory lock on a queue's storage directory for the lifetime of the engine.
///
/// On release (normal `Drop`), the current message count is persisted into the lock file as a
/// decimal string, so a clean tear-down always leaves an accurate count at shutdown. A dirty
/// shutdown (process killed) simply never reaches `Drop`, leaving whatever was last persisted (or
/// nothing, for a fresh queue) -- recovery treats a mismatch between this value and the recovered
/// count as a warning, not a failure.
pub struct DirectoryLock {
    path: PathBuf,
    // `LockFile`'s own `Drop` releases the OS-level advisory lock; we only ever need to persist
    // the message count into its backing file before that happens.
    #[allow(dead_code)]
    file: LockFile,
}

impl DirectoryLock {
    /// Attempts to acquire the advisory lock at `path`, failing if another live process already
    /// holds it.
    pub fn acquire(path: PathBuf) -> io::Result<Self> {
        let mut file = LockFile::open(&path)?;
        if !file.try_lock()? {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "directory lock already held by another process",
            ));
        }

        Ok(Self { path, file })
    }

    /// Reads the message count persisted by the previous clean shutdown, if any.
    ///
    /// Returns `None` if the lock file is empty (fresh queue) or does not contain a valid
    /// decimal number (treated the same as "unknown", never a hard failure).
    pub fn previous_message_count(&self) -> Option<u64> {
        let mut contents = String::new();
        fs::File::open(&self.path)
            .ok()?
            .read_to_string(&mut contents)
            .ok()?;
        contents.trim().parse().ok()
    }

    /// Persists `message_count` into the lock file. Safe to call repeatedly; the last call
    /// before the queue shuts down is what a clean-shutdown recount depends on.
    pub fn persist(&mut self, message_count: u64) -> io::Result<()> {
        let mut file = fs::File::create(&self.path)?;
        write!(file, "{message_count}")?;
        file.sync_all()
    }
}
