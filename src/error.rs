use std::{io, path::PathBuf};

use snafu::Snafu;

/// Errors that can occur while building a [`crate::config::FileQueueConfig`] or
/// [`crate::config::MemoryQueueConfig`].
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("parameter '{}' was invalid: {}", param_name, reason))]
    InvalidParameter {
        param_name: &'static str,
        reason: String,
    },
}

/// Errors surfaced while setting up or recovering a [`crate::engine::FilesQueue`].
///
/// Corrupt entries and transient filesystem failures are handled locally (quarantine, retry) and
/// never reach the caller as this type; only conditions the caller must react to do.
#[derive(Debug, Snafu)]
pub enum EngineError {
    #[snafu(display("invalid queue configuration: {}", source))]
    Configuration { source: ConfigError },

    #[snafu(display("failed to create storage directory {}: {}", path.display(), source))]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[snafu(display("directory lock for queue already held by another process"))]
    LockAlreadyHeld,

    #[snafu(display("failed to acquire directory lock at {}: {}", path.display(), source))]
    LockIo { path: PathBuf, source: io::Error },

    #[snafu(display(
        "filesystem operation on {} failed after exhausting retries: {}",
        path.display(),
        source
    ))]
    FilesystemRetriesExhausted { path: PathBuf, source: io::Error },

    #[snafu(display("fatal I/O error on {}: {}", path.display(), source))]
    #[snafu(context(name(EngineIoSnafu)))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("queue invariant violated: {}", reason))]
    InvariantViolation { reason: String },
}

/// Errors surfaced from a [`crate::sender::Sender`] session.
#[derive(Debug, Snafu)]
pub enum SenderError {
    #[snafu(display("sender session is closed"))]
    #[snafu(context(name(SenderClosedSnafu)))]
    ClosedSession,

    #[snafu(display("fatal I/O error writing transaction file {}: {}", path.display(), source))]
    #[snafu(context(name(SenderIoSnafu)))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("engine rejected transaction commit: {}", source))]
    #[snafu(context(name(SenderEngineSnafu)))]
    Engine { source: EngineError },
}

/// Errors surfaced from a [`crate::receiver::Receiver`] session.
#[derive(Debug, Snafu)]
pub enum ReceiverError {
    #[snafu(display("receiver session is closed"))]
    #[snafu(context(name(ReceiverClosedSnafu)))]
    ClosedSession,

    #[snafu(display("fatal I/O error reading entry {}: {}", path.display(), source))]
    #[snafu(context(name(ReceiverIoSnafu)))]
    Io { path: PathBuf, source: io::Error },

    #[snafu(display("engine rejected drop request: {}", source))]
    #[snafu(context(name(ReceiverEngineSnafu)))]
    Engine { source: EngineError },
}

/// Errors surfaced from [`crate::memory::MemoryQueue`] sessions.
#[derive(Debug, Snafu)]
pub enum MemoryQueueError {
    #[snafu(display("session is closed"))]
    #[snafu(context(name(MemoryClosedSnafu)))]
    ClosedSession,
}
