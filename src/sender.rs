//! The per-session transactional writer: one open `trans` file at a time, promoted or merged
//! into the catalog on commit.
//!
//! Grounded on `vector_buffers::variants::disk_v2::writer::Writer`: a single mutable write
//! cursor guarded by its own mutex, distinct from the engine's catalog mutex, so that one
//! sender's in-progress write never blocks another sender except for the brief, mutex-protected
//! catalog update at commit time.

use std::sync::{Arc, Mutex, Weak};

use snafu::ResultExt;

use crate::{
    engine::FilesQueue,
    error::{SenderEngineSnafu, SenderError},
    io::PositionedWriter,
    scheduler::{register_auto_commit_timeout, IdleTracker},
};

/// Uncommitted write state for one open transaction buffer.
struct OpenTransaction {
    name: String,
    sink: Box<dyn crate::codec::MessageSink>,
    message_count: u64,
    timeout_handle: Option<Box<dyn crate::scheduler::TimeoutHandle>>,
}

struct SenderState {
    open: Option<OpenTransaction>,
    closed: bool,
    idle: IdleTracker,
}

/// A sender session: one per producer, obtained from [`FilesQueue::new_sender`](crate::engine::FilesQueue).
///
/// `send`/`commit`/`rollback`/`close` are serialized through `state`'s mutex, independent of the
/// engine's queue mutex, which is only touched for the brief `release_entry`/`discard_trans`
/// calls.
pub struct Sender {
    queue: Arc<FilesQueue>,
    state: Mutex<SenderState>,
    auto_commit: crate::config::AutoCommitConfig,
    scheduler: Option<Arc<dyn crate::scheduler::TimeoutScheduler>>,
    self_weak: Weak<Sender>,
}

impl Sender {
    /// Builds a new sender session behind an `Arc`, so a registered
    /// [`crate::scheduler::TimeoutScheduler`] tick can call back into [`Self::on_timeout_tick`]
    /// through a [`Weak`] handle without creating a reference cycle with the scheduler thread.
    pub(crate) fn new(
        queue: Arc<FilesQueue>,
        auto_commit: crate::config::AutoCommitConfig,
        scheduler: Option<Arc<dyn crate::scheduler::TimeoutScheduler>>,
    ) -> Arc<Self> {
        queue.register_sender();
        Arc::new_cyclic(|weak| Self {
            queue,
            state: Mutex::new(SenderState {
                open: None,
                closed: false,
                idle: IdleTracker::default(),
            }),
            auto_commit,
            scheduler,
            self_weak: weak.clone(),
        })
    }

    /// Appends `messages` to the session's open transaction buffer (opening one on first use),
    /// then commits if `commit` is `true` or the auto-commit threshold is reached.
    pub fn send(&self, messages: &[&[u8]], commit: bool) -> Result<(), SenderError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(SenderError::ClosedSession);
        }

        if state.open.is_none() {
            let name = self.queue.allocate_trans_name();
            let path = self.queue.trans_path(&name);
            let writer = PositionedWriter::create(&path, self.queue.compressed())
                .map_err(|source| SenderError::Io { path: path.clone(), source })?;
            let sink = self.queue.codec().new_output(Box::new(writer));

            let weak = self.self_weak.clone();
            let timeout_handle = register_auto_commit_timeout(&self.scheduler, &self.auto_commit, move || {
                if let Some(sender) = weak.upgrade() {
                    sender.on_timeout_tick();
                }
            });

            state.open = Some(OpenTransaction {
                name,
                sink,
                message_count: 0,
                timeout_handle,
            });
        }

        {
            let open = state.open.as_mut().expect("just established above");
            for message in messages {
                open.sink.write_message(message).map_err(|source| SenderError::Io {
                    path: self.queue.trans_path(&open.name),
                    source,
                })?;
                open.message_count += 1;
            }
            open.sink.flush().map_err(|source| SenderError::Io {
                path: self.queue.trans_path(&open.name),
                source,
            })?;
            state.idle.mark_active();
        }

        let should_commit = commit
            || (self.auto_commit.threshold > 0
                && state.open.as_ref().unwrap().message_count >= self.auto_commit.threshold);

        if should_commit {
            self.commit_locked(&mut state)?;
        }

        Ok(())
    }

    /// Closes the open transaction and hands it to the engine's send-commit path
    /// (`releaseEntry`), merging into the tail entry or promoting to a fresh one.
    pub fn commit(&self) -> Result<(), SenderError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(SenderError::ClosedSession);
        }
        self.commit_locked(&mut state)
    }

    fn commit_locked(&self, state: &mut SenderState) -> Result<(), SenderError> {
        let Some(open) = state.open.take() else {
            return Ok(());
        };
        drop(open.timeout_handle);

        let path = self.queue.trans_path(&open.name);
        // Must finish (not just flush) before the engine touches the trans file: for a
        // compressed sink this is the only point the gzip trailer is written, and
        // release_entry may rename or append this file into the tail entry immediately after.
        open.sink.finish().map_err(|source| SenderError::Io {
            path: path.clone(),
            source,
        })?;
        let byte_size = crate::io::logical_size(&path, self.queue.compressed()).map_err(|source| SenderError::Io {
            path: path.clone(),
            source,
        })?;

        self.queue
            .release_entry(&open.name, open.message_count, byte_size)
            .context(SenderEngineSnafu)?;
        Ok(())
    }

    /// Discards the session's open transaction buffer without making its messages visible.
    pub fn rollback(&self) -> Result<(), SenderError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(SenderError::ClosedSession);
        }
        self.rollback_locked(&mut state)
    }

    fn rollback_locked(&self, state: &mut SenderState) -> Result<(), SenderError> {
        let Some(open) = state.open.take() else {
            return Ok(());
        };
        drop(open.timeout_handle);
        self.queue.discard_trans(&open.name).context(SenderEngineSnafu)?;
        Ok(())
    }

    /// Commits if auto-commit is enabled, otherwise rolls back; then unregisters from the engine.
    /// Idempotent: a second `close()` is a no-op.
    pub fn close(&self) -> Result<(), SenderError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Ok(());
        }

        let result = if self.auto_commit.enabled {
            self.commit_locked(&mut state)
        } else {
            self.rollback_locked(&mut state)
        };
        state.closed = true;
        drop(state);
        self.queue.unregister_sender();
        result
    }

    /// Called by a registered [`crate::scheduler::TimeoutScheduler`] tick: commits if the session
    /// has been idle since the previous tick, otherwise just marks it idle for the next one.
    pub(crate) fn on_timeout_tick(&self) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed || state.open.is_none() {
            return;
        }
        if state.idle.on_tick() {
            let _ = self.commit_locked(&mut state);
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::LengthDelimitedCodec, config::FileQueueConfig};
    use tempfile::tempdir;

    fn open_queue(root: &std::path::Path, name: &str) -> Arc<FilesQueue> {
        let config = FileQueueConfig::builder(name, root).build().unwrap();
        FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap()
    }

    #[test]
    fn send_then_commit_makes_messages_visible() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);

        sender.send(&[b"a", b"b"], false).unwrap();
        assert_eq!(queue.info().message_count, 0, "uncommitted sends are invisible");
        sender.commit().unwrap();
        assert_eq!(queue.info().message_count, 2);
    }

    #[test]
    fn rollback_discards_uncommitted_transaction() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);

        sender.send(&[b"x"], false).unwrap();
        sender.rollback().unwrap();
        assert_eq!(queue.info().message_count, 0);
        assert_eq!(queue.info().file_count, 0);
    }

    #[test]
    fn threshold_autocommits_inline() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let auto_commit = crate::config::AutoCommitConfig {
            enabled: true,
            threshold: 2,
            timeout: None,
        };
        let sender = Sender::new(queue.clone(), auto_commit, None);

        sender.send(&[b"a"], false).unwrap();
        assert_eq!(queue.info().message_count, 0);
        sender.send(&[b"b"], false).unwrap();
        assert_eq!(queue.info().message_count, 2, "threshold should have triggered an inline commit");
    }

    #[test]
    fn close_without_autocommit_rolls_back_pending_writes() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);

        sender.send(&[b"a"], false).unwrap();
        sender.close().unwrap();
        assert_eq!(queue.info().message_count, 0);
    }

    #[test]
    fn close_with_autocommit_commits_pending_writes() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let auto_commit = crate::config::AutoCommitConfig {
            enabled: true,
            ..Default::default()
        };
        let sender = Sender::new(queue.clone(), auto_commit, None);

        sender.send(&[b"a"], false).unwrap();
        sender.close().unwrap();
        assert_eq!(queue.info().message_count, 1);
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue, Default::default(), None);

        sender.close().unwrap();
        let err = sender.send(&[b"a"], true).unwrap_err();
        assert!(matches!(err, SenderError::ClosedSession));
    }
}
