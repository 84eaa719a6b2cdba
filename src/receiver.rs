//! The single active consumer session: draws messages from the head entry, tracks an
//! in-transaction position across commits, and drives the engine's drop path.
//!
//! Grounded on `vector_buffers::variants::disk_v2::reader::Reader`: a sequential cursor over the
//! ready-entry catalog, with the crucial difference that this queue enforces *at most one*
//! receiver at the engine level: a second receiver silently supersedes the first, which is logged
//! and thereafter sees every call fail with a closed-session error. Tracked here via a generation
//! counter rather than `vector_buffers`'s single-owner-by-construction model.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use snafu::ResultExt;

use crate::{
    engine::FilesQueue,
    entry::QueueEntry,
    error::{ReceiverEngineSnafu, ReceiverError},
    io::{PositionedReader, SharedPositionedReader},
};

/// One entry currently open for reading within the live receive transaction.
struct OpenEntry {
    entry: QueueEntry,
    source: Box<dyn crate::codec::MessageSource>,
    reader: SharedPositionedReader,
}

struct ReceiverState {
    current: Option<OpenEntry>,
    /// Entries fully drained within the current, uncommitted receive transaction: handed to
    /// [`FilesQueue::drop_entries`] verbatim on commit.
    consumed_in_tx: Vec<String>,
    /// Every entry name touched (consumed or partially read) since the last commit/rollback,
    /// used to clear `busy` flags on rollback.
    touched_in_tx: Vec<String>,
    messages_in_tx: u64,
    closed: bool,
}

/// The single active receiver session, obtained from
/// [`FilesQueue::new_receiver`](crate::engine::FilesQueue).
///
/// `receive`/`commit`/`rollback`/`purge`/`close` are serialized through `state`'s mutex, which
/// guarantees there is at most one concurrent caller per session. This is distinct from
/// at-most-one-receiver, which is enforced at the engine level via
/// `generation`: a superseded receiver's calls return `ClosedSession` rather than silently racing
/// the new one.
pub struct Receiver {
    queue: Arc<FilesQueue>,
    generation: u64,
    state: Mutex<ReceiverState>,
}

impl Receiver {
    pub(crate) fn new(queue: Arc<FilesQueue>) -> Self {
        let generation = queue.register_receiver();
        Self {
            queue,
            generation,
            state: Mutex::new(ReceiverState {
                current: None,
                consumed_in_tx: Vec::new(),
                touched_in_tx: Vec::new(),
                messages_in_tx: 0,
                closed: false,
            }),
        }
    }

    fn ensure_active(&self, state: &ReceiverState) -> Result<(), ReceiverError> {
        if state.closed || !self.queue.is_current_receiver(self.generation) {
            return Err(ReceiverError::ClosedSession);
        }
        Ok(())
    }

    /// Returns up to `limit` messages, blocking up to `timeout` for the first message only;
    /// subsequent messages in the same call are returned only if already available without
    /// waiting.
    ///
    /// `timeout` of `None` waits indefinitely; `Some(Duration::ZERO)` checks once without
    /// blocking. Returns an empty batch on timeout with no messages available.
    pub fn receive(&self, limit: usize, timeout: Option<Duration>) -> Result<Vec<Vec<u8>>, ReceiverError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;

        let mut messages = Vec::new();
        let deadline = timeout.map(|d| Instant::now() + d);

        while messages.len() < limit {
            if state.current.is_none() {
                let previous = state.touched_in_tx.last().cloned();
                let remaining_timeout = if messages.is_empty() {
                    match deadline {
                        None => None,
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                Some(Duration::ZERO)
                            } else {
                                Some(deadline - now)
                            }
                        }
                    }
                } else {
                    // Only the first message blocks; subsequent ones are best-effort.
                    Some(Duration::ZERO)
                };

                let entry = self
                    .queue
                    .wait_for_entry(previous.as_deref(), remaining_timeout);

                let Some(entry) = entry else {
                    break;
                };

                self.open_entry(&mut state, entry)?;
            }

            let open = state.current.as_mut().expect("just opened above");
            match open.source.read_message() {
                Ok(Some(message)) => {
                    state.messages_in_tx += 1;
                    messages.push(message);
                }
                Ok(None) | Err(_) => {
                    // End-of-entry (clean EOF or a framing error, treated identically). The entry
                    // is no longer the one the receiver is actively reading, so its `busy` flag
                    // clears now rather than at commit time -- only the entry currently held open
                    // may be busy, not every entry drained so far this transaction.
                    let name = open.entry.name().to_string();
                    state.consumed_in_tx.push(name.clone());
                    state.current = None;
                    self.queue.clear_busy(&[name]);
                }
            }
        }

        Ok(messages)
    }

    fn open_entry(&self, state: &mut ReceiverState, entry: QueueEntry) -> Result<(), ReceiverError> {
        let path = self.queue.data_path(entry.name());
        let positioned = PositionedReader::open(&path, self.queue.compressed(), entry.next_read_position())
            .map_err(|source| ReceiverError::Io { path, source })?;
        let reader = SharedPositionedReader::new(positioned);
        let source = self.queue.codec().new_input(Box::new(reader.clone()));
        state.touched_in_tx.push(entry.name().to_string());
        state.current = Some(OpenEntry { entry, source, reader });
        Ok(())
    }

    /// For each entry fully consumed within this transaction, hands it to the engine's drop path;
    /// for the partially-consumed current entry (if any), passes its current byte offset so the
    /// engine persists a `next` file.
    pub fn commit(&self) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;

        let consumed = std::mem::take(&mut state.consumed_in_tx);
        let partial = state
            .current
            .as_ref()
            .map(|open| (open.entry.name().to_string(), open.reader.position()));
        let messages = state.messages_in_tx;

        self.queue
            .drop_entries(
                &consumed,
                partial.as_ref().map(|(name, offset)| (name.as_str(), *offset)),
                messages,
            )
            .context(ReceiverEngineSnafu)?;

        state.touched_in_tx.clear();
        state.messages_in_tx = 0;
        if let Some(open) = state.current.take() {
            // The just-committed partial entry resumes, unread, on the next `receive`; it is no
            // longer "current" because this transaction is over.
            drop(open);
        }
        Ok(())
    }

    /// Clears receive-transaction state; every entry touched this transaction becomes `busy =
    /// false` again. No data is destroyed: the next `receive` replays from stored positions.
    pub fn rollback(&self) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;
        self.rollback_locked(&mut state);
        Ok(())
    }

    fn rollback_locked(&self, state: &mut ReceiverState) {
        let mut touched = std::mem::take(&mut state.touched_in_tx);
        if let Some(open) = state.current.take() {
            touched.push(open.entry.name().to_string());
        }
        touched.sort();
        touched.dedup();
        self.queue.clear_busy(&touched);
        state.consumed_in_tx.clear();
        state.messages_in_tx = 0;
    }

    /// Rolls back, then deletes every ready (non-busy) entry. Returns the message count prior to
    /// the purge.
    pub fn purge(&self) -> Result<u64, ReceiverError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;
        self.rollback_locked(&mut state);
        Ok(self.queue.purge())
    }

    /// Rolls back any in-flight transaction, then releases this session's single-consumer slot so
    /// a subsequent `new_receiver` call is not logged as replacing an active session.
    pub fn close(&self) -> Result<(), ReceiverError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        if state.closed {
            return Ok(());
        }
        self.rollback_locked(&mut state);
        state.closed = true;
        drop(state);
        self.queue.release_receiver(self.generation);
        Ok(())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::LengthDelimitedCodec,
        config::FileQueueConfig,
        sender::Sender,
    };
    use tempfile::tempdir;

    fn open_queue(root: &std::path::Path, name: &str) -> Arc<FilesQueue> {
        let config = FileQueueConfig::builder(name, root).build().unwrap();
        FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap()
    }

    #[test]
    fn receive_then_commit_drains_entry() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);
        sender.send(&[b"m1", b"m2", b"m3"], true).unwrap();

        let receiver = Receiver::new(queue.clone());
        let messages = receiver.receive(10, Some(Duration::from_millis(500))).unwrap();
        assert_eq!(messages, vec![b"m1".to_vec(), b"m2".to_vec(), b"m3".to_vec()]);

        receiver.commit().unwrap();
        assert_eq!(queue.info().message_count, 0);
        assert_eq!(queue.info().file_count, 0);
    }

    #[test]
    fn partial_receive_then_commit_persists_resume_point() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);
        sender.send(&[b"p", b"q", b"r", b"s"], true).unwrap();

        let receiver = Receiver::new(queue.clone());
        let first = receiver.receive(2, Some(Duration::ZERO)).unwrap();
        assert_eq!(first, vec![b"p".to_vec(), b"q".to_vec()]);
        receiver.commit().unwrap();
        drop(receiver);

        let receiver = Receiver::new(queue.clone());
        let rest = receiver.receive(10, Some(Duration::ZERO)).unwrap();
        assert_eq!(rest, vec![b"r".to_vec(), b"s".to_vec()]);
    }

    #[test]
    fn rollback_replays_same_messages() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);
        sender.send(&[b"a", b"b"], true).unwrap();

        let receiver = Receiver::new(queue.clone());
        let before = receiver.receive(10, Some(Duration::ZERO)).unwrap();
        receiver.rollback().unwrap();
        let after = receiver.receive(10, Some(Duration::ZERO)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn timeout_returns_empty_batch_with_no_data() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let receiver = Receiver::new(queue);
        let messages = receiver.receive(10, Some(Duration::from_millis(20))).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn second_receiver_replaces_first() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");

        let first = Receiver::new(queue.clone());
        let second = Receiver::new(queue.clone());

        let err = first.receive(1, Some(Duration::ZERO)).unwrap_err();
        assert!(matches!(err, ReceiverError::ClosedSession));

        let _ = second.receive(1, Some(Duration::ZERO)).unwrap();
    }

    #[test]
    fn purge_drops_unconsumed_entries() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let sender = Sender::new(queue.clone(), Default::default(), None);
        sender.send(&[b"a", b"b"], true).unwrap();

        let receiver = Receiver::new(queue.clone());
        let previous = receiver.purge().unwrap();
        assert_eq!(previous, 2);
        assert_eq!(queue.info().message_count, 0);
    }
}
