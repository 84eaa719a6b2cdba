//! `FilesQueue`: the durable engine. Recovery, the entry catalog, the merge/promote commit path,
//! the drop-on-receive-commit path, and the blocking wait/notify that ties senders to receivers.
//!
//! Grounded on `vector_buffers::variants::disk_v2::{Ledger, Writer, Reader}`: the split between a
//! recovery-time scan, an ordered catalog of ready entries, and a mutex-guarded set of counters
//! mutated atomically with the catalog. Unlike `vector_buffers`, which serializes access through
//! `tokio::sync::Mutex` and wakes waiters with `tokio::sync::Notify`, every wait here blocks a
//! native thread on a `parking_lot::Condvar` held under the same mutex as the catalog, since
//! nothing here cooperates with an async event loop.

use std::{
    collections::HashMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime},
};

use parking_lot::{Condvar, Mutex};
use snafu::ResultExt;

use crate::{
    codec::MessageCodec,
    config::FileQueueConfig,
    entry::{Catalog, QueueEntry},
    error::{CreateDirectorySnafu, EngineError, EngineIoSnafu},
    io::{logical_size, PositionedReader},
    kind::{EntryKind, PathNamer},
    lock::DirectoryLock,
    naming::{FileNamer, SystemClock},
    receiver::Receiver,
    retry,
    scheduler::TimeoutScheduler,
    sender::Sender,
    stats::{Counters, QueueInfo},
};

struct Inner {
    catalog: Catalog,
    counters: Counters,
    file_namer: FileNamer<SystemClock>,
    busy_entry: Option<String>,
    lock: Option<DirectoryLock>,
}

/// The durable, file-backed queue engine.
///
/// Shared between sender and receiver sessions behind an `Arc`; every public operation takes
/// `&self` and internally serializes through the queue mutex, which guards the entry catalog,
/// `QueueInfo` counters, and the `busy` flag of entries.
pub struct FilesQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
    config: FileQueueConfig,
    path_namer: PathNamer,
    codec: Arc<dyn MessageCodec>,
    scheduler: Option<Arc<dyn TimeoutScheduler>>,
    receiver_generation: AtomicU64,
    current_receiver_generation: AtomicU64,
}

impl FilesQueue {
    /// Creates the storage directory if absent, acquires the advisory lock, and runs recovery.
    /// Equivalent to [`Self::open_with_scheduler`] with no auto-commit timeout scheduler; senders
    /// obtained from [`Self::new_sender`] still honor `autocommit.threshold`, just not
    /// `autocommit.timeout`.
    pub fn open(config: FileQueueConfig, codec: Arc<dyn MessageCodec>) -> Result<Arc<Self>, EngineError> {
        Self::open_with_scheduler(config, codec, None)
    }

    /// Like [`Self::open`], additionally wiring `scheduler` into every [`Sender`] this queue hands
    /// out via [`Self::new_sender`], so `autocommit.timeout` can fire without the caller polling.
    pub fn open_with_scheduler(
        config: FileQueueConfig,
        codec: Arc<dyn MessageCodec>,
        scheduler: Option<Arc<dyn TimeoutScheduler>>,
    ) -> Result<Arc<Self>, EngineError> {
        let storage_dir = config.storage_dir();
        fs::create_dir_all(&storage_dir).context(CreateDirectorySnafu {
            path: storage_dir.clone(),
        })?;

        let path_namer = config.path_namer();

        let lock = if config.lock_disabled {
            None
        } else {
            let lock_path = path_namer.lock_path();
            match DirectoryLock::acquire(lock_path.clone()) {
                Ok(lock) => Some(lock),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(EngineError::LockAlreadyHeld)
                }
                Err(err) => {
                    return Err(EngineError::LockIo {
                        path: lock_path,
                        source: err,
                    })
                }
            }
        };

        let (catalog, file_namer, counters) = recover(&config, &path_namer, &codec, lock.as_ref())?;

        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                catalog,
                counters,
                file_namer,
                busy_entry: None,
                lock,
            }),
            condvar: Condvar::new(),
            config,
            path_namer,
            codec,
            scheduler,
            receiver_generation: AtomicU64::new(0),
            current_receiver_generation: AtomicU64::new(0),
        }))
    }

    /// Opens a new sender session. Multiple senders may be open concurrently; each serializes its
    /// own send/commit/rollback calls independently of the others.
    pub fn new_sender(self: &Arc<Self>) -> Arc<Sender> {
        Sender::new(Arc::clone(self), self.config.auto_commit, self.scheduler.clone())
    }

    /// Opens a new receiver session. If another receiver is already active, it is superseded: its
    /// subsequent calls return `ClosedSession`.
    pub fn new_receiver(self: &Arc<Self>) -> Receiver {
        Receiver::new(Arc::clone(self))
    }

    pub fn config(&self) -> &FileQueueConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    pub(crate) fn compressed(&self) -> bool {
        self.path_namer.compressed()
    }

    pub(crate) fn trans_path(&self, name: &str) -> PathBuf {
        self.path_namer.path_for(name, EntryKind::Trans)
    }

    pub(crate) fn data_path(&self, name: &str) -> PathBuf {
        self.path_namer.path_for(name, EntryKind::Data)
    }

    /// Allocates a fresh monotonic name for a sender opening a new transaction buffer.
    ///
    /// This name only ever becomes the entry's final name if, at commit time, no merge is
    /// possible and no other commit has intervened; promotion allocates a *second*, later name so
    /// that FIFO-by-commit-order holds even when a sender opens a
    /// transaction long before it commits it.
    pub(crate) fn allocate_trans_name(&self) -> String {
        self.inner.lock().file_namer.next_name()
    }

    pub(crate) fn register_sender(&self) {
        self.inner.lock().counters.sender_count += 1;
    }

    pub(crate) fn unregister_sender(&self) {
        let mut inner = self.inner.lock();
        inner.counters.sender_count = inner.counters.sender_count.saturating_sub(1);
    }

    /// Registers a new receiver session, replacing any currently active one: the prior receiver is
    /// dropped and a warning logged, then the new one is installed.
    pub(crate) fn register_receiver(&self) -> u64 {
        let generation = self.receiver_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self
            .current_receiver_generation
            .swap(generation, Ordering::SeqCst);
        if previous != 0 {
            tracing::warn!(previous, generation, "replacing active receiver session");
        }
        self.inner.lock().counters.receiver_connect_time = Some(SystemTime::now());
        generation
    }

    pub(crate) fn is_current_receiver(&self, generation: u64) -> bool {
        self.current_receiver_generation.load(Ordering::SeqCst) == generation
    }

    pub(crate) fn release_receiver(&self, generation: u64) {
        let _ = self.current_receiver_generation.compare_exchange(
            generation,
            0,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Deletes a sender's abandoned transaction buffer (rollback, or close without auto-commit).
    pub(crate) fn discard_trans(&self, trans_name: &str) -> Result<(), EngineError> {
        let trans_path = self.path_namer.path_for(trans_name, EntryKind::Trans);
        retry::remove_file(&self.config.retry, &trans_path).map_err(|source| {
            EngineError::FilesystemRetriesExhausted {
                path: trans_path,
                source,
            }
        })
    }

    /// The send-commit path: merges or promotes a committed transaction into the catalog.
    pub(crate) fn release_entry(
        &self,
        trans_name: &str,
        message_count: u64,
        byte_size: u64,
    ) -> Result<(), EngineError> {
        let trans_path = self.path_namer.path_for(trans_name, EntryKind::Trans);
        let mut inner = self.inner.lock();

        let merge_target = inner.catalog.tail_name().and_then(|tail_name| {
            let tail = inner.catalog.get(tail_name)?;
            if !tail.busy() && self.config.merge.allows_merge(tail.message_count(), message_count) {
                Some(tail_name.to_string())
            } else {
                None
            }
        });

        if let Some(tail_name) = merge_target {
            let data_path = self.path_namer.path_for(&tail_name, EntryKind::Data);
            append_file(&trans_path, &data_path).map_err(|source| EngineError::Io {
                path: data_path.clone(),
                source,
            })?;
            retry::remove_file(&self.config.retry, &trans_path).map_err(|source| {
                EngineError::FilesystemRetriesExhausted {
                    path: trans_path.clone(),
                    source,
                }
            })?;

            let tail = inner
                .catalog
                .get_mut(&tail_name)
                .ok_or_else(|| EngineError::InvariantViolation {
                    reason: "tail entry vanished during merge".to_string(),
                })?;
            tail.add_message_count(message_count);
            tail.add_file_size(byte_size);
            inner.counters.files_total_size += byte_size;
            tracing::debug!(tail_name = %tail_name, message_count, "merged transaction into tail entry");
        } else {
            let fresh_name = inner.file_namer.next_name();
            let data_path = self.path_namer.path_for(&fresh_name, EntryKind::Data);
            retry::rename(&self.config.retry, &trans_path, &data_path).map_err(|source| {
                EngineError::FilesystemRetriesExhausted {
                    path: trans_path.clone(),
                    source,
                }
            })?;
            inner
                .catalog
                .insert(QueueEntry::new(fresh_name.clone(), message_count, byte_size));
            inner.counters.file_count += 1;
            inner.counters.files_total_size += byte_size;
            tracing::debug!(name = %fresh_name, message_count, "promoted transaction to new entry");
        }

        inner.counters.message_count += message_count;
        inner.counters.last_sender_commit = Some(SystemTime::now());
        drop(inner);
        self.condvar.notify_all();
        Ok(())
    }

    /// The receive-commit path: drops fully-consumed entries and persists a partial entry's offset.
    pub(crate) fn drop_entries(
        &self,
        consumed: &[String],
        partial: Option<(&str, u64)>,
        messages: u64,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();

        for name in consumed {
            if let Some(entry) = inner.catalog.remove(name) {
                let data_path = self.path_namer.path_for(name, EntryKind::Data);
                if self.config.backup {
                    let backup_path = self.path_namer.path_for(name, EntryKind::Backup);
                    let _ = retry::remove_file(&self.config.retry, &backup_path);
                    retry::rename(&self.config.retry, &data_path, &backup_path).map_err(|source| {
                        EngineError::FilesystemRetriesExhausted {
                            path: data_path.clone(),
                            source,
                        }
                    })?;
                } else {
                    retry::remove_file(&self.config.retry, &data_path).map_err(|source| {
                        EngineError::FilesystemRetriesExhausted {
                            path: data_path.clone(),
                            source,
                        }
                    })?;
                }

                if entry.next_read_position() > 0 {
                    let next_path = self.path_namer.path_for(name, EntryKind::Next);
                    let _ = retry::remove_file(&self.config.retry, &next_path);
                }

                inner.counters.file_count = inner.counters.file_count.saturating_sub(1);
                inner.counters.files_total_size =
                    inner.counters.files_total_size.saturating_sub(entry.file_size());
            }

            if inner.busy_entry.as_deref() == Some(name.as_str()) {
                inner.busy_entry = None;
            }
        }

        if let Some((name, offset)) = partial {
            let next_path = self.path_namer.path_for(name, EntryKind::Next);
            write_next_offset(&next_path, offset).map_err(|source| EngineError::Io {
                path: next_path.clone(),
                source,
            })?;

            if let Some(entry) = inner.catalog.get_mut(name) {
                entry.set_next_read_position(offset);
                entry.set_busy(false);
            }
            if inner.busy_entry.as_deref() == Some(name) {
                inner.busy_entry = None;
            }
        }

        inner.counters.message_count = inner.counters.message_count.saturating_sub(messages);
        inner.counters.last_receiver_commit = Some(SystemTime::now());
        Ok(())
    }

    /// Clears the busy flag on entries a receiver held without committing (rollback).
    pub(crate) fn clear_busy(&self, names: &[String]) {
        let mut inner = self.inner.lock();
        for name in names {
            if let Some(entry) = inner.catalog.get_mut(name) {
                entry.set_busy(false);
            }
        }
        inner.busy_entry = None;
    }

    /// Returns the least ready entry strictly after `previous`, marking it busy, without
    /// blocking.
    pub(crate) fn next_ready_entry(&self, previous: Option<&str>) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();
        take_next(&mut inner, previous)
    }

    /// As [`next_ready_entry`](Self::next_ready_entry), but blocks on the queue condition variable
    /// until an entry becomes ready or `timeout` elapses. `timeout` of `None` waits indefinitely;
    /// `Some(Duration::ZERO)` checks once and returns immediately.
    pub(crate) fn wait_for_entry(&self, previous: Option<&str>, timeout: Option<Duration>) -> Option<QueueEntry> {
        let mut inner = self.inner.lock();
        let deadline = timeout.map(|d| Instant::now() + d);

        loop {
            if let Some(entry) = take_next(&mut inner, previous) {
                return Some(entry);
            }

            match deadline {
                None => self.condvar.wait(&mut inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.condvar.wait_for(&mut inner, deadline - now);
                }
            }
        }
    }

    /// Deletes every ready, non-busy entry and resets the observable counters, per
    /// "Purge". Returns the message count prior to the purge.
    pub fn purge(&self) -> u64 {
        let mut inner = self.inner.lock();
        let previous = inner.counters.message_count;

        let names: Vec<String> = inner
            .catalog
            .iter()
            .filter(|entry| !entry.busy())
            .map(|entry| entry.name().to_string())
            .collect();

        for name in names {
            if let Some(entry) = inner.catalog.remove(&name) {
                let data_path = self.path_namer.path_for(&name, EntryKind::Data);
                if let Err(err) = retry::remove_file(&self.config.retry, &data_path) {
                    tracing::warn!(path = %data_path.display(), error = %err, "failed to delete entry during purge");
                }
                if entry.next_read_position() > 0 {
                    let next_path = self.path_namer.path_for(&name, EntryKind::Next);
                    let _ = retry::remove_file(&self.config.retry, &next_path);
                }
            }
        }

        inner.counters.message_count = 0;
        inner.counters.files_total_size = 0;
        inner.counters.file_count = inner.catalog.len() as u64;
        previous
    }

    /// An immutable snapshot of the queue's observable statistics.
    pub fn info(&self) -> QueueInfo {
        self.inner.lock().counters.snapshot()
    }
}

impl Drop for FilesQueue {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        let count = inner.counters.message_count;
        if let Some(lock) = inner.lock.as_mut() {
            if let Err(err) = lock.persist(count) {
                tracing::warn!(error = %err, "failed to persist message count on teardown");
            }
        }
    }
}

fn take_next(inner: &mut Inner, previous: Option<&str>) -> Option<QueueEntry> {
    let name = inner.catalog.next_after(previous)?.name().to_string();
    if let Some(entry) = inner.catalog.get_mut(&name) {
        entry.set_busy(true);
    }
    inner.busy_entry = Some(name.clone());
    inner.catalog.get(&name).cloned()
}

fn append_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut src_file = fs::File::open(src)?;
    let mut dst_file = OpenOptions::new().append(true).open(dst)?;
    io::copy(&mut src_file, &mut dst_file)?;
    dst_file.flush()
}

fn write_next_offset(path: &Path, offset: u64) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, offset.to_string())?;
    fs::rename(&tmp_path, path)
}

/// Runs the six-step recovery protocol. Idempotent: re-running it
/// against the same directory with no intervening writes reproduces the same catalog and
/// counters.
fn recover(
    config: &FileQueueConfig,
    path_namer: &PathNamer,
    codec: &Arc<dyn MessageCodec>,
    lock: Option<&DirectoryLock>,
) -> Result<(Catalog, FileNamer<SystemClock>, Counters), EngineError> {
    let storage_dir = config.storage_dir();
    let mut catalog = Catalog::new();
    let mut file_namer = FileNamer::new();
    let mut counters = Counters::default();

    let mut trans_names = Vec::new();
    let mut next_offsets: HashMap<String, u64> = HashMap::new();

    // Step 1: scan `data` files.
    for dir_entry in fs::read_dir(&storage_dir).context(EngineIoSnafu {
        path: storage_dir.clone(),
    })? {
        let dir_entry = dir_entry.context(EngineIoSnafu {
            path: storage_dir.clone(),
        })?;
        let Some(file_name) = dir_entry.file_name().to_str().map(str::to_string) else {
            continue;
        };

        match path_namer.classify(&file_name) {
            Some((name, EntryKind::Data)) => {
                if FileNamer::<SystemClock>::is_valid_name(&name) {
                    catalog.insert(QueueEntry::new(name, 0, 0));
                } else {
                    tracing::warn!(name, "ignoring data file with malformed entry name");
                }
            }
            Some((name, EntryKind::Next)) => {
                let next_path = dir_entry.path();
                match fs::read_to_string(&next_path)
                    .ok()
                    .and_then(|contents| contents.trim().parse::<u64>().ok())
                {
                    Some(offset) => {
                        next_offsets.insert(name, offset);
                    }
                    None => tracing::warn!(name, "ignoring malformed next file"),
                }
            }
            Some((name, EntryKind::Trans)) => trans_names.push(name),
            _ => {}
        }
    }

    // Step 2: attach `next` offsets; delete orphans.
    for (name, offset) in next_offsets {
        if let Some(entry) = catalog.get_mut(&name) {
            entry.set_next_read_position(offset);
        } else {
            let next_path = path_namer.path_for(&name, EntryKind::Next);
            match retry::remove_file(&config.retry, &next_path) {
                Ok(()) => tracing::info!(path = %next_path.display(), "removed orphan next file"),
                Err(err) => tracing::warn!(path = %next_path.display(), error = %err, "failed to remove orphan next file"),
            }
        }
    }

    // Step 3: recover or discard `trans` files.
    for name in &trans_names {
        let trans_path = path_namer.path_for(name, EntryKind::Trans);
        if config.auto_commit.enabled {
            let data_path = path_namer.path_for(name, EntryKind::Data);
            match retry::rename(&config.retry, &trans_path, &data_path) {
                Ok(()) => {
                    tracing::info!(name, "recovered uncommitted transaction via autocommit");
                    catalog.insert(QueueEntry::new(name.clone(), 0, 0));
                }
                Err(err) => {
                    tracing::warn!(path = %trans_path.display(), error = %err, "failed to recover trans file")
                }
            }
        } else {
            match retry::remove_file(&config.retry, &trans_path) {
                Ok(()) => tracing::info!(name, "dropped uncommitted transaction"),
                Err(err) => {
                    tracing::warn!(path = %trans_path.display(), error = %err, "failed to drop trans file")
                }
            }
        }
    }

    // Step 4: the last entry name becomes the monotonic-name floor.
    let names: Vec<String> = catalog.names().map(str::to_string).collect();
    for name in &names {
        file_namer.set_floor_from_name(name);
    }

    // Step 5: count messages per entry; quarantine anything the codec can't walk.
    for name in names {
        let start_position = catalog.get(&name).map(QueueEntry::next_read_position).unwrap_or(0);
        let data_path = path_namer.path_for(&name, EntryKind::Data);

        let counted = count_and_size(&data_path, path_namer.compressed(), start_position, codec.as_ref());

        match counted {
            Ok((count, size)) => {
                if let Some(entry) = catalog.get_mut(&name) {
                    entry.set_message_count(count);
                    entry.set_file_size(size);
                }
            }
            Err(err) => {
                tracing::warn!(name, error = %err, "quarantining unreadable entry");
                catalog.remove(&name);
                let bad_path = path_namer.path_for(&name, EntryKind::Bad);
                let _ = retry::remove_file(&config.retry, &bad_path);
                if let Err(rename_err) = retry::rename(&config.retry, &data_path, &bad_path) {
                    tracing::warn!(path = %data_path.display(), error = %rename_err, "failed to quarantine bad entry");
                }
            }
        }
    }

    // Step 6: aggregate totals; compare against the last persisted count.
    counters.file_count = catalog.len() as u64;
    counters.files_total_size = catalog.iter().map(QueueEntry::file_size).sum();
    counters.message_count = catalog.iter().map(QueueEntry::message_count).sum();

    if let Some(lock) = lock {
        if let Some(previous) = lock.previous_message_count() {
            if previous != counters.message_count {
                tracing::warn!(
                    previous,
                    recovered = counters.message_count,
                    "recovered message count differs from count at last clean shutdown"
                );
            }
        }
    }

    Ok((catalog, file_namer, counters))
}

/// Counts the messages from `start_position` to end-of-stream, and separately measures the
/// entry's total logical (decompressed) size. A `start_position` beyond the stream's actual
/// length surfaces as an `UnexpectedEof` here, which the caller treats as corruption: a stored
/// `next` offset can never legitimately exceed the data it describes.
fn count_and_size(
    path: &Path,
    compressed: bool,
    start_position: u64,
    codec: &dyn MessageCodec,
) -> io::Result<(u64, u64)> {
    let reader = PositionedReader::open(path, compressed, start_position)?;
    let mut source = codec.new_input(Box::new(reader));
    let mut count = 0u64;
    while source.skip_message()? {
        count += 1;
    }

    let size = logical_size(path, compressed)?;

    Ok((count, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::LengthDelimitedCodec,
        config::{FileQueueConfig, MergePolicy},
        io::PositionedWriter,
    };
    use tempfile::tempdir;

    fn open_queue(root: &Path, name: &str) -> Arc<FilesQueue> {
        let config = FileQueueConfig::builder(name, root).build().unwrap();
        FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap()
    }

    /// Writes a transaction buffer through the codec, as a sender would, and returns
    /// `(message_count, byte_size)` for use with [`FilesQueue::release_entry`].
    fn write_trans(queue: &FilesQueue, name: &str, messages: &[&[u8]]) -> (u64, u64) {
        let trans_path = queue.trans_path(name);
        let writer = PositionedWriter::create(&trans_path, queue.compressed()).unwrap();
        let mut sink = queue.codec().new_output(Box::new(writer));
        for message in messages {
            sink.write_message(message).unwrap();
        }
        sink.finish().unwrap();
        // Logical (decompressed) size, matching what `Sender::commit_locked` records.
        let size = logical_size(&trans_path, queue.compressed()).unwrap();
        (messages.len() as u64, size)
    }

    fn read_all(queue: &FilesQueue, name: &str, start: u64) -> Vec<Vec<u8>> {
        let reader = PositionedReader::open(&queue.data_path(name), queue.compressed(), start).unwrap();
        let mut source = queue.codec().new_input(Box::new(reader));
        let mut messages = Vec::new();
        while let Some(message) = source.read_message().unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn open_creates_empty_queue() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");
        let info = queue.info();
        assert_eq!(info.message_count, 0);
        assert_eq!(info.file_count, 0);
    }

    #[test]
    fn promote_then_receive_roundtrip() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");

        let trans_name = queue.allocate_trans_name();
        let (count, size) = write_trans(&queue, &trans_name, &[b"a", b"b", b"c"]);
        queue.release_entry(&trans_name, count, size).unwrap();

        assert_eq!(queue.info().message_count, 3);

        let entry = queue.next_ready_entry(None).unwrap();
        let messages = read_all(&queue, entry.name(), entry.next_read_position());
        assert_eq!(messages, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        queue
            .drop_entries(&[entry.name().to_string()], None, 3)
            .unwrap();

        let info = queue.info();
        assert_eq!(info.message_count, 0);
        assert_eq!(info.file_count, 0);
        assert!(!queue.data_path(entry.name()).exists());
    }

    #[test]
    fn merge_combines_small_transactions_into_tail() {
        let dir = tempdir().unwrap();
        let config = FileQueueConfig::builder("orders", dir.path())
            .merge(MergePolicy {
                merge_limit: 3,
                merge_split: 5,
            })
            .build()
            .unwrap();
        let queue = FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap();

        let first = queue.allocate_trans_name();
        let (n, size) = write_trans(&queue, &first, &[b"a"]);
        queue.release_entry(&first, n, size).unwrap();

        let second = queue.allocate_trans_name();
        let (n, size) = write_trans(&queue, &second, &[b"b", b"c"]);
        queue.release_entry(&second, n, size).unwrap();

        let third = queue.allocate_trans_name();
        let (n, size) = write_trans(&queue, &third, &[b"d", b"e", b"f"]);
        queue.release_entry(&third, n, size).unwrap();

        assert_eq!(queue.info().file_count, 2);
        assert_eq!(queue.info().message_count, 6);

        let head = queue.next_ready_entry(None).unwrap();
        assert_eq!(read_all(&queue, head.name(), 0), vec![b"a".to_vec()]);

        let tail = queue.next_ready_entry(Some(head.name())).unwrap();
        assert_eq!(
            read_all(&queue, tail.name(), 0),
            vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec(), b"e".to_vec(), b"f".to_vec()]
        );
    }

    #[test]
    fn partial_drop_persists_next_offset_and_resumes_after_reopen() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");

        let trans_name = queue.allocate_trans_name();
        let (count, size) = write_trans(&queue, &trans_name, &[b"p", b"q", b"r", b"s"]);
        queue.release_entry(&trans_name, count, size).unwrap();

        let entry = queue.next_ready_entry(None).unwrap();
        let offset_after_two = {
            let reader = PositionedReader::open(&queue.data_path(entry.name()), queue.compressed(), 0).unwrap();
            let mut source = queue.codec().new_input(Box::new(reader));
            source.read_message().unwrap();
            let second = source.read_message().unwrap();
            assert!(second.is_some());
            // `LengthDelimitedCodec` has no explicit position accessor; recompute the consumed
            // byte length the same way a `Receiver` would, via `PositionedReader::position`.
            8 + b"p".len() as u64 + 8 + b"q".len() as u64
        };

        queue
            .drop_entries(&[], Some((entry.name(), offset_after_two)), 2)
            .unwrap();

        drop(queue);
        let queue = open_queue(dir.path(), "orders");
        let info = queue.info();
        assert_eq!(info.message_count, 2);

        let resumed = queue.next_ready_entry(None).unwrap();
        assert_eq!(resumed.next_read_position(), offset_after_two);
        assert_eq!(
            read_all(&queue, resumed.name(), resumed.next_read_position()),
            vec![b"r".to_vec(), b"s".to_vec()]
        );
    }

    #[test]
    fn recovery_quarantines_corrupt_entry() {
        let dir = tempdir().unwrap();
        let storage = dir.path().join("orders");
        fs::create_dir_all(&storage).unwrap();
        let name = FileNamer::<SystemClock>::new().next_name();
        fs::write(storage.join(format!("{name}.data")), b"not a valid frame stream \xFF\xFF").unwrap();

        let queue = open_queue(dir.path(), "orders");
        assert_eq!(queue.info().file_count, 0);
        assert!(storage.join(format!("{name}.bad")).exists());
    }

    #[test]
    fn recovery_discards_uncommitted_trans_without_autocommit() {
        let dir = tempdir().unwrap();
        let storage = dir.path().join("orders");
        fs::create_dir_all(&storage).unwrap();
        let name = FileNamer::<SystemClock>::new().next_name();
        fs::write(storage.join(format!("{name}.trans")), b"partial").unwrap();

        let queue = open_queue(dir.path(), "orders");
        assert_eq!(queue.info().file_count, 0);
        assert!(!storage.join(format!("{name}.trans")).exists());
    }

    #[test]
    fn purge_removes_ready_entries_and_resets_counters() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), "orders");

        let trans_name = queue.allocate_trans_name();
        let (count, size) = write_trans(&queue, &trans_name, &[b"x", b"y"]);
        queue.release_entry(&trans_name, count, size).unwrap();

        let previous = queue.purge();
        assert_eq!(previous, 2);
        assert_eq!(queue.info().message_count, 0);
        assert_eq!(queue.info().file_count, 0);
    }
}
