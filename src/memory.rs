//! The non-durable sibling of [`crate::engine::FilesQueue`]: same session-based sender/receiver
//! contract, backed by a plain in-memory FIFO instead of an on-disk entry catalog.
//!
//! Grounded on `vector_buffers::variant::in_memory_v2`'s bounded in-memory channel, generalized
//! from a one-shot `mpsc` handoff to a transactional buffer, since this queue additionally needs
//! commit/rollback semantics a channel alone cannot express.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, Weak,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::{info, warn};

use crate::{
    config::{AutoCommitConfig, MemoryQueueConfig},
    error::MemoryQueueError,
    scheduler::{register_auto_commit_timeout, IdleTracker, TimeoutHandle, TimeoutScheduler},
    stats::{Counters, QueueInfo},
};

struct Inner {
    messages: VecDeque<Vec<u8>>,
    counters: Counters,
    receiver_attached: bool,
    warned_on_drop: bool,
}

/// The in-memory, non-durable queue engine.
///
/// Shared between sender and receiver sessions behind an `Arc`, exactly like
/// [`crate::engine::FilesQueue`]; every operation takes `&self` and serializes through one mutex
/// plus a condvar used to wake a blocked `receive`.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    condvar: Condvar,
    config: MemoryQueueConfig,
    scheduler: Option<Arc<dyn TimeoutScheduler>>,
    receiver_generation: AtomicU64,
    current_receiver_generation: AtomicU64,
}

impl MemoryQueue {
    pub fn open(config: MemoryQueueConfig) -> Arc<Self> {
        Self::open_with_scheduler(config, None)
    }

    pub fn open_with_scheduler(
        config: MemoryQueueConfig,
        scheduler: Option<Arc<dyn TimeoutScheduler>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                counters: Counters::default(),
                receiver_attached: false,
                warned_on_drop: false,
            }),
            condvar: Condvar::new(),
            config,
            scheduler,
            receiver_generation: AtomicU64::new(0),
            current_receiver_generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &MemoryQueueConfig {
        &self.config
    }

    pub fn new_sender(self: &Arc<Self>) -> Arc<MemorySender> {
        MemorySender::new(Arc::clone(self), self.config.auto_commit, self.scheduler.clone())
    }

    pub fn new_receiver(self: &Arc<Self>) -> MemoryReceiver {
        MemoryReceiver::new(Arc::clone(self))
    }

    pub fn info(&self) -> QueueInfo {
        self.inner.lock().counters.snapshot()
    }

    fn register_receiver(&self) -> u64 {
        let mut inner = self.inner.lock();
        let generation = self.receiver_generation.fetch_add(1, Ordering::SeqCst) + 1;
        if inner.receiver_attached {
            warn!(queue = "memory", "replacing already-active receiver");
        }
        self.current_receiver_generation.store(generation, Ordering::SeqCst);
        inner.receiver_attached = true;
        generation
    }

    fn is_current_receiver(&self, generation: u64) -> bool {
        self.current_receiver_generation.load(Ordering::SeqCst) == generation
    }

    fn release_receiver(&self, generation: u64) {
        if self
            .current_receiver_generation
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let mut inner = self.inner.lock();
            inner.receiver_attached = false;
            if self.config.receiver_required {
                let dropped = inner.messages.len() as u64;
                inner.messages.clear();
                inner.counters.message_count = 0;
                if dropped > 0 {
                    info!(queue = "memory", dropped, "purged buffer on receiver close");
                }
            }
        }
    }

    /// Appends a committed transaction's messages to the tail, applying `receiver.required`
    /// silent-discard and `keep.limit` eviction.
    fn enqueue(&self, mut messages: VecDeque<Vec<u8>>) {
        let mut inner = self.inner.lock();

        if self.config.receiver_required && !inner.receiver_attached {
            return;
        }

        inner.messages.append(&mut messages);
        inner.counters.message_count = inner.messages.len() as u64;

        if !inner.receiver_attached {
            if let Some(limit) = self.config.keep_limit {
                let mut dropped = 0u64;
                while inner.messages.len() as u64 > limit {
                    inner.messages.pop_front();
                    dropped += 1;
                }
                if dropped > 0 {
                    if !inner.warned_on_drop {
                        warn!(queue = "memory", dropped, limit, "keep.limit exceeded, dropping oldest messages");
                        inner.warned_on_drop = true;
                    }
                    inner.counters.messages_dropped += dropped;
                    inner.counters.message_count = inner.messages.len() as u64;
                    if inner.messages.is_empty() {
                        info!(queue = "memory", "buffer emptied after keep.limit eviction");
                        inner.warned_on_drop = false;
                    }
                }
            }
        }

        inner.counters.last_sender_commit = Some(std::time::SystemTime::now());
        self.condvar.notify_all();
    }

    /// Re-inserts previously-dequeued messages at the head, in their original relative order, so a
    /// rolled-back receive transaction replays identically to the first attempt.
    fn requeue_front(&self, messages: Vec<Vec<u8>>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        for message in messages.into_iter().rev() {
            inner.messages.push_front(message);
        }
        inner.counters.message_count = inner.messages.len() as u64;
        self.condvar.notify_all();
    }

    fn pop_front_blocking(&self, timeout: Option<Duration>) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        loop {
            if let Some(message) = inner.messages.pop_front() {
                inner.counters.message_count = inner.messages.len() as u64;
                return Some(message);
            }
            match deadline {
                None => self.condvar.wait(&mut inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let timed_out = self.condvar.wait_for(&mut inner, deadline - now).timed_out();
                    if timed_out {
                        return None;
                    }
                }
            }
        }
    }

    fn mark_receiver_commit(&self) {
        let mut inner = self.inner.lock();
        inner.counters.last_receiver_commit = Some(std::time::SystemTime::now());
    }

    /// Drops every currently buffered message, returning the count dropped.
    fn purge(&self) -> u64 {
        let mut inner = self.inner.lock();
        let count = inner.messages.len() as u64;
        inner.messages.clear();
        inner.counters.message_count = 0;
        count
    }
}

struct OpenTransaction {
    buffer: VecDeque<Vec<u8>>,
    timeout_handle: Option<Box<dyn TimeoutHandle>>,
}

struct SenderState {
    open: Option<OpenTransaction>,
    closed: bool,
    idle: IdleTracker,
}

/// A sender session for a [`MemoryQueue`]. Mirrors [`crate::sender::Sender`]'s transaction
/// lifecycle and shares its auto-commit scheduling helpers.
pub struct MemorySender {
    queue: Arc<MemoryQueue>,
    state: StdMutex<SenderState>,
    auto_commit: AutoCommitConfig,
    scheduler: Option<Arc<dyn TimeoutScheduler>>,
    self_weak: Weak<MemorySender>,
}

impl MemorySender {
    pub(crate) fn new(
        queue: Arc<MemoryQueue>,
        auto_commit: AutoCommitConfig,
        scheduler: Option<Arc<dyn TimeoutScheduler>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            queue,
            state: StdMutex::new(SenderState {
                open: None,
                closed: false,
                idle: IdleTracker::default(),
            }),
            auto_commit,
            scheduler,
            self_weak: weak.clone(),
        })
    }

    pub fn send(&self, messages: &[&[u8]], commit: bool) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(MemoryQueueError::ClosedSession);
        }

        if state.open.is_none() {
            let weak = self.self_weak.clone();
            let timeout_handle = register_auto_commit_timeout(&self.scheduler, &self.auto_commit, move || {
                if let Some(sender) = weak.upgrade() {
                    sender.on_timeout_tick();
                }
            });
            state.open = Some(OpenTransaction {
                buffer: VecDeque::new(),
                timeout_handle,
            });
        }

        {
            let open = state.open.as_mut().expect("just established above");
            for message in messages {
                open.buffer.push_back(message.to_vec());
            }
            state.idle.mark_active();
        }

        let should_commit = commit
            || (self.auto_commit.threshold > 0
                && state.open.as_ref().unwrap().buffer.len() as u64 >= self.auto_commit.threshold);

        if should_commit {
            self.commit_locked(&mut state);
        }

        Ok(())
    }

    pub fn commit(&self) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(MemoryQueueError::ClosedSession);
        }
        self.commit_locked(&mut state);
        Ok(())
    }

    fn commit_locked(&self, state: &mut SenderState) {
        let Some(open) = state.open.take() else {
            return;
        };
        drop(open.timeout_handle);
        self.queue.enqueue(open.buffer);
    }

    pub fn rollback(&self) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Err(MemoryQueueError::ClosedSession);
        }
        self.rollback_locked(&mut state);
        Ok(())
    }

    fn rollback_locked(&self, state: &mut SenderState) {
        if let Some(open) = state.open.take() {
            drop(open.timeout_handle);
        }
    }

    pub fn close(&self) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed {
            return Ok(());
        }
        if self.auto_commit.enabled {
            self.commit_locked(&mut state);
        } else {
            self.rollback_locked(&mut state);
        }
        state.closed = true;
        Ok(())
    }

    pub(crate) fn on_timeout_tick(&self) {
        let mut state = self.state.lock().expect("sender mutex poisoned");
        if state.closed || state.open.is_none() {
            return;
        }
        if state.idle.on_tick() {
            self.commit_locked(&mut state);
        }
    }
}

impl Drop for MemorySender {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct ReceiverState {
    consumed_in_tx: Vec<Vec<u8>>,
    closed: bool,
}

/// The single active receiver session for a [`MemoryQueue`].
///
/// Commit discards `consumed_in_tx`; rollback hands every message drawn this transaction back to
/// [`MemoryQueue::requeue_front`] in original order, so a rolled-back `receive` replays identically.
pub struct MemoryReceiver {
    queue: Arc<MemoryQueue>,
    generation: u64,
    state: StdMutex<ReceiverState>,
}

impl MemoryReceiver {
    pub(crate) fn new(queue: Arc<MemoryQueue>) -> Self {
        let generation = queue.register_receiver();
        Self {
            queue,
            generation,
            state: StdMutex::new(ReceiverState {
                consumed_in_tx: Vec::new(),
                closed: false,
            }),
        }
    }

    fn ensure_active(&self, state: &ReceiverState) -> Result<(), MemoryQueueError> {
        if state.closed || !self.queue.is_current_receiver(self.generation) {
            return Err(MemoryQueueError::ClosedSession);
        }
        Ok(())
    }

    /// Returns up to `limit` messages, blocking up to `timeout` for the first message only.
    pub fn receive(&self, limit: usize, timeout: Option<Duration>) -> Result<Vec<Vec<u8>>, MemoryQueueError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;

        let mut messages = Vec::new();
        let deadline = timeout.map(|d| Instant::now() + d);

        while messages.len() < limit {
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
                Some(Duration::ZERO)
            };

            let Some(message) = self.queue.pop_front_blocking(remaining_timeout) else {
                break;
            };
            state.consumed_in_tx.push(message.clone());
            messages.push(message);
        }

        Ok(messages)
    }

    pub fn commit(&self) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;
        state.consumed_in_tx.clear();
        self.queue.mark_receiver_commit();
        Ok(())
    }

    pub fn rollback(&self) -> Result<(), MemoryQueueError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;
        self.rollback_locked(&mut state);
        Ok(())
    }

    fn rollback_locked(&self, state: &mut ReceiverState) {
        let consumed = std::mem::take(&mut state.consumed_in_tx);
        self.queue.requeue_front(consumed);
    }

    pub fn purge(&self) -> Result<u64, MemoryQueueError> {
        let mut state = self.state.lock().expect("receiver mutex poisoned");
        self.ensure_active(&state)?;
        state.consumed_in_tx.clear();
        Ok(self.queue.purge())
    }

    pub fn close(&self) -> Result<(), MemoryQueueError> {
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

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
