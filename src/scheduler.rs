//! The timeout scheduler: fires after a configurable idle interval to trigger auto-commit.
//!
//! This is an external collaborator: callers may supply their own scheduler (wired into an
//! existing event loop, a shared timer wheel, etc) - but the crate ships one concrete,
//! thread-based implementation so it is usable and testable standalone, the same way
//! `vector_buffers` ships a `ProductionFilesystem` alongside the `Filesystem` trait it depends on.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

/// A periodic tick source used to drive sender auto-commit timeouts.
///
/// `register` is called once, the first time a sender buffers an uncommitted write; the returned
/// [`TimeoutHandle`] fires `on_tick` approximately every `interval` until dropped.
pub trait TimeoutScheduler: Send + Sync {
    fn register(&self, interval: Duration, on_tick: Box<dyn Fn() + Send>) -> Box<dyn TimeoutHandle>;
}

/// A live registration with a [`TimeoutScheduler`]. Dropping it stops further ticks.
pub trait TimeoutHandle: Send {
    /// Cancels the registration. Idempotent.
    fn cancel(&mut self);
}

/// A scheduler backed by one dedicated background thread per registration.
///
/// Simple and sufficient for the expected cardinality (one registration per live sender
/// session); a production deployment embedding this crate into a larger async runtime would
/// supply its own [`TimeoutScheduler`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadTimeoutScheduler;

impl TimeoutScheduler for ThreadTimeoutScheduler {
    fn register(&self, interval: Duration, on_tick: Box<dyn Fn() + Send>) -> Box<dyn TimeoutHandle> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_cancelled = Arc::clone(&cancelled);
        let handle = thread::spawn(move || loop {
            if stop_rx.recv_timeout(interval).is_ok() {
                return;
            }
            if thread_cancelled.load(Ordering::Acquire) {
                return;
            }
            on_tick();
        });

        Box::new(ThreadTimeoutHandle {
            cancelled,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

struct ThreadTimeoutHandle {
    cancelled: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutHandle for ThreadTimeoutHandle {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadTimeoutHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Registers `on_tick` with `scheduler` for `auto_commit`'s idle timeout, if both are configured.
///
/// Shared between [`crate::sender::Sender`] (`FilesQueue`) and [`crate::memory::MemorySender`]
/// (`MemoryQueue`) by composition, rather than duplicated or hung off a shared base class.
pub(crate) fn register_auto_commit_timeout(
    scheduler: &Option<Arc<dyn TimeoutScheduler>>,
    auto_commit: &crate::config::AutoCommitConfig,
    on_tick: impl Fn() + Send + 'static,
) -> Option<Box<dyn TimeoutHandle>> {
    match (scheduler, auto_commit.timeout) {
        (Some(scheduler), Some(timeout)) if auto_commit.enabled && !timeout.is_zero() => {
            Some(scheduler.register(timeout, Box::new(on_tick)))
        }
        _ => None,
    }
}

/// Tracks whether a sender has written anything since the last scheduler tick: if it has been
/// idle since the previous tick, the caller should commit now; otherwise it just marks idle and
/// waits for the next tick.
#[derive(Debug, Default)]
pub(crate) struct IdleTracker {
    idle_since_last_tick: bool,
}

impl IdleTracker {
    pub fn mark_active(&mut self) {
        self.idle_since_last_tick = false;
    }

    /// Called when a tick fires. Returns `true` if the caller should commit now.
    pub fn on_tick(&mut self) -> bool {
        if self.idle_since_last_tick {
            true
        } else {
            self.idle_since_last_tick = true;
            false
        }
    }
}
