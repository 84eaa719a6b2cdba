//! The observable queue snapshot and the counters it is derived from.

use std::time::SystemTime;

/// An immutable snapshot of queue statistics, safe to log or export.
///
/// Grounded on `vector_buffers::buffer_usage_data`'s counters, but kept alongside the catalog
/// (not as free-standing atomics) because these updates must be atomic *with* catalog mutation --
/// a mutex-guarded struct gives that for free, and separate atomics would not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct QueueInfo {
    pub message_count: u64,
    pub file_count: u64,
    pub files_total_size: u64,
    pub messages_dropped: u64,
    pub sender_count: u64,
    #[serde(skip)]
    pub receiver_connect_time: Option<SystemTime>,
    #[serde(skip)]
    pub last_sender_commit: Option<SystemTime>,
    #[serde(skip)]
    pub last_receiver_commit: Option<SystemTime>,
}

/// The mutable counters backing [`QueueInfo`], held inside the same mutex as the entry catalog.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub message_count: u64,
    pub file_count: u64,
    pub files_total_size: u64,
    pub messages_dropped: u64,
    pub sender_count: u64,
    pub receiver_connect_time: Option<SystemTime>,
    pub last_sender_commit: Option<SystemTime>,
    pub last_receiver_commit: Option<SystemTime>,
}

impl Counters {
    pub fn snapshot(&self) -> QueueInfo {
        QueueInfo {
            message_count: self.message_count,
            file_count: self.file_count,
            files_total_size: self.files_total_size,
            messages_dropped: self.messages_dropped,
            sender_count: self.sender_count,
            receiver_connect_time: self.receiver_connect_time,
            last_sender_commit: self.last_sender_commit,
            last_receiver_commit: self.last_receiver_commit,
        }
    }
}
