//! A persistent, transactional, single-consumer message queue.
//!
//! Messages are appended to local disk as committed transaction batches and replayed on restart;
//! a non-durable [`memory::MemoryQueue`] sibling offers the same sender/receiver contract without
//! the disk-backed catalog. One or more senders may write concurrently; at most one receiver may
//! be active at a time, and it observes every committed message exactly once, in commit order.
//!
//! ```no_run
//! use filequeue::{codec::LengthDelimitedCodec, config::FileQueueConfig, engine::FilesQueue};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FileQueueConfig::builder("orders", "/var/lib/myapp/queues").build()?;
//! let queue = FilesQueue::open(config, Arc::new(LengthDelimitedCodec))?;
//!
//! let sender = queue.new_sender();
//! sender.send(&[b"order-1"], true)?;
//!
//! let receiver = queue.new_receiver();
//! let messages = receiver.receive(10, Some(std::time::Duration::from_secs(1)))?;
//! receiver.commit()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod io;
pub mod kind;
pub mod lock;
pub mod memory;
pub mod naming;
pub(crate) mod retry;
pub mod scheduler;
pub mod receiver;
pub mod sender;
pub mod stats;

pub use codec::{LengthDelimitedCodec, MessageCodec, MessageSink, MessageSource};
pub use config::{
    AutoCommitConfig, FileQueueConfig, FileQueueConfigBuilder, MemoryQueueConfig, MergePolicy,
    RetryPolicy,
};
pub use engine::FilesQueue;
pub use error::{ConfigError, EngineError, MemoryQueueError, ReceiverError, SenderError};
pub use memory::{MemoryQueue, MemoryReceiver, MemorySender};
pub use receiver::Receiver;
pub use scheduler::{ThreadTimeoutScheduler, TimeoutHandle, TimeoutScheduler};
pub use sender::Sender;
pub use stats::QueueInfo;
