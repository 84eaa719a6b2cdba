//! Queue configuration: builders mirroring `vector_buffers`'s `DiskBufferConfigBuilder`, validated
//! in `build()`, and `serde`-deserializable so applications can load them from a config file as
//! easily as constructing one by hand.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ConfigError, InvalidParameterSnafu},
    kind::PathNamer,
};
use snafu::ensure;

const DEFAULT_DATA_SUFFIX: &str = ".data";
const DEFAULT_TRANS_SUFFIX: &str = ".trans";
const DEFAULT_NEXT_SUFFIX: &str = ".next";
const DEFAULT_BAD_SUFFIX: &str = ".bad";
const DEFAULT_BACKUP_SUFFIX: &str = ".backup";
const DEFAULT_COMPRESSED_SUFFIX: &str = ".gz";
const DEFAULT_LOCK_SUFFIX: &str = ".lock";

/// Retry policy for filesystem rename/delete operations.
///
/// Lives in an engine-scoped struct passed explicitly rather than read from process-wide
/// properties, so a queue's retry behavior is reproducible from its config alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retries: u32,
    #[serde(with = "humantime_duration")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_millis(100),
        }
    }
}

/// Auto-commit policy for a [`crate::sender::Sender`].
///
/// `enabled` governs both a sender's close-time commit-vs-rollback choice and, at the engine
/// level, whether recovery promotes leftover `trans` files instead of discarding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AutoCommitConfig {
    pub enabled: bool,
    /// Commit inline once this many uncommitted messages have been sent. `0` disables the
    /// threshold trigger.
    pub threshold: u64,
    /// Commit after this much idle time since the last write. `None`/zero disables the timeout
    /// trigger.
    #[serde(with = "humantime_duration_opt", default)]
    pub timeout: Option<Duration>,
}

/// Merge/split policy controlling when a newly-committed transaction is appended to the tail
/// entry instead of becoming its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MergePolicy {
    /// Max messages in an incoming transaction that may merge into the tail. `0` disables
    /// merging entirely.
    pub merge_limit: u64,
    /// Max messages already in the tail before refusing further merges into it.
    pub merge_split: u64,
}

impl MergePolicy {
    fn eligible(&self, tail_message_count: u64, incoming_message_count: u64) -> bool {
        self.merge_limit > 0
            && incoming_message_count <= self.merge_limit
            && tail_message_count <= self.merge_split
    }

    pub(crate) fn allows_merge(&self, tail_message_count: u64, incoming_message_count: u64) -> bool {
        self.eligible(tail_message_count, incoming_message_count)
    }
}

/// Configuration for a [`crate::engine::FilesQueue`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileQueueConfig {
    pub root: PathBuf,
    pub directory: Option<String>,
    pub entry_prefix: String,
    pub data_suffix: String,
    pub trans_suffix: String,
    pub next_suffix: String,
    pub bad_suffix: String,
    pub backup_suffix: String,
    pub compressed: bool,
    pub compressed_suffix: String,
    pub backup: bool,
    pub lock_disabled: bool,
    pub lock_prefix: String,
    pub lock_suffix: String,
    pub merge: MergePolicy,
    pub auto_commit: AutoCommitConfig,
    pub retry: RetryPolicy,
}

impl FileQueueConfig {
    pub fn builder(name: impl Into<String>, root: impl AsRef<Path>) -> FileQueueConfigBuilder {
        FileQueueConfigBuilder::new(name.into(), root.as_ref().to_path_buf())
    }

    /// The concrete storage directory: `root/directory`, with `directory` defaulting to the
    /// queue name.
    pub fn storage_dir(&self) -> PathBuf {
        self.root.join(self.directory.as_deref().unwrap_or(""))
    }

    pub(crate) fn path_namer(&self) -> PathNamer {
        PathNamer::new(
            self.storage_dir(),
            self.entry_prefix.clone(),
            self.data_suffix.clone(),
            self.trans_suffix.clone(),
            self.next_suffix.clone(),
            self.bad_suffix.clone(),
            self.backup_suffix.clone(),
            self.lock_prefix.clone(),
            self.lock_suffix.clone(),
            self.compressed,
            self.compressed_suffix.clone(),
        )
    }
}

/// Builder for [`FileQueueConfig`].
#[derive(Debug, Clone)]
pub struct FileQueueConfigBuilder {
    name: String,
    root: PathBuf,
    directory: Option<String>,
    entry_prefix: String,
    data_suffix: String,
    trans_suffix: String,
    next_suffix: String,
    bad_suffix: String,
    backup_suffix: String,
    compressed: bool,
    compressed_suffix: String,
    backup: bool,
    lock_disabled: bool,
    lock_prefix: String,
    lock_suffix: String,
    merge: MergePolicy,
    auto_commit: AutoCommitConfig,
    retry: RetryPolicy,
}

impl FileQueueConfigBuilder {
    fn new(name: String, root: PathBuf) -> Self {
        Self {
            name,
            root,
            directory: None,
            entry_prefix: String::new(),
            data_suffix: DEFAULT_DATA_SUFFIX.to_string(),
            trans_suffix: DEFAULT_TRANS_SUFFIX.to_string(),
            next_suffix: DEFAULT_NEXT_SUFFIX.to_string(),
            bad_suffix: DEFAULT_BAD_SUFFIX.to_string(),
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
            compressed: false,
            compressed_suffix: DEFAULT_COMPRESSED_SUFFIX.to_string(),
            backup: false,
            lock_disabled: false,
            lock_prefix: String::new(),
            lock_suffix: DEFAULT_LOCK_SUFFIX.to_string(),
            merge: MergePolicy::default(),
            auto_commit: AutoCommitConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn entry_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entry_prefix = prefix.into();
        self
    }

    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn lock_disabled(mut self, disabled: bool) -> Self {
        self.lock_disabled = disabled;
        self
    }

    pub fn merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn auto_commit(mut self, auto_commit: AutoCommitConfig) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<FileQueueConfig, ConfigError> {
        ensure!(
            !self.name.is_empty(),
            InvalidParameterSnafu {
                param_name: "name",
                reason: "must not be empty".to_string(),
            }
        );

        if self.merge.merge_limit > 0 {
            ensure!(
                self.merge.merge_split >= self.merge.merge_limit,
                InvalidParameterSnafu {
                    param_name: "merge.merge_split",
                    reason: "must be >= merge.merge_limit when merging is enabled".to_string(),
                }
            );
        }

        Ok(FileQueueConfig {
            root: self.root,
            directory: Some(self.directory.unwrap_or(self.name)),
            entry_prefix: self.entry_prefix,
            data_suffix: self.data_suffix,
            trans_suffix: self.trans_suffix,
            next_suffix: self.next_suffix,
            bad_suffix: self.bad_suffix,
            backup_suffix: self.backup_suffix,
            compressed: self.compressed,
            compressed_suffix: self.compressed_suffix,
            backup: self.backup,
            lock_disabled: self.lock_disabled,
            lock_prefix: self.lock_prefix,
            lock_suffix: self.lock_suffix,
            merge: self.merge,
            auto_commit: self.auto_commit,
            retry: self.retry,
        })
    }
}

/// Configuration for a [`crate::memory::MemoryQueue`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct MemoryQueueConfig {
    /// If positive and no receiver is attached, drop the oldest messages once the buffer exceeds
    /// this many messages.
    pub keep_limit: Option<u64>,
    /// If `true`, `send` is a no-op when no receiver is attached.
    pub receiver_required: bool,
    pub auto_commit: AutoCommitConfig,
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod humantime_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_millis()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
