//! Entry file kinds and the suffix rules that map an entry name to a path.
//!
//! Every on-disk file that belongs to an entry shares the entry's name and differs only by a
//! kind-specific suffix (optionally followed by the compression suffix). This mirrors
//! `vector_buffers`'s split between a ledger file and per-file-ID data files, except here every
//! "data file" *is* an entry, addressed directly by name rather than by a rolling integer ID.

use std::path::{Path, PathBuf};

/// The role a given on-disk file plays for one entry (one committed sender transaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// The canonical, committed record of a sender transaction. Present iff the entry is ready.
    Data,
    /// In-progress sender write buffer; promoted to `Data` on commit, deleted on rollback.
    Trans,
    /// Holds a decimal byte offset into `Data`: the next byte a receiver must read.
    Next,
    /// `Data` renamed aside because deserialization failed during recovery.
    Bad,
    /// Post-drop archive of a `Data` file when backup mode is enabled.
    Backup,
}

/// Filename affixes configured for a queue; combined with an entry name and [`EntryKind`] to
/// produce a path via [`PathNamer::path_for`].
#[derive(Debug, Clone)]
pub struct PathNamer {
    root: PathBuf,
    entry_prefix: String,
    data_suffix: String,
    trans_suffix: String,
    next_suffix: String,
    bad_suffix: String,
    backup_suffix: String,
    lock_prefix: String,
    lock_suffix: String,
    compressed: bool,
    compressed_suffix: String,
}

impl PathNamer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        root: PathBuf,
        entry_prefix: String,
        data_suffix: String,
        trans_suffix: String,
        next_suffix: String,
        bad_suffix: String,
        backup_suffix: String,
        lock_prefix: String,
        lock_suffix: String,
        compressed: bool,
        compressed_suffix: String,
    ) -> Self {
        Self {
            root,
            entry_prefix,
            data_suffix,
            trans_suffix,
            next_suffix,
            bad_suffix,
            backup_suffix,
            lock_prefix,
            lock_suffix,
            compressed,
            compressed_suffix,
        }
    }

    /// The storage directory that holds every entry file.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether data/trans/bad/backup streams are gzip-compressed.
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Builds the path for `kind` of the entry named `name`.
    ///
    /// `Next` files are never compressed: they hold a short plain-UTF-8 decimal offset, not a
    /// stream of framed records.
    pub fn path_for(&self, name: &str, kind: EntryKind) -> PathBuf {
        let suffix = match kind {
            EntryKind::Data => &self.data_suffix,
            EntryKind::Trans => &self.trans_suffix,
            EntryKind::Next => &self.next_suffix,
            EntryKind::Bad => &self.bad_suffix,
            EntryKind::Backup => &self.backup_suffix,
        };

        let mut file_name = format!("{}{}{}", self.entry_prefix, name, suffix);
        if self.compressed && !matches!(kind, EntryKind::Next) {
            file_name.push_str(&self.compressed_suffix);
        }

        self.root.join(file_name)
    }

    /// The path of the advisory directory lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.root
            .join(format!("{}{}", self.lock_prefix, self.lock_suffix))
    }

    /// Attempts to classify a filename found while scanning the storage directory.
    ///
    /// Returns the entry name and kind if the filename matches one of the configured suffixes
    /// (after stripping a trailing compression suffix, where applicable). Anything else -
    /// including the lock file itself - is ignored, per spec: "anything else is ignored by
    /// scans."
    pub fn classify(&self, file_name: &str) -> Option<(String, EntryKind)> {
        let rest = file_name.strip_prefix(self.entry_prefix.as_str())?;

        for (suffix, kind) in [
            (self.data_suffix.as_str(), EntryKind::Data),
            (self.trans_suffix.as_str(), EntryKind::Trans),
            (self.bad_suffix.as_str(), EntryKind::Bad),
            (self.backup_suffix.as_str(), EntryKind::Backup),
        ] {
            if let Some(stripped) = Self::strip_with_optional_compression(
                rest,
                suffix,
                &self.compressed_suffix,
            ) {
                return Some((stripped.to_string(), kind));
            }
        }

        // `Next` files are never compressed.
        if let Some(name) = rest.strip_suffix(self.next_suffix.as_str()) {
            return Some((name.to_string(), EntryKind::Next));
        }

        None
    }

    fn strip_with_optional_compression<'a>(
        rest: &'a str,
        suffix: &str,
        compressed_suffix: &str,
    ) -> Option<&'a str> {
        if let Some(name) = rest.strip_suffix(suffix) {
            return Some(name);
        }

        let combined = format!("{suffix}{compressed_suffix}");
        rest.strip_suffix(combined.as_str())
    }
}
