//! Crash-recovery scenarios: quarantining corrupt entries, discarding uncommitted transactions,
//! and confirming recovery is idempotent across repeated restarts.

use std::{fs, sync::Arc, time::Duration};

use filequeue::{FileQueueConfig, FilesQueue, LengthDelimitedCodec};
use tempfile::tempdir;

fn open(root: &std::path::Path, name: &str) -> Arc<FilesQueue> {
    let config = FileQueueConfig::builder(name, root).build().unwrap();
    FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap()
}

#[test]
fn corrupt_data_file_is_quarantined_not_fatal() {
    let dir = tempdir().unwrap();
    let name = "orders";

    let data_path = {
        let queue = open(dir.path(), name);
        let sender = queue.new_sender();
        sender.send(&[b"a", b"b"], true).unwrap();
        queue.config().storage_dir()
    };

    // Corrupt the sole data file on disk so its framed length no longer matches its contents.
    let mut entries: Vec<_> = fs::read_dir(&data_path)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map(|ext| ext == "data").unwrap_or(false))
        .collect();
    assert_eq!(entries.len(), 1, "expected exactly one data file before corruption");
    let corrupt_path = entries.remove(0).path();
    fs::write(&corrupt_path, b"not a valid framed record stream").unwrap();

    // Recovery must not fail the whole queue open; the file is routed to `.bad` instead.
    let queue = open(dir.path(), name);
    let receiver = queue.new_receiver();
    let messages = receiver.receive(10, Some(Duration::ZERO)).unwrap();
    assert!(messages.is_empty(), "quarantined entry should not be replayed");

    let bad_files: Vec<_> = fs::read_dir(&data_path)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map(|ext| ext == "bad").unwrap_or(false))
        .collect();
    assert_eq!(bad_files.len(), 1, "corrupt entry should be quarantined to .bad");
}

#[test]
fn uncommitted_transaction_is_discarded_without_autocommit() {
    let dir = tempdir().unwrap();
    let name = "orders";

    {
        let queue = open(dir.path(), name);
        let sender = queue.new_sender();
        sender.send(&[b"x"], false).unwrap();
        // Drop without commit/rollback: Sender's Drop impl rolls back (auto_commit disabled by
        // default), but even if it didn't, recovery on the next open must discard stray `trans`
        // files since no commit protocol step ever touched them.
    }

    let queue = open(dir.path(), name);
    assert_eq!(queue.info().message_count, 0);

    let storage_dir = queue.config().storage_dir();
    let trans_files: Vec<_> = fs::read_dir(&storage_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().map(|ext| ext == "trans").unwrap_or(false))
        .collect();
    assert!(trans_files.is_empty(), "no trans files should survive recovery");
}

#[test]
fn recovery_is_idempotent_across_repeated_restarts() {
    let dir = tempdir().unwrap();
    let name = "orders";

    {
        let queue = open(dir.path(), name);
        let sender = queue.new_sender();
        sender.send(&[b"a", b"b", b"c"], true).unwrap();
    }

    let first_info = {
        let queue = open(dir.path(), name);
        queue.info()
    };

    let second_info = {
        let queue = open(dir.path(), name);
        queue.info()
    };

    assert_eq!(first_info.message_count, second_info.message_count);
    assert_eq!(first_info.file_count, second_info.file_count);
    assert_eq!(first_info.message_count, 3);
}
