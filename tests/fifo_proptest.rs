//! Property-based check that messages are always delivered in commit order regardless of how
//! senders chunk them into transactions, matching Testable Property 2 (FIFO across senders).

use std::{sync::Arc, time::Duration};

use filequeue::{FileQueueConfig, FilesQueue, LengthDelimitedCodec};
use proptest::prelude::*;
use tempfile::tempdir;

fn open(root: &std::path::Path, name: &str) -> Arc<FilesQueue> {
    let config = FileQueueConfig::builder(name, root).build().unwrap();
    FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap()
}

proptest! {
    #[test]
    fn delivery_order_matches_commit_order(batches in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 1..8),
        1..12,
    )) {
        let dir = tempdir().unwrap();
        let queue = open(dir.path(), "orders");
        let sender = queue.new_sender();

        let mut expected = Vec::new();
        for batch in &batches {
            // Each element of `batch` becomes its own single-byte message within this transaction.
            let refs: Vec<&[u8]> = batch.iter().map(std::slice::from_ref).collect();
            sender.send(&refs, true).unwrap();
            expected.extend(batch.iter().map(|b| vec![*b]));
        }

        let receiver = queue.new_receiver();
        let mut delivered = Vec::new();
        while delivered.len() < expected.len() {
            let chunk = receiver.receive(expected.len(), Some(Duration::from_millis(200))).unwrap();
            if chunk.is_empty() {
                break;
            }
            delivered.extend(chunk);
        }
        receiver.commit().unwrap();

        prop_assert_eq!(delivered, expected);
    }
}
