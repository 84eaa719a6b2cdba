//! End-to-end scenarios for the non-durable [`filequeue::MemoryQueue`] sibling.

use std::time::Duration;

use filequeue::{MemoryQueue, MemoryQueueConfig, MemoryQueueError};

#[test]
fn send_receive_commit_round_trip() {
    let queue = MemoryQueue::open(MemoryQueueConfig::default());
    let sender = queue.new_sender();
    sender.send(&[b"m1", b"m2"], true).unwrap();

    let receiver = queue.new_receiver();
    let messages = receiver.receive(10, Some(Duration::from_millis(200))).unwrap();
    assert_eq!(messages, vec![b"m1".to_vec(), b"m2".to_vec()]);
    receiver.commit().unwrap();
    assert_eq!(queue.info().message_count, 0);
}

#[test]
fn rollback_is_idempotent_and_preserves_order() {
    let queue = MemoryQueue::open(MemoryQueueConfig::default());
    let sender = queue.new_sender();
    sender.send(&[b"a", b"b", b"c"], true).unwrap();

    let receiver = queue.new_receiver();
    let before = receiver.receive(10, Some(Duration::ZERO)).unwrap();
    receiver.rollback().unwrap();
    let after = receiver.receive(10, Some(Duration::ZERO)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn keep_limit_drops_oldest_while_unattended() {
    let config = MemoryQueueConfig {
        keep_limit: Some(3),
        ..Default::default()
    };
    let queue = MemoryQueue::open(config);
    let sender = queue.new_sender();
    sender.send(&[b"1", b"2", b"3", b"4", b"5"], true).unwrap();

    assert_eq!(queue.info().message_count, 3);
    let receiver = queue.new_receiver();
    let remaining = receiver.receive(10, Some(Duration::ZERO)).unwrap();
    assert_eq!(remaining, vec![b"3".to_vec(), b"4".to_vec(), b"5".to_vec()]);
}

#[test]
fn receiver_required_silently_discards_without_a_listener() {
    let config = MemoryQueueConfig {
        receiver_required: true,
        ..Default::default()
    };
    let queue = MemoryQueue::open(config);
    let sender = queue.new_sender();
    sender.send(&[b"lost"], true).unwrap();
    assert_eq!(queue.info().message_count, 0);

    let receiver = queue.new_receiver();
    sender.send(&[b"seen"], true).unwrap();
    let messages = receiver.receive(10, Some(Duration::ZERO)).unwrap();
    assert_eq!(messages, vec![b"seen".to_vec()]);
}

#[test]
fn second_receiver_replaces_first_and_sees_the_same_backlog() {
    let queue = MemoryQueue::open(MemoryQueueConfig::default());
    let sender = queue.new_sender();
    sender.send(&[b"x"], true).unwrap();

    let first = queue.new_receiver();
    let second = queue.new_receiver();

    let err = first.receive(1, Some(Duration::ZERO)).unwrap_err();
    assert!(matches!(err, MemoryQueueError::ClosedSession));

    let messages = second.receive(1, Some(Duration::ZERO)).unwrap();
    assert_eq!(messages, vec![b"x".to_vec()]);
}
