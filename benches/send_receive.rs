use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use filequeue::{config::FileQueueConfig, engine::FilesQueue, LengthDelimitedCodec};
use tempfile::tempdir;

fn send_receive_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("filequeue");

    for payload_size in [64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(payload_size as u64));
        let payload = vec![0xABu8; payload_size];

        group.bench_with_input(
            BenchmarkId::new("send_commit_receive_commit", payload_size),
            &payload,
            |b, payload| {
                let dir = tempdir().unwrap();
                let config = FileQueueConfig::builder("bench", dir.path()).build().unwrap();
                let queue = FilesQueue::open(config, Arc::new(LengthDelimitedCodec)).unwrap();
                let sender = queue.new_sender();
                let receiver = queue.new_receiver();

                b.iter(|| {
                    sender.send(&[payload.as_slice()], true).unwrap();
                    let messages = receiver
                        .receive(1, Some(std::time::Duration::from_secs(1)))
                        .unwrap();
                    receiver.commit().unwrap();
                    assert_eq!(messages.len(), 1);
                });
            },
        );
    }
}

criterion_group!(name = benches;
                  config = Criterion::default();
                  targets = send_receive_bench);
criterion_main!(benches);
