//! Codec benchmarks for courier-protocol.

use bytes::BytesMut;
use courier_protocol::{codec, Frame};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_deliver_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver_encode");
    for size in [64usize, 1024, 65536] {
        let frame = Frame::deliver(1, vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| codec::encode(black_box(frame)))
        });
    }
    group.finish();
}

fn bench_batch_decode(c: &mut Criterion) {
    // A long-poll response carrying 32 small deliveries
    let mut batch = BytesMut::new();
    for seq in 1..=32 {
        codec::encode_into(&Frame::deliver(seq, vec![0u8; 128]), &mut batch).unwrap();
    }
    let batch = batch.freeze();

    let mut group = c.benchmark_group("batch_decode");
    group.throughput(Throughput::Elements(32));
    group.bench_function("32x128B", |b| {
        b.iter(|| {
            let mut buf = BytesMut::from(&batch[..]);
            let mut count = 0;
            while let Ok(Some(frame)) = codec::decode_from(&mut buf) {
                black_box(frame);
                count += 1;
            }
            count
        })
    });
    group.finish();
}

criterion_group!(benches, bench_deliver_encode, bench_batch_decode);
criterion_main!(benches);
