//! Benchmarks for the frame path
//!
//! Covers the work done per received frame and per publish:
//! - Decoding each group's payload into scaled values
//! - Full sink delivery (transport parse, decode, store swap)
//! - Encoding a complete snapshot into broker messages

use cellgate::publisher::messages;
use cellgate::{Frame, FrameSink, GroupId, SnapshotStore, decode};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

/// One frame per group with realistic payloads
fn pack_frames() -> Vec<Frame> {
    [
        (GroupId::Cells1, [0x0C, 0xE4, 0x0C, 0xE5, 0x0C, 0xE6, 0x0C, 0xE7]),
        (GroupId::Cells2, [0x0C, 0xE8, 0x0C, 0xE9, 0x0C, 0xEA, 0x0C, 0xEB]),
        (GroupId::Cells3, [0x0C, 0xEC, 0x0C, 0xED, 0x0C, 0xEE, 0x0C, 0xEF]),
        (GroupId::Cells4, [0x0C, 0xF0, 0x0C, 0xF1, 0x0C, 0xF2, 0x0C, 0xF3]),
        (GroupId::Pack, [0x02, 0x10, 0x74, 0xA4, 0x02, 0x0F, 0x75, 0x30]),
        (GroupId::Temperatures, [0x3D, 0x3E, 0x3F, 0x40, 0, 0, 0, 0]),
        (GroupId::Status, [160, 80, 0, 16, 32, 0x01, 0x40, 240]),
    ]
    .into_iter()
    .map(|(group, payload)| Frame::for_group(group, &payload).expect("valid payload"))
    .collect()
}

fn bench_decode(c: &mut Criterion) {
    let frames = pack_frames();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(frames.len() as u64));

    group.bench_function("all_groups", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(decode(black_box(frame)));
            }
        })
    });

    let unknown = Frame::new(0x18FF_50E5, &[1, 2, 3, 4, 5, 6, 7, 8]).expect("valid payload");
    group.bench_function("unknown_identifier", |b| b.iter(|| black_box(decode(black_box(&unknown)))));

    group.finish();
}

fn bench_sink_delivery(c: &mut Criterion) {
    let wires: Vec<[u8; Frame::WIRE_SIZE]> = pack_frames().iter().map(Frame::to_wire).collect();
    let sink = FrameSink::new(SnapshotStore::new());

    let mut group = c.benchmark_group("sink_delivery");
    group.throughput(Throughput::Bytes((wires.len() * Frame::WIRE_SIZE) as u64));

    group.bench_function("wire_to_store", |b| {
        b.iter(|| {
            for wire in &wires {
                black_box(sink.deliver(black_box(wire)).expect("well-formed frame"));
            }
        })
    });

    group.finish();
}

fn bench_message_encoding(c: &mut Criterion) {
    let store = SnapshotStore::new();
    let sink = FrameSink::new(store.clone());
    for frame in pack_frames() {
        sink.deliver_frame(&frame);
    }
    let snapshot = store.snapshot();

    c.bench_function("encode_snapshot_messages", |b| {
        b.iter(|| {
            for message in messages(black_box(&snapshot)) {
                black_box(message.to_json().expect("finite readings"));
            }
        })
    });
}

criterion_group!(benches, bench_decode, bench_sink_delivery, bench_message_encoding);
criterion_main!(benches);
