//! Codec benchmarks for live-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use live_protocol::{codec, ChannelAddress, Frame, PublicationData};

fn bench_encode_publication(c: &mut Criterion) {
    let frame = Frame::publication("core/broadcast/bench", 1, vec![0u8; 64]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("publication_64B", |b| {
        b.iter(|| codec::encode(black_box(&frame)))
    });
    group.finish();
}

fn bench_decode_subscribed(c: &mut Criterion) {
    let frame = Frame::Subscribed {
        id: 1,
        channel: "core/broadcast/bench".to_string(),
        data: None,
        publications: (0..10)
            .map(|offset| PublicationData {
                offset,
                payload: vec![0u8; 128],
            })
            .collect(),
    };
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("subscribed_10x128B", |b| {
        b.iter(|| codec::decode(black_box(&encoded)))
    });
    group.finish();
}

fn bench_parse_channel(c: &mut Criterion) {
    c.bench_function("parse_channel", |b| {
        b.iter(|| ChannelAddress::parse(black_box("stream/telegraf/cpu/host-1")))
    });
}

criterion_group!(
    benches,
    bench_encode_publication,
    bench_decode_subscribed,
    bench_parse_channel
);
criterion_main!(benches);
