//! Latency benchmarks for Live.
//!
//! These benchmarks focus on per-operation latency.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use live_protocol::{codec, ChannelAddress, ClientInfo, Frame};
use std::time::{Duration, Instant};
use tenvis_live_core::{Hub, Retention, SubscribeOptions, WriteSampler};

fn client(i: usize) -> ClientInfo {
    ClientInfo {
        client_id: format!("conn-{i}"),
        user_id: i as i64,
        login: format!("user{i}"),
    }
}

/// Benchmark round-trip encode/decode latency.
fn bench_codec_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_roundtrip");

    let frame = Frame::publish("stream/cpu/host1", vec![0u8; 256]);

    group.bench_function("256B", |b| {
        b.iter(|| {
            let encoded = codec::encode(black_box(&frame)).unwrap();
            codec::decode(black_box(&encoded)).unwrap()
        });
    });

    group.finish();
}

/// Benchmark publish + receive latency through the hub.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");

    for subscribers in [1usize, 10] {
        group.bench_function(format!("{subscribers}_subscribers"), |b| {
            b.iter_custom(|iters| {
                let hub = Hub::new();
                let mut subs: Vec<_> = (0..subscribers)
                    .map(|i| {
                        hub.subscribe(1, "core/broadcast/t", client(i), SubscribeOptions::default())
                            .unwrap()
                    })
                    .collect();
                let data = Bytes::from(vec![0u8; 64]);

                let start = Instant::now();
                for _ in 0..iters {
                    let _ = hub.publish(1, "core/broadcast/t", data.clone(), Retention::none());
                    for sub in &mut subs {
                        let _ = sub.receiver.try_recv();
                    }
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Benchmark subscribing with history recovery.
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");

    let hub = Hub::new();
    let retention = Retention {
        size: 100,
        ttl: None,
    };
    for _ in 0..100 {
        let _ = hub.publish(1, "stream/cpu/host1", Bytes::from(vec![0u8; 64]), retention);
    }
    let options = SubscribeOptions {
        recover: true,
        ..Default::default()
    };

    group.bench_function("100_messages", |b| {
        b.iter(|| {
            let sub = hub
                .subscribe(1, "stream/cpu/host1", client(0), options)
                .unwrap();
            let _ = hub.unsubscribe("conn-0", 1, "stream/cpu/host1");
            black_box(sub.recovered.len())
        });
    });

    group.finish();
}

/// Benchmark channel address parsing.
fn bench_channel_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_parse");

    group.bench_function("parse", |b| {
        b.iter(|| ChannelAddress::parse(black_box("core/dashboard/uid/abc123")))
    });

    group.bench_function("display", |b| {
        let address = ChannelAddress::parse("core/dashboard/uid/abc123").unwrap();
        b.iter(|| black_box(&address).to_string())
    });

    group.finish();
}

/// Benchmark the remote-write sampling check.
fn bench_sampler(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler");

    let sampler = WriteSampler::new();

    group.bench_function("try_acquire", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = format!("1/stream/cpu/host{}", i % 1000);
            i += 1;
            sampler.try_acquire(black_box(&key), Duration::from_millis(500))
        });
    });

    group.finish();
}

/// Benchmark subscriber lookup across many channels.
fn bench_subscription_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("subscription_lookup");

    let hub = Hub::new();
    for i in 0..1000 {
        let channel = format!("core/broadcast/room{i}");
        for j in 0..10 {
            let _ = hub.subscribe(1, &channel, client(i * 10 + j), SubscribeOptions::default());
        }
    }

    group.bench_function("channel_exists", |b| {
        let mut i = 0;
        b.iter(|| {
            let channel = format!("core/broadcast/room{}", i % 1000);
            i += 1;
            hub.channel_exists(1, black_box(&channel))
        });
    });

    group.bench_function("subscriber_count", |b| {
        let mut i = 0;
        b.iter(|| {
            let channel = format!("core/broadcast/room{}", i % 1000);
            i += 1;
            hub.subscriber_count(1, black_box(&channel))
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec_roundtrip,
    bench_pubsub_latency,
    bench_recovery,
    bench_channel_parse,
    bench_sampler,
    bench_subscription_lookup,
);
criterion_main!(benches);
