//! Throughput benchmarks for Live.
//!
//! These benchmarks measure the raw message throughput of the codec, the hub
//! and the dispatcher.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use live_protocol::{codec, ClientInfo, Frame};
use std::sync::Arc;
use tenvis_live_core::{
    register_builtin, CallContext, Dispatcher, HandlerRegistry, Hub, ManagedStreamSettings,
    OrgRole, Retention, SignedInUser, SubscribeOptions,
};

const CHANNEL: &str = "core/broadcast/bench";

fn client(i: usize) -> ClientInfo {
    ClientInfo {
        client_id: format!("conn-{i}"),
        user_id: i as i64,
        login: format!("user{i}"),
    }
}

/// Hub with `subscribers` receivers on [`CHANNEL`]. The receivers must be
/// kept alive for the duration of the benchmark.
fn hub_with_subscribers(subscribers: usize) -> (Hub, Vec<tenvis_live_core::Subscription>) {
    let hub = Hub::new();
    let subs = (0..subscribers)
        .map(|i| {
            hub.subscribe(1, CHANNEL, client(i), SubscribeOptions::default())
                .unwrap()
        })
        .collect();
    (hub, subs)
}

/// Benchmark frame encoding.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for size in [64usize, 1024, 65536] {
        let frame = Frame::publish(CHANNEL, vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| codec::encode(black_box(frame)))
        });
    }

    group.finish();
}

/// Benchmark frame decoding.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [64usize, 1024, 65536] {
        let encoded = codec::encode(&Frame::publish(CHANNEL, vec![0u8; size])).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| codec::decode(black_box(encoded)))
        });
    }

    group.finish();
}

/// Benchmark hub operations.
fn bench_hub(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub");

    group.bench_function("subscribe", |b| {
        let hub = Hub::new();
        let mut i = 0usize;
        b.iter(|| {
            let channel = format!("core/broadcast/room{i}");
            i += 1;
            let _ = hub.subscribe(1, &channel, client(i), SubscribeOptions::default());
        });
    });

    group.bench_function("publish_1_sub", |b| {
        let (hub, _subs) = hub_with_subscribers(1);
        let data = Bytes::from(vec![0u8; 64]);
        b.iter(|| hub.publish(1, CHANNEL, black_box(data.clone()), Retention::none()));
    });

    group.bench_function("publish_with_history", |b| {
        let (hub, _subs) = hub_with_subscribers(1);
        let data = Bytes::from(vec![0u8; 64]);
        let retention = Retention {
            size: 100,
            ttl: None,
        };
        b.iter(|| hub.publish(1, CHANNEL, black_box(data.clone()), retention));
    });

    group.finish();
}

/// Benchmark a publish through handler resolution and the handler call.
fn bench_dispatcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher");

    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let registry = Arc::new(
        register_builtin(HandlerRegistry::builder(), ManagedStreamSettings::default()).build(),
    );
    let hub = Arc::new(Hub::new());
    let _sub = hub
        .subscribe(1, CHANNEL, client(0), SubscribeOptions::default())
        .unwrap();
    let dispatcher = Dispatcher::new(registry, hub);
    let ctx = CallContext::new("bench");
    let user = SignedInUser {
        user_id: 1,
        org_id: 1,
        login: "bench".to_string(),
        role: OrgRole::Editor,
    };
    let data = Bytes::from(vec![0u8; 64]);

    group.bench_function("publish", |b| {
        b.iter(|| {
            rt.block_on(dispatcher.publish(&ctx, &user, CHANNEL, black_box(data.clone())))
        });
    });

    group.finish();
}

/// Benchmark fan-out scenarios.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [10usize, 100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let hub = Hub::new();
            let _subs: Vec<_> = (0..size)
                .map(|i| {
                    hub.subscribe(1, CHANNEL, client(i), SubscribeOptions::default())
                        .unwrap()
                })
                .collect();
            let data = Bytes::from(vec![0u8; 64]);

            b.iter(|| hub.publish(1, CHANNEL, black_box(data.clone()), Retention::none()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_hub,
    bench_dispatcher,
    bench_fanout,
);
criterion_main!(benches);
