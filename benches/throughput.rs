//! Throughput Benchmark for sider
//!
//! Measures the store under various workloads and the cost of the request
//! path: framing, grammar and reply encoding.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use sider::commands::parse_command;
use sider::protocol::{frame_len, RespValue};
use sider::storage::{Deadline, SetCondition, SetParams, StorageEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let _ = engine.set(key, Bytes::from("small_value"));
            i += 1;
        });
    });

    group.bench_function("set_large", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(64 * 1024)); // 64KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            let _ = engine.set(key, value.clone());
            i += 1;
        });
    });

    group.bench_function("set_nx_with_deadline", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("ttl:{}", i % 10_000));
            let params = SetParams {
                condition: SetCondition::IfNotExists,
                deadline: Some(Deadline::After(Instant::now() + Duration::from_secs(3600))),
            };
            black_box(engine.set_with(key, Bytes::from("value"), params).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..100_000 {
        let key = Bytes::from(format!("key:{}", i));
        let value = Bytes::from(format!("value:{}", i));
        let _ = engine.set(key, value);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()).ok());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..10_000 {
        let _ = engine.set(Bytes::from(format!("key:{}", i)), Bytes::from("value"));
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                let _ = engine.set(Bytes::from(format!("new:{}", i)), Bytes::from("value"));
            } else {
                let key = format!("key:{}", i % 10_000);
                black_box(engine.get(key.as_bytes()).ok());
            }
            i += 1;
        });
    });

    group.bench_function("del_exists", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let keys = [Bytes::from(format!("key:{}", i % 10_000))];
            black_box(engine.exists_many(&keys).ok());
            black_box(engine.delete_many(&keys).ok());
            let _ = engine.set(keys[0].clone(), Bytes::from("value"));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            let _ = engine.set(key.clone(), Bytes::from("value"));
                            let _ = engine.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.len().ok());
        });
    });

    group.finish();
}

/// Benchmark the request path without the network
fn bench_protocol(c: &mut Criterion) {
    let set = b"*7\r\n$3\r\nSET\r\n$4\r\nuser\r\n$5\r\nalice\r\n$2\r\nPX\r\n$4\r\n1500\r\n$2\r\nNX\r\n$3\r\nGET\r\n";
    let get = b"*2\r\n$3\r\nGET\r\n$4\r\nuser\r\n";

    let mut group = c.benchmark_group("protocol");
    group.throughput(Throughput::Elements(1));

    group.bench_function("frame_len", |b| {
        b.iter(|| black_box(frame_len(black_box(set)).ok()));
    });

    group.bench_function("parse_set_with_options", |b| {
        b.iter(|| black_box(parse_command(black_box(set)).ok()));
    });

    group.bench_function("parse_get", |b| {
        b.iter(|| black_box(parse_command(black_box(get)).ok()));
    });

    group.bench_function("encode_push", |b| {
        let push = RespValue::array(vec![
            RespValue::bulk_string("message"),
            RespValue::bulk_string("topicA"),
            RespValue::bulk_string(Bytes::from("x".repeat(256))),
        ]);
        b.iter(|| black_box(push.serialize()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mixed,
    bench_concurrent,
    bench_protocol,
);

criterion_main!(benches);
