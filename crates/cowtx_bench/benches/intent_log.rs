//! Intent log benchmarks.

use cowtx_bench::{bench_log, logged_write, random_data};
use cowtx_core::{
    Config, CreateKind, CreateRecord, LogRecord, ObjectId, RecordBody, WriteRecord, WriteState,
};
use cowtx_storage::{FileBackend, InMemoryBackend};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const OBJECT: ObjectId = ObjectId(1);

/// Syncing reclaims the device, so benchmarks that append forever sync
/// every this many iterations.
const SYNC_EVERY: u64 = 1024;

/// Benchmark encoding write records of various sizes.
fn bench_record_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_encode");

    for size in [64usize, 4096, 32 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let record = LogRecord::new(RecordBody::Write(WriteRecord {
                object: OBJECT,
                offset: 0,
                length: size as u64,
                state: WriteState::Copied,
                data: Some(random_data(size).into()),
                block: None,
            }));
            let mut buf = Vec::with_capacity(record.encoded_len());

            b.iter(|| {
                buf.clear();
                record.encode_into(black_box(&mut buf)).unwrap();
                black_box(buf.len());
            });
        });
    }

    group.finish();
}

/// Benchmark decoding a create record.
fn bench_record_decode(c: &mut Criterion) {
    let record = LogRecord::new(RecordBody::Create(CreateRecord {
        kind: CreateKind::File,
        parent: ObjectId::new(2),
        object: OBJECT,
        mode: 0o100_644,
        name: "benchmark-file".to_string(),
        acl: None,
    }));
    let mut buf = Vec::new();
    record.encode_into(&mut buf).unwrap();

    c.bench_function("record_decode", |b| {
        b.iter(|| {
            let decoded = LogRecord::decode(black_box(&buf)).unwrap();
            black_box(decoded);
        });
    });
}

/// Benchmark a synchronous write followed by a commit on an in-memory device.
fn bench_commit_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_memory");

    for size in [256usize, 4096, 64 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (pool, store, log) =
                bench_log(Config::default(), Box::new(InMemoryBackend::new()));
            let data = random_data(size);
            let mut iterations = 0u64;

            b.iter(|| {
                logged_write(&pool, &store, &log, OBJECT, 0, &data, true);
                black_box(log.commit(Some(OBJECT)).unwrap());

                iterations += 1;
                if iterations % SYNC_EVERY == 0 {
                    pool.sync();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark commits that find nothing left to write.
fn bench_commit_already_stable(c: &mut Criterion) {
    let (pool, store, log) = bench_log(Config::default(), Box::new(InMemoryBackend::new()));
    logged_write(&pool, &store, &log, OBJECT, 0, b"stable", true);
    log.commit(Some(OBJECT)).unwrap();

    c.bench_function("commit_already_stable", |b| {
        b.iter(|| {
            black_box(log.commit(black_box(Some(OBJECT))).unwrap());
        });
    });
}

/// Benchmark commits to a file-backed device, including the flush.
fn bench_commit_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_file");
    group.sample_size(20); // Flush is slow

    for size in [256usize, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let temp_dir = TempDir::new().unwrap();
            let path = temp_dir.path().join("intent.log");
            let device = FileBackend::open_with_create_dirs(&path).unwrap();
            let (pool, store, log) = bench_log(Config::default(), Box::new(device));
            let data = random_data(size);
            let mut iterations = 0u64;

            b.iter(|| {
                logged_write(&pool, &store, &log, OBJECT, 0, &data, true);
                black_box(log.commit(Some(OBJECT)).unwrap());

                iterations += 1;
                if iterations % SYNC_EVERY == 0 {
                    pool.sync();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_record_encode,
    bench_record_decode,
    bench_commit_memory,
    bench_commit_already_stable,
    bench_commit_file,
);
criterion_main!(benches);
