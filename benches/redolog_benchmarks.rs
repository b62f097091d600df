// SPDX-License-Identifier: PMPL-1.0-or-later
//! Performance benchmarks for the MailCore redo log and mailbox lock

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mailcore_lock::{LockKind, MailboxLock, OwnerToken};
use mailcore_redolog::{
    LogHeader, LogWriter, LoggedOp, RecordEnvelope, RedoResult, RedoableOp, SyncMode,
    TransactionId, TxnIdGenerator, DEFAULT_MAX_RECORD_SIZE,
};
use mailcore_sequence::{LocalSequenceGenerator, SequenceNumberGenerator};

#[derive(Debug)]
struct BlobOp {
    payload: Vec<u8>,
}

impl RedoableOp for BlobOp {
    fn op_type(&self) -> u16 {
        150
    }
    fn mailbox_id(&self) -> Option<i64> {
        Some(42)
    }
    fn serialize_payload(&self) -> RedoResult<Vec<u8>> {
        Ok(self.payload.clone())
    }
    fn redo(&self) -> RedoResult<()> {
        Ok(())
    }
}

// ============================================================================
// Header Benchmarks
// ============================================================================

fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("header");
    let header = LogHeader::new("mailstore-01.example.com", 12_345, 1_700_000_000_000).unwrap();
    let encoded = header.encode();

    group.bench_function("encode", |b| b.iter(|| black_box(header.encode())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(LogHeader::decode(black_box(&encoded)).unwrap()))
    });
    group.finish();
}

// ============================================================================
// Record Benchmarks
// ============================================================================

fn bench_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("record");
    for size in [64usize, 1024, 16 * 1024] {
        let envelope = RecordEnvelope {
            sequence: 7,
            timestamp: 1_700_000_000_000,
            op_type: 150,
            txn_id: TransactionId::new(1_700_000_000, 1),
            mailbox_id: Some(42),
            server_id: "mailstore-01".into(),
            payload: vec![0xab; size],
        };
        let bytes = envelope.encode(DEFAULT_MAX_RECORD_SIZE).unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", size), &envelope, |b, env| {
            b.iter(|| black_box(env.encode(DEFAULT_MAX_RECORD_SIZE).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| black_box(RecordEnvelope::decode(bytes, 0, DEFAULT_MAX_RECORD_SIZE).unwrap()))
        });
    }
    group.finish();
}

// ============================================================================
// Append Benchmarks
// ============================================================================

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    let op: Arc<dyn RedoableOp> = Arc::new(BlobOp {
        payload: vec![0x5a; 512],
    });

    for (name, mode) in [("async", SyncMode::Async), ("periodic", SyncMode::Periodic { interval_ms: 10 })] {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = LogWriter::create(
            &dir.path().join("redo.log"),
            1,
            "mailstore-01",
            mode,
            DEFAULT_MAX_RECORD_SIZE,
        )
        .unwrap();
        let ids = TxnIdGenerator::new();
        let mut timestamp = 0i64;

        group.bench_function(name, |b| {
            b.iter(|| {
                timestamp += 1;
                let mut logged = LoggedOp::new(ids.next_id(), "mailstore-01", Arc::clone(&op));
                logged.start(timestamp);
                black_box(writer.append(&mut logged).unwrap())
            })
        });
    }
    group.finish();
}

// ============================================================================
// Sequence and Lock Benchmarks
// ============================================================================

fn bench_sequence(c: &mut Criterion) {
    let generator = LocalSequenceGenerator::new();
    c.bench_function("sequence/local_increment", |b| {
        b.iter(|| black_box(generator.increment_sequence().unwrap()))
    });
}

fn bench_lock(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock");
    let lock = MailboxLock::new(42);
    let owner = OwnerToken::new("bench");

    group.bench_function("write_acquire_release", |b| {
        b.iter(|| {
            lock.acquire_as(&owner, LockKind::Write, None).unwrap();
            lock.release_as(&owner, LockKind::Write).unwrap();
        })
    });
    group.bench_function("read_guard", |b| b.iter(|| drop(black_box(lock.read()))));
    group.bench_function("describe", |b| b.iter(|| black_box(lock.describe())));
    group.finish();
}

criterion_group!(
    benches,
    bench_header,
    bench_record,
    bench_append,
    bench_sequence,
    bench_lock
);
criterion_main!(benches);
