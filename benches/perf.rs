use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::{Arc, Barrier};
use std::thread;
use writegate::{ColumnFamilyId, MemSink, WriteBatch, WriteEngine, WriteGroupConfig, WriteOptions};

const CF: ColumnFamilyId = ColumnFamilyId(0);

fn bench_serial_writes(c: &mut Criterion) {
    let engine = WriteEngine::new(WriteGroupConfig::serial_only(), MemSink::new());
    let mut i: u64 = 0;
    c.bench_function("serial_write_1kib", |b| {
        b.iter(|| {
            let mut batch = WriteBatch::new();
            batch.put(CF, i.to_be_bytes().to_vec(), vec![0u8; 1024]);
            i = i.wrapping_add(1);
            black_box(engine.write(batch, WriteOptions::default())).expect("write");
        })
    });
}

fn bench_contended_writes(c: &mut Criterion) {
    c.bench_function("fan_in_4_threads_x_64_writes", |b| {
        b.iter(|| {
            let engine = Arc::new(WriteEngine::new(WriteGroupConfig::default(), MemSink::new()));
            let barrier = Arc::new(Barrier::new(4));
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..64u64 {
                            let mut batch = WriteBatch::new();
                            batch.put(CF, format!("t{t}-k{i}").into_bytes(), vec![0u8; 256]);
                            engine.write(batch, WriteOptions::default()).expect("write");
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("writer thread");
            }
            black_box(engine.sink().ops_applied())
        })
    });
}

criterion_group!(benches, bench_serial_writes, bench_contended_writes);
criterion_main!(benches);
