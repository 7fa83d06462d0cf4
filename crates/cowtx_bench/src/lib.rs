//! Benchmark utilities.

use cowtx_core::{
    AssignMode, Config, InMemoryObjectStore, IntentLog, ObjectId, ObjectKind, ObjectStore, Pool,
};
use cowtx_storage::StorageBackend;
use rand::Rng;
use std::sync::Arc;

/// Space given to benchmark pools.
pub const BENCH_CAPACITY: u64 = 1 << 44;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// A pool over an in-memory store with `objects` plain objects, numbered
/// from 1.
pub fn bench_pool(config: Config, objects: u64) -> (Pool, Arc<InMemoryObjectStore>) {
    let store = Arc::new(InMemoryObjectStore::new());
    for id in 1..=objects {
        store.create(ObjectId::new(id), ObjectKind::Plain, config.record_size);
    }
    let pool = Pool::new(config, Arc::clone(&store) as Arc<dyn ObjectStore>, BENCH_CAPACITY);
    (pool, store)
}

/// A pool with one object and an intent log on `device`.
pub fn bench_log(
    config: Config,
    device: Box<dyn StorageBackend>,
) -> (Pool, Arc<InMemoryObjectStore>, Arc<IntentLog>) {
    let (pool, store) = bench_pool(config, 1);
    let log = pool.open_log(device).expect("Failed to open intent log");
    (pool, store, log)
}

/// Writes `data` to `object` at `offset` and logs it.
pub fn logged_write(
    pool: &Pool,
    store: &InMemoryObjectStore,
    log: &IntentLog,
    object: ObjectId,
    offset: u64,
    data: &[u8],
    sync: bool,
) {
    let tm = pool.transactions();
    let mut tx = tm.begin();
    tx.hold_write(object, offset, data.len() as u64).unwrap();
    let txg = tm.assign(&mut tx, AssignMode::Wait).unwrap();
    store.write(object, offset, data, txg).unwrap();
    log.log_write(&tx, object, offset, data.len() as u64, sync)
        .unwrap();
    tm.commit(&mut tx).unwrap();
}
