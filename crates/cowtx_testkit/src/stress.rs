//! Stress tests for the transaction and intent log paths.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::TestPool;
use cowtx_core::{CommitOutcome, Config, ObjectId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
    /// Slowest single operation.
    pub max_latency: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
            max_latency: Duration::ZERO,
        }
    }

    fn with_latencies(mut self, latencies: &[Duration]) -> Self {
        self.max_latency = latencies.iter().copied().max().unwrap_or_default();
        self
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
        println!("Max latency: {:?}", self.max_latency);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads.
    pub threads: usize,
    /// Size of each write in bytes.
    pub write_size: usize,
    /// Every how many writes a thread commits its file.
    pub fsync_every: usize,
    /// Interval of the background sync thread.
    pub sync_interval: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            write_size: 256,
            fsync_every: 8,
            sync_interval: Duration::from_millis(20),
        }
    }
}

fn run_threads<F>(config: &StressConfig, op: F) -> StressTestResult
where
    F: Fn(usize, usize) -> bool + Send + Sync + 'static,
{
    let op = Arc::new(op);
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let latencies = Arc::new(Mutex::new(Vec::with_capacity(config.operations)));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let op = Arc::clone(&op);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let latencies = Arc::clone(&latencies);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let started = Instant::now();
                    if op(t, i) {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                    latencies.lock().push(started.elapsed());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let latencies = latencies.lock();
    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
    .with_latencies(&latencies)
}

fn create_files(pool: &TestPool, count: usize) -> Vec<ObjectId> {
    (0..count)
        .map(|i| pool.create(&format!("stress{i}")).expect("Failed to create file"))
        .collect()
}

/// Each thread writes its own file and commits it every
/// `fsync_every` writes.
pub fn stress_concurrent_writers(pool: Arc<TestPool>, config: &StressConfig) -> StressTestResult {
    pool.start_sync_thread(config.sync_interval);
    let files = Arc::new(create_files(&pool, config.threads));
    let data = Arc::new(vec![0xABu8; config.write_size]);
    let write_size = config.write_size as u64;
    let fsync_every = config.fsync_every.max(1);

    run_threads(config, move |t, i| {
        let file = files[t];
        let offset = (i as u64 % 64) * write_size;
        let sync = i % fsync_every == 0;
        if pool.write(file, offset, &data, sync).is_err() {
            return false;
        }
        if (i + 1) % fsync_every == 0 {
            return pool.fsync(file).is_ok();
        }
        true
    })
}

/// All threads write the same object, so most assignments find it held
/// by a transaction of the previous group and have to wait.
pub fn stress_conflicting_holds(pool: Arc<TestPool>, config: &StressConfig) -> StressTestResult {
    pool.start_sync_thread(config.sync_interval);
    let file = create_files(&pool, 1)[0];
    let data = Arc::new(vec![0xCDu8; config.write_size]);
    let write_size = config.write_size as u64;

    run_threads(config, move |t, i| {
        let offset = ((t * 31 + i) as u64 % 128) * write_size;
        pool.write(file, offset, &data, false).is_ok()
    })
}

/// All threads write and commit the same file; concurrent commits should
/// share writer runs.
pub fn stress_commit_coalescing(pool: Arc<TestPool>, config: &StressConfig) -> StressTestResult {
    let file = create_files(&pool, 1)[0];
    let data = Arc::new(vec![0xEFu8; config.write_size]);
    let write_size = config.write_size as u64;

    run_threads(config, move |t, i| {
        let offset = ((t * 17 + i) as u64 % 256) * write_size;
        if pool.write(file, offset, &data, true).is_err() {
            return false;
        }
        matches!(
            pool.fsync(file),
            Ok(CommitOutcome::Durable { .. } | CommitOutcome::AlreadyStable)
        )
    })
}

/// A pool for stress runs.
pub fn stress_pool(config: Config) -> Arc<TestPool> {
    Arc::new(TestPool::with_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_small_config() -> StressConfig {
        StressConfig {
            operations: 400,
            threads: 4,
            write_size: 512,
            ..Default::default()
        }
    }

    #[test]
    fn test_concurrent_writers() {
        let pool = stress_pool(Config::default());
        let config = create_small_config();

        let result = stress_concurrent_writers(Arc::clone(&pool), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, 400);
        assert!(pool.log.stats().snapshot().commits > 0);
        pool.shutdown();
    }

    #[test]
    fn test_conflicting_holds() {
        let pool = stress_pool(Config::default());
        let config = create_small_config();

        let result = stress_conflicting_holds(Arc::clone(&pool), &config);
        assert_eq!(result.failed_ops, 0);
        let tx = pool.transactions().stats().snapshot();
        assert!(tx.committed >= 400);
        pool.shutdown();
    }

    #[test]
    fn test_commit_coalescing() {
        let pool = stress_pool(Config::default());
        let config = StressConfig {
            operations: 200,
            threads: 8,
            write_size: 128,
            ..Default::default()
        };

        let result = stress_commit_coalescing(Arc::clone(&pool), &config);
        assert_eq!(result.failed_ops, 0);

        let stats = pool.log.stats().snapshot();
        assert_eq!(stats.commits, 200);
        assert!(stats.writer_runs <= stats.commits);
    }
}
