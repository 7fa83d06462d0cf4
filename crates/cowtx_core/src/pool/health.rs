//! Pool health: suspension after unrecoverable I/O failures.

use parking_lot::{Condvar, Mutex};

/// What mutators do while the pool is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Block until an administrator resumes the pool.
    #[default]
    Wait,
    /// Fail non-blocking assignments with a hard I/O error.
    Continue,
}

/// Health of the pool as seen by the transaction manager.
pub trait PoolHealth: Send + Sync {
    /// Whether the pool is suspended after an unrecoverable I/O failure.
    fn is_suspended(&self) -> bool;

    /// The configured failure policy.
    fn failure_policy(&self) -> FailurePolicy;

    /// Blocks until the pool is no longer suspended.
    fn wait_resumed(&self);
}

/// Reference [`PoolHealth`] implementation toggled by hand.
#[derive(Debug)]
pub struct PoolStatus {
    suspended: Mutex<bool>,
    resumed: Condvar,
    policy: FailurePolicy,
}

impl PoolStatus {
    /// Creates a healthy pool status.
    #[must_use]
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            suspended: Mutex::new(false),
            resumed: Condvar::new(),
            policy,
        }
    }

    /// Suspends the pool.
    pub fn suspend(&self) {
        *self.suspended.lock() = true;
        tracing::error!(target: "cowtx::tx", "pool suspended");
    }

    /// Resumes the pool and wakes every waiter.
    pub fn resume(&self) {
        let mut suspended = self.suspended.lock();
        if *suspended {
            *suspended = false;
            tracing::info!(target: "cowtx::tx", "pool resumed");
        }
        self.resumed.notify_all();
    }
}

impl Default for PoolStatus {
    fn default() -> Self {
        Self::new(FailurePolicy::default())
    }
}

impl PoolHealth for PoolStatus {
    fn is_suspended(&self) -> bool {
        *self.suspended.lock()
    }

    fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn wait_resumed(&self) {
        let mut suspended = self.suspended.lock();
        while *suspended {
            self.resumed.wait(&mut suspended);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn suspend_and_resume() {
        let status = PoolStatus::new(FailurePolicy::Continue);
        assert!(!status.is_suspended());
        status.suspend();
        assert!(status.is_suspended());
        status.resume();
        assert!(!status.is_suspended());
        assert_eq!(status.failure_policy(), FailurePolicy::Continue);
    }

    #[test]
    fn wait_resumed_blocks_until_resume() {
        let status = Arc::new(PoolStatus::default());
        status.suspend();

        let waiter = {
            let status = Arc::clone(&status);
            thread::spawn(move || status.wait_resumed())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        status.resume();
        waiter.join().unwrap();
    }
}
