//! Pool-wide space and memory admission control.

use crate::pool::txg::TxgListener;
use crate::types::{TxgId, TXG_SIZE};
use parking_lot::{Condvar, Mutex};

/// Worst-case resources a transaction asks for at assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceRequest {
    /// Dirty buffers the transaction may pin in memory.
    pub memory: u64,
    /// Allocated bytes the transaction may write.
    pub write: u64,
    /// Allocated bytes the transaction may free.
    pub free: u64,
    /// Allocated bytes the transaction may unreference.
    pub unref: u64,
}

/// Space reserved for an assigned transaction.
///
/// Must be handed back through [`SpaceAdmission::release`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    request: SpaceRequest,
}

impl Reservation {
    /// What was reserved.
    #[must_use]
    pub fn request(&self) -> &SpaceRequest {
        &self.request
    }
}

/// Why a reservation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Space held by in-flight groups may come back; wait and retry.
    Retry,
    /// The request cannot be satisfied no matter how long the caller waits.
    Exhausted {
        /// Bytes requested.
        requested: u64,
        /// Bytes the pool could provide.
        available: u64,
    },
}

/// Admission control collaborator.
pub trait SpaceAdmission: Send + Sync {
    /// Tries to reserve `request`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Retry`] when space is temporarily short and
    /// [`AdmissionError::Exhausted`] when the request can never fit.
    fn reserve(&self, request: &SpaceRequest) -> Result<Reservation, AdmissionError>;

    /// Releases a reservation. With `consumed_in` set, the written bytes stay
    /// accounted as dirty data of that group until it syncs.
    fn release(&self, reservation: Reservation, consumed_in: Option<TxgId>);

    /// Blocks until space may have been returned since the last refusal.
    fn wait_for_space(&self);
}

#[derive(Debug)]
struct BudgetState {
    capacity: u64,
    used: u64,
    memory_limit: u64,
    pending_write: u64,
    pending_memory: u64,
    dirty: [u64; TXG_SIZE],
    generation: u64,
    refused_at: u64,
}

impl BudgetState {
    fn in_flight(&self) -> u64 {
        self.pending_write + self.dirty.iter().sum::<u64>()
    }
}

/// Reference [`SpaceAdmission`]: one mutex-guarded counter for the pool.
///
/// Estimates are reserved as *pending* until the transaction commits,
/// then stay *dirty* in their group until it syncs. Actual usage is
/// reported separately through [`SpaceBudget::charge`] and
/// [`SpaceBudget::credit`].
#[derive(Debug)]
pub struct SpaceBudget {
    state: Mutex<BudgetState>,
    returned: Condvar,
}

impl SpaceBudget {
    /// Creates a budget of `capacity` bytes with an equal memory limit.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_memory_limit(capacity, capacity)
    }

    /// Creates a budget with an explicit dirty memory limit.
    #[must_use]
    pub fn with_memory_limit(capacity: u64, memory_limit: u64) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                capacity,
                used: 0,
                memory_limit,
                pending_write: 0,
                pending_memory: 0,
                dirty: [0; TXG_SIZE],
                generation: 0,
                refused_at: 0,
            }),
            returned: Condvar::new(),
        }
    }

    /// Records bytes actually allocated by a sync.
    pub fn charge(&self, bytes: u64) {
        self.state.lock().used += bytes;
    }

    /// Records bytes actually freed by a sync and wakes space waiters.
    pub fn credit(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_sub(bytes);
        self.bump(&mut state);
    }

    /// Bytes charged and not yet credited.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.state.lock().used
    }

    /// Bytes reserved by assigned transactions that have not committed.
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.state.lock().pending_write
    }

    /// Bytes reserved by committed transactions of `txg` that has not synced.
    #[must_use]
    pub fn dirty(&self, txg: TxgId) -> u64 {
        self.state.lock().dirty[txg.slot()]
    }

    fn bump(&self, state: &mut BudgetState) {
        state.generation += 1;
        self.returned.notify_all();
    }
}

impl SpaceAdmission for SpaceBudget {
    fn reserve(&self, request: &SpaceRequest) -> Result<Reservation, AdmissionError> {
        let mut state = self.state.lock();

        if request.memory > state.memory_limit {
            return Err(AdmissionError::Exhausted {
                requested: request.memory,
                available: state.memory_limit,
            });
        }
        if state.pending_memory + request.memory > state.memory_limit {
            state.refused_at = state.generation;
            return Err(AdmissionError::Retry);
        }

        // A transaction that frees at least as much as it writes is always let in.
        if request.free < request.write {
            if request.write > state.capacity {
                return Err(AdmissionError::Exhausted {
                    requested: request.write,
                    available: state.capacity,
                });
            }
            if state.used + state.in_flight() + request.write > state.capacity {
                if state.in_flight() == 0 {
                    return Err(AdmissionError::Exhausted {
                        requested: request.write,
                        available: state.capacity.saturating_sub(state.used),
                    });
                }
                state.refused_at = state.generation;
                return Err(AdmissionError::Retry);
            }
        }

        state.pending_write += request.write;
        state.pending_memory += request.memory;
        Ok(Reservation { request: *request })
    }

    fn release(&self, reservation: Reservation, consumed_in: Option<TxgId>) {
        let request = reservation.request;
        let mut state = self.state.lock();
        state.pending_write -= request.write;
        state.pending_memory -= request.memory;
        if let Some(txg) = consumed_in {
            state.dirty[txg.slot()] += request.write;
        }
        self.bump(&mut state);
    }

    fn wait_for_space(&self) {
        let mut state = self.state.lock();
        while state.generation == state.refused_at {
            self.returned.wait(&mut state);
        }
    }
}

impl TxgListener for SpaceBudget {
    fn txg_synced(&self, txg: TxgId) {
        let mut state = self.state.lock();
        state.dirty[txg.slot()] = 0;
        self.bump(&mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn write(bytes: u64) -> SpaceRequest {
        SpaceRequest {
            write: bytes,
            ..SpaceRequest::default()
        }
    }

    #[test]
    fn reserve_and_release_into_dirty() {
        let budget = SpaceBudget::new(1000);
        let res = budget.reserve(&write(400)).unwrap();
        assert_eq!(budget.pending(), 400);

        budget.release(res, Some(TxgId::new(3)));
        assert_eq!(budget.pending(), 0);
        assert_eq!(budget.dirty(TxgId::new(3)), 400);

        budget.txg_synced(TxgId::new(3));
        assert_eq!(budget.dirty(TxgId::new(3)), 0);
    }

    #[test]
    fn abort_releases_without_dirtying() {
        let budget = SpaceBudget::new(1000);
        let res = budget.reserve(&write(400)).unwrap();
        budget.release(res, None);
        assert_eq!(budget.pending(), 0);
        assert_eq!(budget.dirty(TxgId::new(1)), 0);
    }

    #[test]
    fn in_flight_space_forces_retry() {
        let budget = SpaceBudget::new(1000);
        let _held = budget.reserve(&write(700)).unwrap();
        assert_eq!(budget.reserve(&write(400)), Err(AdmissionError::Retry));
    }

    #[test]
    fn oversized_request_is_exhausted() {
        let budget = SpaceBudget::new(1000);
        assert_eq!(
            budget.reserve(&write(1001)),
            Err(AdmissionError::Exhausted {
                requested: 1001,
                available: 1000
            })
        );

        budget.charge(900);
        assert_eq!(
            budget.reserve(&write(200)),
            Err(AdmissionError::Exhausted {
                requested: 200,
                available: 100
            })
        );
    }

    #[test]
    fn net_free_is_always_admitted() {
        let budget = SpaceBudget::new(1000);
        budget.charge(1000);
        let request = SpaceRequest {
            write: 100,
            free: 500,
            ..SpaceRequest::default()
        };
        assert!(budget.reserve(&request).is_ok());
    }

    #[test]
    fn memory_limit_is_enforced() {
        let budget = SpaceBudget::with_memory_limit(1 << 30, 100);
        let mem = |memory| SpaceRequest {
            memory,
            ..SpaceRequest::default()
        };
        assert!(matches!(
            budget.reserve(&mem(101)),
            Err(AdmissionError::Exhausted { .. })
        ));
        let _held = budget.reserve(&mem(60)).unwrap();
        assert_eq!(budget.reserve(&mem(60)), Err(AdmissionError::Retry));
    }

    #[test]
    fn wait_for_space_wakes_on_sync() {
        let budget = Arc::new(SpaceBudget::new(1000));
        let held = budget.reserve(&write(900)).unwrap();
        assert_eq!(budget.reserve(&write(200)), Err(AdmissionError::Retry));

        let waiter = {
            let budget = Arc::clone(&budget);
            thread::spawn(move || loop {
                budget.wait_for_space();
                if budget.reserve(&write(200)).is_ok() {
                    return true;
                }
            })
        };
        budget.release(held, Some(TxgId::new(1)));
        budget.txg_synced(TxgId::new(1));
        assert!(waiter.join().unwrap());
    }
}
