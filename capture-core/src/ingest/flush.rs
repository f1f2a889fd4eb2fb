//! Barrier-based flush rendezvous
//!
//! A flush is a numbered round. The caller bumps the round counter, drains the
//! queue, then waits at a barrier sized for every worker plus itself. A worker
//! that notices a round it has not served yet commits its local batch and
//! joins the barrier. Workers remember the last round they served, so nothing
//! has to be reset after a round completes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Barrier;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::error::CaptureError;

#[derive(Debug)]
pub(crate) struct FlushCoordinator {
    round: AtomicU64,
    barrier: Barrier,
    failures: Mutex<Vec<CaptureError>>,
    serial: Mutex<()>,
}

impl FlushCoordinator {
    /// Coordinator for `workers` workers and one flushing caller
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            round: AtomicU64::new(0),
            barrier: Barrier::new(workers + 1),
            failures: Mutex::new(Vec::new()),
            serial: Mutex::new(()),
        }
    }

    /// Serialise flushing callers; hold the guard for the whole flush
    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.serial.lock()
    }

    /// Open a new round and return its number
    pub(crate) fn request(&self) -> u64 {
        let round = self.round.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(round, "flush requested");
        round
    }

    /// Most recently requested round
    pub(crate) fn current_round(&self) -> u64 {
        self.round.load(Ordering::Acquire)
    }

    /// Wait until every party of the current round has arrived
    pub(crate) fn arrive(&self) {
        self.barrier.wait();
    }

    /// Record a worker-side failure to be reported by the flushing caller
    pub(crate) fn record_failure(&self, error: CaptureError) {
        self.failures.lock().push(error);
    }

    pub(crate) fn take_failures(&self) -> Vec<CaptureError> {
        std::mem::take(&mut *self.failures.lock())
    }
}
