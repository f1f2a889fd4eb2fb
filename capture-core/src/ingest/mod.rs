//! Ingestion queue and persistence worker pool
//!
//! Producers submit closed captures and manipulation records into one bounded
//! FIFO queue. A fixed pool of [`Worker`]s drains it into local batches, which
//! the [`BatchWriter`] converts and commits. The [`FlushCoordinator`] lets a
//! caller force every accepted entry to disk.

mod commit;
mod convert;
mod flush;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::error;
use uuid::Uuid;

use crate::capture::{CapturedMessage, ManipulationRecord};
use crate::error::{CaptureError, Result};
use crate::observer::RunObserver;

pub(crate) use commit::BatchWriter;
pub(crate) use convert::Converter;
pub(crate) use flush::FlushCoordinator;
pub(crate) use worker::{Worker, WorkerSettings};

/// A unit of work in the ingestion queue
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    Message(Arc<CapturedMessage>),
    Manipulation(ManipulationRecord),
}

impl Entry {
    pub(crate) fn id(&self) -> Uuid {
        match self {
            Entry::Message(message) => message.id(),
            Entry::Manipulation(record) => record.id(),
        }
    }
}

/// Producer side of the ingestion queue
///
/// Submissions hold a shared lifecycle lock; closing takes it exclusively, so
/// no submission can slip in once closing has begun.
#[derive(Debug)]
pub(crate) struct Intake {
    sender: Sender<Entry>,
    closed: AtomicBool,
    lifecycle: RwLock<()>,
    observer: Arc<RunObserver>,
}

impl Intake {
    pub(crate) fn new(capacity: usize, observer: Arc<RunObserver>) -> (Self, Receiver<Entry>) {
        let (sender, receiver) = channel::bounded(capacity);
        let intake = Self {
            sender,
            closed: AtomicBool::new(false),
            lifecycle: RwLock::new(()),
            observer,
        };
        (intake, receiver)
    }

    /// Enqueue an entry, blocking while the queue is full
    pub(crate) fn submit(&self, entry: Entry, operation: &'static str) -> Result<()> {
        let _open = self.lifecycle.read();
        if self.is_closed() {
            let err = CaptureError::UsedAfterClose { operation };
            error!(id = %entry.id(), "{}", err);
            self.observer.invalidate(err.to_string());
            return Err(err);
        }

        self.sender.send(entry).map_err(|_| {
            error!("unable to put entry into queue, all workers are gone");
            self.observer
                .invalidate("unable to put entry into queue: ingestion queue disconnected");
            CaptureError::QueueDisconnected
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the intake closed
    ///
    /// Returns the exclusive lifecycle guard if this call performed the
    /// transition, `None` if the intake was already closed.
    pub(crate) fn close(&self) -> Option<RwLockWriteGuard<'_, ()>> {
        let guard = self.lifecycle.write();
        self.closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ManipulationResult;

    fn manipulation() -> Entry {
        Entry::Manipulation(ManipulationRecord::new(
            1,
            2,
            ManipulationResult::Success,
            "setMetricStatus",
            vec![],
        ))
    }

    #[test]
    fn test_submit_after_close_rejected_and_reported() {
        let observer = Arc::new(RunObserver::new());
        let (intake, receiver) = Intake::new(2, observer.clone());

        intake.submit(manipulation(), "add_manipulation").unwrap();
        assert!(intake.close().is_some());
        assert!(intake.close().is_none());

        let err = intake.submit(manipulation(), "add_manipulation").unwrap_err();
        assert_eq!(err.to_string(), "add_manipulation called on closed storage");
        assert_eq!(observer.reasons(), vec!["add_manipulation called on closed storage"]);
        assert_eq!(receiver.try_iter().count(), 1);
    }

    #[test]
    fn test_submit_without_receiver_is_fatal() {
        let observer = Arc::new(RunObserver::new());
        let (intake, receiver) = Intake::new(2, observer.clone());
        drop(receiver);

        let err = intake.submit(manipulation(), "add_manipulation").unwrap_err();
        assert!(err.is_fatal());
        assert!(observer.is_invalid());
    }
}
