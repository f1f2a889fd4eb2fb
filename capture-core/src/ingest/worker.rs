//! Persistence workers
//!
//! Each worker polls the shared queue with a short timeout, keeps what it
//! polled in a local batch, and commits the batch when it fills up, when a
//! flush round starts, or when the worker is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error};

use super::{BatchWriter, Entry, FlushCoordinator};
use crate::observer::RunObserver;

/// Settings shared by every worker of a pool
#[derive(Debug, Clone)]
pub(crate) struct WorkerSettings {
    /// Local batch size that forces a commit
    pub capacity: usize,
    pub poll_interval: Duration,
}

pub(crate) struct Worker {
    index: usize,
    receiver: Receiver<Entry>,
    writer: BatchWriter,
    flush: Arc<FlushCoordinator>,
    stop: Arc<AtomicBool>,
    observer: Arc<RunObserver>,
    settings: WorkerSettings,
    served_round: u64,
    batch: Vec<Entry>,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        receiver: Receiver<Entry>,
        writer: BatchWriter,
        flush: Arc<FlushCoordinator>,
        stop: Arc<AtomicBool>,
        observer: Arc<RunObserver>,
        settings: WorkerSettings,
    ) -> Self {
        let served_round = flush.current_round();
        Self {
            index,
            receiver,
            writer,
            flush,
            stop,
            observer,
            batch: Vec::with_capacity(settings.capacity),
            settings,
            served_round,
        }
    }

    /// Start the worker on its own thread
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("capture-worker-{}", self.index))
            .spawn(move || self.run())
    }

    fn run(mut self) {
        debug!(worker = self.index, "worker started");

        while !self.stop.load(Ordering::Acquire) {
            match self.receiver.recv_timeout(self.settings.poll_interval) {
                Ok(entry) => self.batch.push(entry),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    error!(worker = self.index, "the ingestion queue poll was interrupted");
                    self.observer
                        .invalidate("the ingestion queue poll was interrupted: queue disconnected");
                    break;
                }
            }

            let round = self.flush.current_round();
            if round > self.served_round {
                let result = self.commit_batch();
                if let Err(e) = result {
                    self.flush.record_failure(e);
                }
                self.served_round = round;
                self.flush.arrive();
            } else if self.batch.len() >= self.settings.capacity {
                if let Err(e) = self.commit_batch() {
                    self.observer
                        .invalidate_with("unable to commit a full batch", &e);
                }
            }
        }

        if let Err(e) = self.commit_batch() {
            self.observer
                .invalidate_with("unable to commit the remaining batch on shutdown", &e);
        }
        debug!(worker = self.index, "worker stopped");
    }

    fn commit_batch(&mut self) -> crate::error::Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.batch, Vec::with_capacity(self.settings.capacity));
        let size = batch.len();
        let result = self.writer.commit(batch);
        match &result {
            Ok(()) => debug!(worker = self.index, size, "batch committed"),
            Err(e) => error!(worker = self.index, size, error = %e, "batch commit failed"),
        }
        result
    }
}
