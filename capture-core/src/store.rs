//! The message store
//!
//! One [`MessageStore`] is created per test run and handed to every
//! collaborator that captures traffic or performs manipulations. It owns the
//! ingestion queue, the worker pool and the capture database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::capture::{
    CaptureBuffer, Direction, ManipulationRecord, ManipulationResult, MessageType,
    TransportContext,
};
use crate::config::StoreConfig;
use crate::error::{CaptureError, Result};
use crate::ingest::{BatchWriter, Converter, Entry, FlushCoordinator, Intake, Worker, WorkerSettings};
use crate::observer::RunObserver;
use crate::query::QueryLayer;
use crate::storage::Database;

/// Capture sink and query entry point of a test run
///
/// ```no_run
/// use capture_core::{Direction, MessageStore, MessageType, StoreConfig, TransportContext};
/// use std::io::Write;
///
/// let store = MessageStore::open(StoreConfig::new("capture.sqlite"))?;
/// let mut capture = store.open_capture(
///     Direction::Inbound,
///     MessageType::Request,
///     TransportContext::udp(),
/// )?;
/// capture.write_all(b"<s12:Envelope/>")?;
/// capture.close()?;
///
/// store.flush()?;
/// assert!(store.queries().inbound_messages()?.objects_present());
/// store.close()?;
/// # Ok::<(), capture_core::CaptureError>(())
/// ```
pub struct MessageStore {
    config: StoreConfig,
    intake: Arc<Intake>,
    receiver: Receiver<Entry>,
    writer: BatchWriter,
    flush: Arc<FlushCoordinator>,
    stop: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    observer: Arc<RunObserver>,
    queries: QueryLayer,
    queries_closed: Arc<AtomicBool>,
}

impl MessageStore {
    /// Create the database and start the worker pool
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_observer(config, Arc::new(RunObserver::new()))
    }

    /// Like [`open`](MessageStore::open), reporting into an existing observer
    pub fn open_with_observer(config: StoreConfig, observer: Arc<RunObserver>) -> Result<Self> {
        config.validate()?;

        let policy = Arc::new(config.policy.clone());
        let database = Database::create(&config.database_path, config.busy_timeout())?;
        let (intake, receiver) = Intake::new(config.queue_capacity, Arc::clone(&observer));
        let converter = Converter::new(Arc::clone(&policy), Arc::clone(&observer))?;
        let writer = BatchWriter::new(
            database.clone(),
            converter,
            config.insert_batch_size,
            config.verify_max_attempts,
        );

        let worker_count = config.effective_worker_count();
        let flush = Arc::new(FlushCoordinator::new(worker_count));
        let stop = Arc::new(AtomicBool::new(false));
        let settings = WorkerSettings {
            capacity: config.queue_capacity,
            poll_interval: config.poll_interval(),
        };

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker = Worker::new(
                index,
                receiver.clone(),
                writer.clone(),
                Arc::clone(&flush),
                Arc::clone(&stop),
                Arc::clone(&observer),
                settings.clone(),
            );
            match worker.spawn() {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    stop.store(true, Ordering::Release);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(CaptureError::Io(e));
                }
            }
        }

        let queries_closed = Arc::new(AtomicBool::new(false));
        let queries = QueryLayer::new(
            database,
            policy,
            Arc::clone(&observer),
            config.fetch_size,
            Arc::clone(&queries_closed),
        );

        info!(
            path = %config.database_path.display(),
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "message store opened"
        );

        Ok(Self {
            config,
            intake: Arc::new(intake),
            receiver,
            writer,
            flush,
            stop,
            workers: Mutex::new(workers),
            observer,
            queries,
            queries_closed,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn observer(&self) -> &Arc<RunObserver> {
        &self.observer
    }

    pub fn queries(&self) -> &QueryLayer {
        &self.queries
    }

    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }

    /// Open a buffer for one wire message
    pub fn open_capture(
        &self,
        direction: Direction,
        message_type: MessageType,
        context: TransportContext,
    ) -> Result<CaptureBuffer> {
        if self.intake.is_closed() {
            let err = CaptureError::UsedAfterClose {
                operation: "open_capture",
            };
            error!("{}", err);
            return Err(err);
        }
        Ok(CaptureBuffer::new(
            direction,
            message_type,
            context,
            Arc::clone(&self.intake),
        ))
    }

    /// Enqueue a manipulation record
    pub fn add_manipulation(&self, record: ManipulationRecord) -> Result<()> {
        self.intake
            .submit(Entry::Manipulation(record), "add_manipulation")
    }

    /// Build and enqueue a manipulation record, returning its id
    pub fn record_manipulation(
        &self,
        start_timestamp: i64,
        finish_timestamp: i64,
        result: ManipulationResult,
        method_name: impl Into<String>,
        parameters: Vec<(String, String)>,
    ) -> Result<Uuid> {
        let record = ManipulationRecord::new(
            start_timestamp,
            finish_timestamp,
            result,
            method_name,
            parameters,
        );
        let id = record.id();
        self.add_manipulation(record)?;
        Ok(id)
    }

    /// Block until everything accepted so far is committed
    pub fn flush(&self) -> Result<()> {
        let _serial = self.flush.lock();
        if self.intake.is_closed() {
            let err = CaptureError::UsedAfterClose { operation: "flush" };
            error!("{}", err);
            return Err(err);
        }
        self.flush_round()
    }

    /// One rendezvous with the worker pool; the caller holds the flush lock
    fn flush_round(&self) -> Result<()> {
        if let Some(index) = self.workers.lock().iter().position(|h| h.is_finished()) {
            let err = CaptureError::BarrierBroken {
                reason: format!("persistence worker {} is no longer running", index),
            };
            self.observer.invalidate_with("flush could not rendezvous", &err);
            return Err(err);
        }

        let round = self.flush.request();
        let drained: Vec<Entry> = self
            .receiver
            .try_iter()
            .take(self.config.queue_capacity)
            .collect();
        debug!(round, drained = drained.len(), "waiting for workers");
        self.flush.arrive();

        let mut failures = self.flush.take_failures();
        if let Err(e) = self.writer.commit(drained) {
            failures.push(e);
        }
        for failure in &failures {
            self.observer.invalidate_with("flush failed", failure);
        }
        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => {
                debug!(round, "flush completed");
                Ok(())
            }
        }
    }

    /// Reject new submissions, flush, stop the workers
    ///
    /// Closing an already closed store only logs.
    pub fn close(&self) -> Result<()> {
        let Some(_closing) = self.intake.close() else {
            debug!("close called on already closed storage");
            return Ok(());
        };

        let flushed = {
            let _serial = self.flush.lock();
            self.flush_round()
        };

        self.stop.store(true, Ordering::Release);
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                self.observer.invalidate("a persistence worker panicked");
            }
        }
        self.queries_closed.store(true, Ordering::Release);

        info!(path = %self.config.database_path.display(), "message store closed");
        flushed
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        if !self.intake.is_closed() {
            if let Err(e) = self.close() {
                error!(error = %e, "closing dropped message store failed");
            }
        }
    }
}

impl std::fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStore")
            .field("database", &self.config.database_path)
            .field("closed", &self.is_closed())
            .finish()
    }
}
