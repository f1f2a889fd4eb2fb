//! Retrieval of persisted messages and manipulations
//!
//! Every query returns a [`QueryResult`]: a presence flag evaluated eagerly
//! with a single `EXISTS` probe, and a lazy record stream over a connection
//! of its own. The named queries are shorthands for composed
//! [`MessageFilter`]s and [`ManipulationFilter`]s.

mod cursor;
mod filter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::capture::{Direction, MessageType};
use crate::error::{CaptureError, Result};
use crate::observer::RunObserver;
use crate::policy::{CapturePolicy, QName};
use crate::storage::{load_manipulation, load_message, Database, PersistedManipulation, PersistedMessage};

pub use cursor::QueryResult;
pub use filter::{ManipulationFilter, MessageFilter};

/// Read access to a capture database
#[derive(Debug, Clone)]
pub struct QueryLayer {
    database: Database,
    policy: Arc<CapturePolicy>,
    observer: Arc<RunObserver>,
    fetch_size: usize,
    closed: Arc<AtomicBool>,
}

impl QueryLayer {
    pub(crate) fn new(
        database: Database,
        policy: Arc<CapturePolicy>,
        observer: Arc<RunObserver>,
        fetch_size: usize,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            database,
            policy,
            observer,
            fetch_size,
            closed,
        }
    }

    /// Query a database written by an earlier run
    pub fn open_existing(
        path: impl AsRef<std::path::Path>,
        policy: CapturePolicy,
        fetch_size: usize,
        busy_timeout: Duration,
    ) -> Result<Self> {
        let database = Database::open_existing(path, busy_timeout)?;
        Ok(Self::new(
            database,
            Arc::new(policy),
            Arc::new(RunObserver::new()),
            fetch_size,
            Arc::new(AtomicBool::new(false)),
        ))
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    fn ensure_open(&self, operation: &'static str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            let err = CaptureError::UsedAfterClose { operation };
            error!("{}", err);
            return Err(err);
        }
        Ok(())
    }

    /// Reject version ordering over elements that carry no version
    fn ensure_sortable(&self, body_types: &[QName]) -> Result<()> {
        if let Some(name) = body_types.iter().find(|n| !self.policy.is_version_bearing(n)) {
            let err = CaptureError::UnsupportedBodyElement {
                name: name.to_string(),
            };
            self.observer.invalidate(err.to_string());
            return Err(err);
        }
        Ok(())
    }

    /// Messages matching a composed filter
    pub fn messages(&self, filter: &MessageFilter) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("messages")?;
        self.run_messages(filter)
    }

    /// Manipulations matching a composed filter, ascending by start timestamp
    pub fn manipulations(
        &self,
        filter: &ManipulationFilter,
    ) -> Result<QueryResult<PersistedManipulation>> {
        self.ensure_open("manipulations")?;
        self.run_manipulations(filter)
    }

    fn run_messages(&self, filter: &MessageFilter) -> Result<QueryResult<PersistedMessage>> {
        QueryResult::open(
            self.database.connect()?,
            filter.selection(),
            filter.presence(),
            self.fetch_size,
            load_message,
        )
    }

    fn run_manipulations(
        &self,
        filter: &ManipulationFilter,
    ) -> Result<QueryResult<PersistedManipulation>> {
        QueryResult::open(
            self.database.connect()?,
            filter.selection(),
            filter.presence(),
            self.fetch_size,
            load_manipulation,
        )
    }

    /// Distinct sequence ids seen in any version group
    pub fn unique_sequence_ids(&self) -> Result<Vec<String>> {
        self.ensure_open("unique_sequence_ids")?;
        let connection = self.database.connect()?;
        let mut statement = connection.prepare(
            "SELECT DISTINCT sequence_id FROM version_group \
             WHERE sequence_id IS NOT NULL ORDER BY sequence_id",
        )?;
        let ids = statement
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    pub fn inbound_messages(&self) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_messages")?;
        self.run_messages(&MessageFilter::new().direction(Direction::Inbound))
    }

    pub fn outbound_messages(&self) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("outbound_messages")?;
        self.run_messages(&MessageFilter::new().direction(Direction::Outbound))
    }

    /// Inbound messages with an envelope or a SOAP content type
    pub fn inbound_soap_messages(&self) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_soap_messages")?;
        self.run_messages(&MessageFilter::new().direction(Direction::Inbound).soap())
    }

    pub fn inbound_soap_response_messages(&self) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_soap_response_messages")?;
        self.run_messages(
            &MessageFilter::new()
                .direction(Direction::Inbound)
                .message_type(MessageType::Response)
                .soap(),
        )
    }

    /// Outbound HTTP messages with one of `body_types` and any of `headers`
    pub fn outbound_http_messages_by_body_type_and_headers(
        &self,
        body_types: &[QName],
        headers: &[(String, String)],
    ) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("outbound_http_messages_by_body_type_and_headers")?;
        self.run_messages(
            &MessageFilter::new()
                .direction(Direction::Outbound)
                .http()
                .body_elements(body_types.iter().cloned())
                .headers(headers.iter().cloned()),
        )
    }

    /// Inbound messages carried over HTTP or HTTPS
    pub fn inbound_http_messages(&self) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_http_messages")?;
        self.run_messages(&MessageFilter::new().direction(Direction::Inbound).http())
    }

    /// Inbound messages with one of `body_types` in `sequence_id`, by ascending version
    pub fn inbound_messages_by_body_type_and_sequence_id(
        &self,
        sequence_id: &str,
        body_types: &[QName],
    ) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_messages_by_body_type_and_sequence_id")?;
        self.ensure_sortable(body_types)?;
        self.run_messages(
            &MessageFilter::new()
                .direction(Direction::Inbound)
                .body_elements(body_types.iter().cloned())
                .sequence_id(sequence_id)
                .ordered_by_version(),
        )
    }

    /// Inbound messages with one of `body_types`
    ///
    /// With `enable_sorting` the messages ascend by version, which requires
    /// every name to be version-bearing.
    pub fn inbound_messages_by_body_type(
        &self,
        enable_sorting: bool,
        body_types: &[QName],
    ) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_messages_by_body_type")?;
        let mut filter = MessageFilter::new()
            .direction(Direction::Inbound)
            .body_elements(body_types.iter().cloned());
        if enable_sorting {
            self.ensure_sortable(body_types)?;
            filter = filter.ordered_by_version();
        }
        self.run_messages(&filter)
    }

    /// Inbound messages with one of `body_types` whose monotonic timestamp
    /// lies within `[start, finish]`, by ascending version
    pub fn inbound_messages_by_time_interval_and_body_type(
        &self,
        start: i64,
        finish: i64,
        body_types: &[QName],
    ) -> Result<QueryResult<PersistedMessage>> {
        self.ensure_open("inbound_messages_by_time_interval_and_body_type")?;
        self.ensure_sortable(body_types)?;
        self.run_messages(
            &MessageFilter::new()
                .direction(Direction::Inbound)
                .body_elements(body_types.iter().cloned())
                .between(start, finish)
                .ordered_by_version(),
        )
    }

    pub fn manipulation_data(&self) -> Result<QueryResult<PersistedManipulation>> {
        self.ensure_open("manipulation_data")?;
        self.run_manipulations(&ManipulationFilter::new())
    }

    /// Manipulations performed through any of `names`; no names match all
    pub fn manipulation_data_by_manipulation(
        &self,
        names: &[&str],
    ) -> Result<QueryResult<PersistedManipulation>> {
        self.ensure_open("manipulation_data_by_manipulation")?;
        self.run_manipulations(&ManipulationFilter::new().methods(names.iter().copied()))
    }

    /// Manipulations of `name` carrying every pair in `parameters`
    pub fn manipulation_data_by_parameters_and_manipulation(
        &self,
        parameters: &[(String, String)],
        name: &str,
    ) -> Result<QueryResult<PersistedManipulation>> {
        self.ensure_open("manipulation_data_by_parameters_and_manipulation")?;
        let mut filter = ManipulationFilter::new().method(name);
        for (key, value) in parameters {
            filter = filter.parameter(key.clone(), value.clone());
        }
        self.run_manipulations(&filter)
    }
}
