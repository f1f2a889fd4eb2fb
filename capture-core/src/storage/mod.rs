//! SQLite persistence
//!
//! [`Database`] is the session factory: it owns the file location and the
//! connection settings, and hands out short-lived connections. Writers open one
//! per commit, each query result owns one for its lifetime.

mod records;
mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::error::{CaptureError, Result};

pub use records::{PersistedManipulation, PersistedMessage};
pub(crate) use records::{insert_manipulation, insert_message, load_manipulation, load_message};
pub use schema::SCHEMA_VERSION;

/// Tables holding top-level records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordTable {
    Message,
    Manipulation,
}

impl RecordTable {
    fn count_sql(&self) -> &'static str {
        match self {
            RecordTable::Message => "SELECT COUNT(*) FROM message_content WHERE uuid = ?1",
            RecordTable::Manipulation => "SELECT COUNT(*) FROM manipulation_data WHERE uuid = ?1",
        }
    }
}

/// Location and connection settings of a capture database
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    read_only: bool,
}

impl Database {
    /// Create a fresh database, dropping any previous capture tables at `path`
    pub fn create(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let database = Self {
            path,
            busy_timeout,
            read_only: false,
        };
        let mut connection = database.connect()?;
        connection.execute_batch("PRAGMA journal_mode = WAL;")?;
        let tx = connection.transaction()?;
        tx.execute_batch(schema::DROP_SCHEMA)?;
        tx.execute_batch(schema::CREATE_SCHEMA)?;
        tx.execute(
            "INSERT INTO capture_meta (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        tx.commit()?;

        info!(path = %database.path.display(), "capture database created");
        Ok(database)
    }

    /// Open a database written earlier, without touching its contents
    pub fn open_existing(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CaptureError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("capture database '{}' does not exist", path.display()),
            )));
        }

        let database = Self {
            path,
            busy_timeout,
            read_only: true,
        };
        let connection = database.connect()?;
        let version: Option<i64> = connection
            .query_row("SELECT version FROM capture_meta LIMIT 1", [], |row| row.get(0))
            .optional()?;
        match version {
            Some(SCHEMA_VERSION) => Ok(database),
            other => Err(CaptureError::InvalidConfig {
                reason: format!(
                    "'{}' has schema version {:?}, expected {}",
                    database.path.display(),
                    other,
                    SCHEMA_VERSION
                ),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection with the store's pragmas applied
    pub fn connect(&self) -> Result<Connection> {
        let flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let connection = Connection::open_with_flags(&self.path, flags)?;
        connection.busy_timeout(self.busy_timeout)?;
        if !self.read_only {
            connection.execute_batch("PRAGMA synchronous = NORMAL;")?;
        }
        Ok(connection)
    }

    pub(crate) fn count_by_id(
        &self,
        connection: &Connection,
        table: RecordTable,
        id: Uuid,
    ) -> Result<i64> {
        let mut statement = connection.prepare_cached(table.count_sql())?;
        let count = statement.query_row(params![id.to_string()], |row| row.get(0))?;
        Ok(count)
    }
}
