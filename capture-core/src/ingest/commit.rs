//! Batch commit path shared by workers and flushing callers

use std::thread;

use rusqlite::Connection;
use tracing::{debug, error};

use super::{Converter, Entry};
use crate::error::{CaptureError, Result};
use crate::storage::{insert_manipulation, insert_message, Database, RecordTable};

/// Converts, inserts and verifies batches of entries
///
/// Every commit opens its own connection; nothing is shared between threads
/// except the database location.
#[derive(Debug, Clone)]
pub(crate) struct BatchWriter {
    database: Database,
    converter: Converter,
    batch_size: usize,
    verify_max_attempts: usize,
}

impl BatchWriter {
    pub(crate) fn new(
        database: Database,
        converter: Converter,
        batch_size: usize,
        verify_max_attempts: usize,
    ) -> Self {
        Self {
            database,
            converter,
            batch_size: batch_size.max(1),
            verify_max_attempts: verify_max_attempts.max(1),
        }
    }

    /// Persist the batch and prove its first and last entries landed exactly once
    pub(crate) fn commit(&self, entries: Vec<Entry>) -> Result<()> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Ok(());
        };

        let mut connection = self.database.connect()?;
        self.transmit(&mut connection, &entries)?;
        self.verify(&connection, first)?;
        if !std::ptr::eq(first, last) {
            self.verify(&connection, last)?;
        }
        Ok(())
    }

    fn transmit(&self, connection: &mut Connection, entries: &[Entry]) -> Result<()> {
        for (index, chunk) in entries.chunks(self.batch_size).enumerate() {
            if let Err(e) = self.transmit_chunk(connection, chunk) {
                let dropped = unsent_ids(entries, index * self.batch_size);
                error!(
                    error = %e,
                    committed = index * self.batch_size,
                    dropped = ?dropped,
                    "batch commit failed, remaining entries dropped"
                );
                return Err(e);
            }
        }
        debug!(entries = entries.len(), "committed batch");
        Ok(())
    }

    fn transmit_chunk(&self, connection: &mut Connection, chunk: &[Entry]) -> Result<()> {
        let tx = connection.transaction()?;
        for entry in chunk {
            match entry {
                Entry::Message(message) => insert_message(&tx, &self.converter.message(message))?,
                Entry::Manipulation(record) => {
                    insert_manipulation(&tx, &self.converter.manipulation(record))?
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Re-query until the entry is visible once; more than once is fatal
    fn verify(&self, connection: &Connection, entry: &Entry) -> Result<()> {
        let table = match entry {
            Entry::Message(_) => RecordTable::Message,
            Entry::Manipulation(_) => RecordTable::Manipulation,
        };
        let id = entry.id();

        for _ in 0..self.verify_max_attempts {
            match self.database.count_by_id(connection, table, id)? {
                1 => return Ok(()),
                0 => thread::yield_now(),
                _ => {
                    return Err(CaptureError::DuplicateIdentifier { id: id.to_string() });
                }
            }
        }
        Err(CaptureError::MissingIdentifier {
            id: id.to_string(),
            attempts: self.verify_max_attempts,
        })
    }
}

/// Identifiers of the entries from `offset` on, which a failed chunk never stored
fn unsent_ids(entries: &[Entry], offset: usize) -> Vec<String> {
    entries
        .iter()
        .skip(offset)
        .map(|entry| entry.id().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capture::{ManipulationRecord, ManipulationResult};
    use crate::observer::RunObserver;
    use crate::policy::CapturePolicy;

    fn writer(dir: &tempfile::TempDir) -> BatchWriter {
        let database =
            Database::create(dir.path().join("capture.sqlite"), Duration::from_secs(1)).unwrap();
        let converter = Converter::new(
            Arc::new(CapturePolicy::default()),
            Arc::new(RunObserver::new()),
        )
        .unwrap();
        BatchWriter::new(database, converter, 2, 10)
    }

    fn manipulation(name: &str) -> Entry {
        Entry::Manipulation(ManipulationRecord::new(
            0,
            1,
            ManipulationResult::Success,
            name,
            vec![("handle".to_string(), "h1".to_string())],
        ))
    }

    #[test]
    fn test_commit_spans_several_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(&dir);
        let entries: Vec<Entry> = (0..5).map(|i| manipulation(&format!("m{}", i))).collect();

        writer.commit(entries).unwrap();

        let connection = writer.database.connect().unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM manipulation_parameter", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        writer(&dir).commit(Vec::new()).unwrap();
    }

    #[test]
    fn test_duplicate_commit_detected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(&dir);
        let entry = manipulation("setComponentActivation");

        writer.commit(vec![entry.clone()]).unwrap();
        let err = writer.commit(vec![entry]).unwrap_err();
        assert!(matches!(err, CaptureError::DuplicateIdentifier { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_failed_chunk_keeps_earlier_chunks_and_names_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(&dir);
        writer
            .database
            .connect()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_rejected BEFORE INSERT ON manipulation_data \
                 WHEN NEW.method_name = 'rejected' BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let entries = vec![
            manipulation("m0"),
            manipulation("m1"),
            manipulation("m2"),
            manipulation("rejected"),
            manipulation("m4"),
        ];
        let expected: Vec<String> = entries[2..].iter().map(|e| e.id().to_string()).collect();
        assert_eq!(unsent_ids(&entries, 2), expected);

        let err = writer.commit(entries).unwrap_err();
        assert!(matches!(err, CaptureError::Storage(_)), "{:?}", err);

        let connection = writer.database.connect().unwrap();
        let mut names: Vec<String> = connection
            .prepare("SELECT method_name FROM manipulation_data ORDER BY inc_id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["m0", "m1"]);
    }
}
