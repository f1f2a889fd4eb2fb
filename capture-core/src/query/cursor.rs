//! Lazy, closeable query results

use std::collections::VecDeque;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::trace;

use super::filter::Sql;
use crate::error::Result;

/// Loads one record by its row id
pub(crate) type Loader<T> = fn(&Connection, i64) -> Result<T>;

/// Result of a query: an eager presence flag and a lazy record stream
///
/// Rows are fetched in pages of `fetch_size` row ids using keyset pagination
/// over `(sort_key, inc_id)`, and each record is loaded only when the iterator
/// reaches it. Nothing already yielded stays in memory. The result owns its
/// own connection, which [`close`](QueryResult::close) releases; dropping the
/// result closes it as well.
pub struct QueryResult<T> {
    objects_present: bool,
    cursor: Option<Cursor<T>>,
}

struct Cursor<T> {
    connection: Connection,
    page_sql: String,
    params: Vec<Value>,
    fetch_size: i64,
    last_key: (i64, i64),
    page: VecDeque<(i64, i64)>,
    exhausted: bool,
    load: Loader<T>,
}

impl<T> QueryResult<T> {
    pub(crate) fn open(
        connection: Connection,
        selection: Sql,
        presence: Sql,
        fetch_size: usize,
        load: Loader<T>,
    ) -> Result<Self> {
        let objects_present: bool = connection.query_row(
            &presence.text,
            params_from_iter(presence.params.iter()),
            |row| row.get(0),
        )?;

        let page_sql = format!(
            "SELECT inc_id, sort_key FROM ({}) \
             WHERE sort_key > ? OR (sort_key = ? AND inc_id > ?) \
             ORDER BY sort_key, inc_id LIMIT ?",
            selection.text
        );

        Ok(Self {
            objects_present,
            cursor: Some(Cursor {
                connection,
                page_sql,
                params: selection.params,
                fetch_size: i64::try_from(fetch_size.max(1)).unwrap_or(i64::MAX),
                last_key: (i64::MIN, i64::MIN),
                page: VecDeque::new(),
                exhausted: !objects_present,
                load,
            }),
        })
    }

    /// Whether at least one record matched when the query was issued
    pub fn objects_present(&self) -> bool {
        self.objects_present
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    /// Release the underlying connection; the stream ends afterwards
    pub fn close(&mut self) {
        if self.cursor.take().is_some() {
            trace!("query result closed");
        }
    }

    /// Drain the remaining records, stopping at the first error
    pub fn collect_all(mut self) -> Result<Vec<T>> {
        let records = self.by_ref().collect();
        self.close();
        records
    }
}

impl<T> Cursor<T> {
    fn fill(&mut self) -> Result<()> {
        let (sort_key, inc_id) = self.last_key;
        let mut bound = self.params.clone();
        bound.extend([
            Value::Integer(sort_key),
            Value::Integer(sort_key),
            Value::Integer(inc_id),
            Value::Integer(self.fetch_size),
        ]);

        let mut statement = self.connection.prepare_cached(&self.page_sql)?;
        let rows = statement
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok((row.get::<_, i64>(1)?, row.get::<_, i64>(0)?))
            })?
            .collect::<rusqlite::Result<VecDeque<_>>>()?;

        if (rows.len() as i64) < self.fetch_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.back() {
            self.last_key = *last;
        }
        trace!(rows = rows.len(), "fetched result page");
        self.page = rows;
        Ok(())
    }

    fn next_record(&mut self) -> Option<Result<T>> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        let (_, inc_id) = self.page.pop_front()?;
        Some((self.load)(&self.connection, inc_id))
    }
}

impl<T> Iterator for QueryResult<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.as_mut()?.next_record()
    }
}

impl<T> std::fmt::Debug for QueryResult<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("objects_present", &self.objects_present)
            .field("closed", &self.is_closed())
            .finish()
    }
}
