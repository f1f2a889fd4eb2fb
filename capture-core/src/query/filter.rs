//! Filters over persisted records and their SQL form

use rusqlite::types::Value;

use crate::capture::{Direction, MessageType, SCHEME_HTTP, SCHEME_HTTPS};
use crate::policy::QName;

/// Sort key of messages without any matching version group
const NO_VERSION_SORT_KEY: i64 = i64::MIN + 1;

/// SQL text with positional parameters in textual order
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Sql {
    pub text: String,
    pub params: Vec<Value>,
}

impl Sql {
    fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.text.push_str(text);
        self
    }

    fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.text.push('?');
        self.params.push(value.into());
        self
    }

    fn bind_list<I, V>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push("(");
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value);
        }
        self.push(")")
    }

    fn append(&mut self, other: Sql) -> &mut Self {
        self.text.push_str(&other.text);
        self.params.extend(other.params);
        self
    }
}

/// Composable filter over captured messages
///
/// Unset criteria match everything. All set criteria must hold; within the
/// body element list and the header list any single entry suffices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub direction: Option<Direction>,
    pub message_type: Option<MessageType>,
    /// Envelope seen, or a SOAP content type declared
    pub soap_only: bool,
    /// Carried over HTTP or HTTPS
    pub http_only: bool,
    /// Direct body children; an empty list matches nothing
    pub body_elements: Option<Vec<QName>>,
    /// Sequence id of the matching body element
    pub sequence_id: Option<String>,
    /// Inclusive bounds on the monotonic timestamp
    pub time_window: Option<(i64, i64)>,
    /// Header key/value pairs, compared case-insensitively; an empty list
    /// matches nothing
    pub headers: Option<Vec<(String, String)>>,
    /// Ascend by the smallest matching version instead of insertion order
    pub order_by_version: bool,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn soap(mut self) -> Self {
        self.soap_only = true;
        self
    }

    pub fn http(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn body_elements(mut self, names: impl IntoIterator<Item = QName>) -> Self {
        self.body_elements = Some(names.into_iter().collect());
        self
    }

    pub fn sequence_id(mut self, sequence_id: impl Into<String>) -> Self {
        self.sequence_id = Some(sequence_id.into());
        self
    }

    pub fn between(mut self, start: i64, finish: i64) -> Self {
        self.time_window = Some((start, finish));
        self
    }

    pub fn any_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers = Some(headers.into_iter().collect());
        self
    }

    pub fn ordered_by_version(mut self) -> Self {
        self.order_by_version = true;
        self
    }

    /// Predicate on `version_group g` for the element and sequence criteria
    fn group_predicate(&self) -> Option<Sql> {
        if self.body_elements.is_none() && self.sequence_id.is_none() {
            return None;
        }
        let mut sql = Sql::new("g.message_content = m.inc_id");
        if let Some(names) = &self.body_elements {
            if names.is_empty() {
                sql.push(" AND 0");
            } else {
                sql.push(" AND g.body_element IN ")
                    .bind_list(names.iter().map(|name| name.to_string()));
            }
        }
        if let Some(sequence_id) = &self.sequence_id {
            sql.push(" AND g.sequence_id = ").bind(sequence_id.clone());
        }
        Some(sql)
    }

    fn where_clause(&self) -> Sql {
        let mut sql = Sql::new("1");
        if let Some(direction) = self.direction {
            sql.push(" AND m.direction = ").bind(direction.as_str().to_string());
        }
        if let Some(message_type) = self.message_type {
            sql.push(" AND m.message_type = ").bind(message_type.as_str().to_string());
        }
        if self.soap_only {
            sql.push(
                " AND (m.is_soap = 1 OR EXISTS (SELECT 1 FROM http_header h \
                 WHERE h.message_content = m.inc_id AND lower(h.entry_key) = 'content-type' \
                 AND lower(h.entry_value) LIKE '%application/soap+xml%'))",
            );
        }
        if self.http_only {
            sql.push(" AND lower(m.scheme) IN ")
                .bind_list([SCHEME_HTTP.to_string(), SCHEME_HTTPS.to_string()]);
        }
        if let Some(group) = self.group_predicate() {
            sql.push(" AND EXISTS (SELECT 1 FROM version_group g WHERE ")
                .append(group)
                .push(")");
        }
        if let Some((start, finish)) = self.time_window {
            sql.push(" AND m.nano_timestamp >= ")
                .bind(start)
                .push(" AND m.nano_timestamp <= ")
                .bind(finish);
        }
        match &self.headers {
            None => {}
            Some(headers) if headers.is_empty() => {
                sql.push(" AND 0");
            }
            Some(headers) => {
                sql.push(
                    " AND EXISTS (SELECT 1 FROM http_header h \
                     WHERE h.message_content = m.inc_id AND (",
                );
                for (i, (key, value)) in headers.iter().enumerate() {
                    if i > 0 {
                        sql.push(" OR ");
                    }
                    sql.push("(lower(h.entry_key) = ")
                        .bind(key.to_lowercase())
                        .push(" AND lower(h.entry_value) = ")
                        .bind(value.to_lowercase())
                        .push(")");
                }
                sql.push("))");
            }
        }
        sql
    }

    fn sort_key(&self) -> Sql {
        if !self.order_by_version {
            return Sql::new("0");
        }
        let mut sql = Sql::new("COALESCE((SELECT MIN(g.mdib_version) FROM version_group g WHERE ");
        match self.group_predicate() {
            Some(group) => sql.append(group),
            None => sql.push("g.message_content = m.inc_id"),
        };
        sql.push("), ").bind(NO_VERSION_SORT_KEY).push(")");
        sql
    }

    /// `inc_id, sort_key` rows of every matching message
    pub(crate) fn selection(&self) -> Sql {
        let mut sql = Sql::new("SELECT m.inc_id AS inc_id, ");
        sql.append(self.sort_key())
            .push(" AS sort_key FROM message_content m WHERE ")
            .append(self.where_clause());
        sql
    }

    /// Single-row existence probe
    pub(crate) fn presence(&self) -> Sql {
        let mut sql = Sql::new("SELECT EXISTS (SELECT 1 FROM message_content m WHERE ");
        sql.append(self.where_clause()).push(")");
        sql
    }
}

/// Filter over manipulation records, always ordered by start timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManipulationFilter {
    /// Any of these method names; empty matches every method
    pub method_names: Vec<String>,
    /// Every pair must be present on the record
    pub parameters: Vec<(String, String)>,
}

impl ManipulationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.method_names.push(name.into());
        self
    }

    pub fn methods<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.method_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    fn where_clause(&self) -> Sql {
        let mut sql = Sql::new("1");
        if !self.method_names.is_empty() {
            sql.push(" AND d.method_name IN ")
                .bind_list(self.method_names.iter().cloned());
        }
        for (name, value) in &self.parameters {
            sql.push(
                " AND EXISTS (SELECT 1 FROM manipulation_parameter p \
                 WHERE p.manipulation_data = d.inc_id AND p.parameter_name = ",
            )
            .bind(name.clone())
            .push(" AND p.parameter_value = ")
            .bind(value.clone())
            .push(")");
        }
        sql
    }

    pub(crate) fn selection(&self) -> Sql {
        let mut sql = Sql::new(
            "SELECT d.inc_id AS inc_id, d.start_timestamp AS sort_key FROM manipulation_data d WHERE ",
        );
        sql.append(self.where_clause());
        sql
    }

    pub(crate) fn presence(&self) -> Sql {
        let mut sql = Sql::new("SELECT EXISTS (SELECT 1 FROM manipulation_data d WHERE ");
        sql.append(self.where_clause()).push(")");
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let selection = MessageFilter::new().selection();
        assert_eq!(
            selection.text,
            "SELECT m.inc_id AS inc_id, 0 AS sort_key FROM message_content m WHERE 1"
        );
        assert!(selection.params.is_empty());
    }

    #[test]
    fn test_params_follow_textual_order() {
        let filter = MessageFilter::new()
            .direction(Direction::Inbound)
            .body_elements([QName::message("WaveformStream")])
            .sequence_id("seq")
            .ordered_by_version();
        let selection = filter.selection();

        let placeholders = selection.text.matches('?').count();
        assert_eq!(placeholders, selection.params.len());
        assert_eq!(
            selection.params.first(),
            Some(&Value::Text(QName::message("WaveformStream").to_string()))
        );
        assert_eq!(selection.params.get(3), Some(&Value::Text("INBOUND".to_string())));
    }

    #[test]
    fn test_empty_element_list_matches_nothing() {
        let filter = MessageFilter::new().body_elements(Vec::new());
        assert!(filter.where_clause().text.contains("AND 0"));
    }

    #[test]
    fn test_headers_are_lowercased() {
        let filter = MessageFilter::new().any_header("Content-Type", "Application/SOAP+XML");
        let clause = filter.where_clause();
        assert_eq!(
            clause.params,
            vec![
                Value::Text("content-type".to_string()),
                Value::Text("application/soap+xml".to_string())
            ]
        );
    }

    #[test]
    fn test_manipulation_parameters_each_require_a_match() {
        let filter = ManipulationFilter::new()
            .method("setMetricValue")
            .parameter("handle", "m1")
            .parameter("value", "42");
        let clause = filter.where_clause();
        assert_eq!(clause.text.matches("EXISTS").count(), 2);
        assert_eq!(clause.params.len(), 5);
    }
}
