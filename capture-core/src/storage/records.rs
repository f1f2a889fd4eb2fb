//! Persisted row shapes and their SQL mapping

use std::collections::BTreeSet;

use rusqlite::{params, Connection, Row};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::capture::{Direction, ManipulationResult, MessageType};
use crate::error::{CaptureError, Result};
use crate::extract::VersionGroup;
use crate::policy::QName;

/// A captured message as stored, with everything extracted at insert time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedMessage {
    pub id: Uuid,
    /// Body decoded with the resolved charset
    pub body: String,
    /// Canonical name of the resolved charset
    pub charset: String,
    pub direction: Direction,
    pub message_type: MessageType,
    pub timestamp_millis: i64,
    pub monotonic_nanos: i64,
    /// Lowercase hex SHA-256 of the UTF-8 encoded body
    pub message_hash: String,
    pub scheme: String,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
    pub transaction_id: Option<String>,
    pub request_uri: Option<String>,
    pub is_soap: bool,
    pub headers: Vec<(String, String)>,
    pub actions: BTreeSet<String>,
    pub version_groups: Vec<VersionGroup>,
    #[serde(serialize_with = "serialize_hex_list")]
    pub certificates: Vec<Vec<u8>>,
}

impl PersistedMessage {
    /// Values of a header, matched case-insensitively, in wire order
    pub fn header_values(&self, key: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// A manipulation record as stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedManipulation {
    pub id: Uuid,
    pub start_timestamp: i64,
    pub finish_timestamp: i64,
    pub result: ManipulationResult,
    pub method_name: String,
    pub parameters: Vec<(String, String)>,
}

fn serialize_hex_list<S: Serializer>(values: &[Vec<u8>], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(values.iter().map(hex::encode))
}

pub(crate) fn insert_message(connection: &Connection, message: &PersistedMessage) -> Result<()> {
    connection
        .prepare_cached(
            "INSERT INTO message_content (uuid, body, charset, direction, message_type, timestamp, \
             nano_timestamp, message_hash, scheme, local_address, local_port, remote_address, \
             remote_port, transaction_id, request_uri, is_soap) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        )?
        .execute(params![
            message.id.to_string(),
            message.body,
            message.charset,
            message.direction.as_str(),
            message.message_type.as_str(),
            message.timestamp_millis,
            message.monotonic_nanos,
            message.message_hash,
            message.scheme,
            message.local_address,
            message.local_port,
            message.remote_address,
            message.remote_port,
            message.transaction_id,
            message.request_uri,
            message.is_soap,
        ])?;
    let inc_id = connection.last_insert_rowid();

    let mut header = connection.prepare_cached(
        "INSERT INTO http_header (message_content, position, entry_key, entry_value) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, (key, value)) in message.headers.iter().enumerate() {
        header.execute(params![inc_id, position as i64, key, value])?;
    }

    let mut group = connection.prepare_cached(
        "INSERT INTO version_group (message_content, position, mdib_version, sequence_id, body_element) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (position, version_group) in message.version_groups.iter().enumerate() {
        group.execute(params![
            inc_id,
            position as i64,
            version_group.mdib_version,
            version_group.sequence_id,
            version_group.body_element.to_string(),
        ])?;
    }

    let mut action =
        connection.prepare_cached("INSERT INTO message_action (message_content, action) VALUES (?1, ?2)")?;
    for value in &message.actions {
        action.execute(params![inc_id, value])?;
    }

    let mut certificate = connection.prepare_cached(
        "INSERT INTO message_certificate (message_content, position, der) VALUES (?1, ?2, ?3)",
    )?;
    for (position, der) in message.certificates.iter().enumerate() {
        certificate.execute(params![inc_id, position as i64, der])?;
    }

    Ok(())
}

pub(crate) fn insert_manipulation(
    connection: &Connection,
    manipulation: &PersistedManipulation,
) -> Result<()> {
    connection
        .prepare_cached(
            "INSERT INTO manipulation_data (uuid, start_timestamp, finish_timestamp, result, method_name) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?
        .execute(params![
            manipulation.id.to_string(),
            manipulation.start_timestamp,
            manipulation.finish_timestamp,
            manipulation.result.as_str(),
            manipulation.method_name,
        ])?;
    let inc_id = connection.last_insert_rowid();

    let mut parameter = connection.prepare_cached(
        "INSERT INTO manipulation_parameter (manipulation_data, position, parameter_name, parameter_value) \
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, (name, value)) in manipulation.parameters.iter().enumerate() {
        parameter.execute(params![inc_id, position as i64, name, value])?;
    }
    Ok(())
}

struct MessageRow {
    uuid: String,
    body: String,
    charset: String,
    direction: String,
    message_type: String,
    timestamp_millis: i64,
    monotonic_nanos: i64,
    message_hash: String,
    scheme: String,
    local_address: Option<String>,
    local_port: Option<u16>,
    remote_address: Option<String>,
    remote_port: Option<u16>,
    transaction_id: Option<String>,
    request_uri: Option<String>,
    is_soap: bool,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uuid: row.get("uuid")?,
            body: row.get("body")?,
            charset: row.get("charset")?,
            direction: row.get("direction")?,
            message_type: row.get("message_type")?,
            timestamp_millis: row.get("timestamp")?,
            monotonic_nanos: row.get("nano_timestamp")?,
            message_hash: row.get("message_hash")?,
            scheme: row.get("scheme")?,
            local_address: row.get("local_address")?,
            local_port: row.get("local_port")?,
            remote_address: row.get("remote_address")?,
            remote_port: row.get("remote_port")?,
            transaction_id: row.get("transaction_id")?,
            request_uri: row.get("request_uri")?,
            is_soap: row.get("is_soap")?,
        })
    }
}

pub(crate) fn load_message(connection: &Connection, inc_id: i64) -> Result<PersistedMessage> {
    let row = connection
        .prepare_cached("SELECT * FROM message_content WHERE inc_id = ?1")?
        .query_row(params![inc_id], MessageRow::from_row)?;

    let headers = connection
        .prepare_cached(
            "SELECT entry_key, entry_value FROM http_header WHERE message_content = ?1 ORDER BY position",
        )?
        .query_map(params![inc_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

    let version_groups = connection
        .prepare_cached(
            "SELECT mdib_version, sequence_id, body_element FROM version_group \
             WHERE message_content = ?1 ORDER BY position",
        )?
        .query_map(params![inc_id], |r| {
            Ok(VersionGroup {
                mdib_version: r.get(0)?,
                sequence_id: r.get(1)?,
                body_element: QName::parse(&r.get::<_, String>(2)?),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let actions = connection
        .prepare_cached("SELECT action FROM message_action WHERE message_content = ?1")?
        .query_map(params![inc_id], |r| r.get(0))?
        .collect::<rusqlite::Result<BTreeSet<String>>>()?;

    let certificates = connection
        .prepare_cached("SELECT der FROM message_certificate WHERE message_content = ?1 ORDER BY position")?
        .query_map(params![inc_id], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;

    Ok(PersistedMessage {
        id: parse_uuid(&row.uuid)?,
        body: row.body,
        charset: row.charset,
        direction: row.direction.parse().map_err(CaptureError::internal)?,
        message_type: row.message_type.parse().map_err(CaptureError::internal)?,
        timestamp_millis: row.timestamp_millis,
        monotonic_nanos: row.monotonic_nanos,
        message_hash: row.message_hash,
        scheme: row.scheme,
        local_address: row.local_address,
        local_port: row.local_port,
        remote_address: row.remote_address,
        remote_port: row.remote_port,
        transaction_id: row.transaction_id,
        request_uri: row.request_uri,
        is_soap: row.is_soap,
        headers,
        actions,
        version_groups,
        certificates,
    })
}

pub(crate) fn load_manipulation(connection: &Connection, inc_id: i64) -> Result<PersistedManipulation> {
    let (uuid, start_timestamp, finish_timestamp, result, method_name): (String, i64, i64, String, String) =
        connection
            .prepare_cached(
                "SELECT uuid, start_timestamp, finish_timestamp, result, method_name \
                 FROM manipulation_data WHERE inc_id = ?1",
            )?
            .query_row(params![inc_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?))
            })?;

    let parameters = connection
        .prepare_cached(
            "SELECT parameter_name, parameter_value FROM manipulation_parameter \
             WHERE manipulation_data = ?1 ORDER BY position",
        )?
        .query_map(params![inc_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

    Ok(PersistedManipulation {
        id: parse_uuid(&uuid)?,
        start_timestamp,
        finish_timestamp,
        result: result.parse().map_err(CaptureError::internal)?,
        method_name,
        parameters,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| CaptureError::internal(format!("stored uuid '{}' is malformed: {}", value, e)))
}
