//! Table layout of a capture database

/// Bumped whenever the layout below changes
pub const SCHEMA_VERSION: i64 = 1;

pub(crate) const DROP_SCHEMA: &str = "
DROP TABLE IF EXISTS manipulation_parameter;
DROP TABLE IF EXISTS manipulation_data;
DROP TABLE IF EXISTS message_certificate;
DROP TABLE IF EXISTS message_action;
DROP TABLE IF EXISTS version_group;
DROP TABLE IF EXISTS http_header;
DROP TABLE IF EXISTS message_content;
DROP TABLE IF EXISTS capture_meta;
";

pub(crate) const CREATE_SCHEMA: &str = "
CREATE TABLE capture_meta (
    version INTEGER NOT NULL
);

CREATE TABLE message_content (
    inc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL,
    body TEXT NOT NULL,
    charset TEXT NOT NULL,
    direction TEXT NOT NULL,
    message_type TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    nano_timestamp INTEGER NOT NULL,
    message_hash TEXT NOT NULL,
    scheme TEXT NOT NULL,
    local_address TEXT,
    local_port INTEGER,
    remote_address TEXT,
    remote_port INTEGER,
    transaction_id TEXT,
    request_uri TEXT,
    is_soap INTEGER NOT NULL
);
CREATE INDEX message_content_uuid ON message_content (uuid);
CREATE INDEX message_content_direction ON message_content (direction, message_type);
CREATE INDEX message_content_nano ON message_content (nano_timestamp);

CREATE TABLE http_header (
    message_content INTEGER NOT NULL REFERENCES message_content (inc_id),
    position INTEGER NOT NULL,
    entry_key TEXT NOT NULL,
    entry_value TEXT NOT NULL
);
CREATE INDEX http_header_message ON http_header (message_content);

CREATE TABLE version_group (
    message_content INTEGER NOT NULL REFERENCES message_content (inc_id),
    position INTEGER NOT NULL,
    mdib_version INTEGER NOT NULL,
    sequence_id TEXT,
    body_element TEXT NOT NULL
);
CREATE INDEX version_group_message ON version_group (message_content);
CREATE INDEX version_group_element ON version_group (body_element, sequence_id);

CREATE TABLE message_action (
    message_content INTEGER NOT NULL REFERENCES message_content (inc_id),
    action TEXT NOT NULL
);
CREATE INDEX message_action_message ON message_action (message_content);

CREATE TABLE message_certificate (
    message_content INTEGER NOT NULL REFERENCES message_content (inc_id),
    position INTEGER NOT NULL,
    der BLOB NOT NULL
);
CREATE INDEX message_certificate_message ON message_certificate (message_content);

CREATE TABLE manipulation_data (
    inc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL,
    start_timestamp INTEGER NOT NULL,
    finish_timestamp INTEGER NOT NULL,
    result TEXT NOT NULL,
    method_name TEXT NOT NULL
);
CREATE INDEX manipulation_data_uuid ON manipulation_data (uuid);
CREATE INDEX manipulation_data_method ON manipulation_data (method_name);

CREATE TABLE manipulation_parameter (
    manipulation_data INTEGER NOT NULL REFERENCES manipulation_data (inc_id),
    position INTEGER NOT NULL,
    parameter_name TEXT NOT NULL,
    parameter_value TEXT NOT NULL
);
CREATE INDEX manipulation_parameter_data ON manipulation_parameter (manipulation_data);
";
