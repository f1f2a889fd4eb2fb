//! Captured exchanges and their transport metadata
//!
//! A transport collaborator opens a [`CaptureBuffer`] per wire exchange via
//! [`MessageStore::open_capture`](crate::store::MessageStore::open_capture),
//! writes the raw bytes and closes it. Closing freezes the bytes into a
//! [`CapturedMessage`] and hands it to the ingestion queue.
//!
//! Device manipulations are described by [`ManipulationRecord`]s.

mod manipulation;
mod message;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use serde::{Deserialize, Serialize};

pub use manipulation::{ManipulationRecord, ManipulationResult};
pub use message::{CaptureBuffer, CapturedMessage};

/// Scheme value of HTTP transports
pub const SCHEME_HTTP: &str = "http";

/// Scheme value of TLS-protected HTTP transports
pub const SCHEME_HTTPS: &str = "https";

/// Scheme value of UDP transports
pub const SCHEME_UDP: &str = "soap.udp";

static MONOTONIC_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds on a process-wide monotonic clock
///
/// Used to order captures and to bound time-interval queries.
pub fn monotonic_nanos() -> i64 {
    let epoch = MONOTONIC_EPOCH.get_or_init(Instant::now);
    i64::try_from(epoch.elapsed().as_nanos()).unwrap_or(i64::MAX)
}

/// Direction of a message relative to the test harness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INBOUND" => Ok(Direction::Inbound),
            "OUTBOUND" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Role of a message within its exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Request,
    Response,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "REQUEST" => Ok(MessageType::Request),
            "RESPONSE" => Ok(MessageType::Response),
            "UNKNOWN" => Ok(MessageType::Unknown),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// HTTP details of an exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpInfo {
    /// Headers in wire order; keys may repeat
    pub headers: Vec<(String, String)>,
    /// Identifier pairing a request with its response
    pub transaction_id: String,
    pub request_uri: Option<String>,
}

impl HttpInfo {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_request_uri(mut self, uri: impl Into<String>) -> Self {
        self.request_uri = Some(uri.into());
        self
    }
}

/// Application layer of an exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationInfo {
    Http(HttpInfo),
    #[default]
    Other,
}

/// Where a message travelled and over what
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportContext {
    pub scheme: String,
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
    /// Peer certificates, DER encoded
    pub certificates: Vec<Vec<u8>>,
    pub application: ApplicationInfo,
}

impl TransportContext {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            ..Self::default()
        }
    }

    /// HTTP exchange over the given scheme
    pub fn http(scheme: impl Into<String>, info: HttpInfo) -> Self {
        Self {
            application: ApplicationInfo::Http(info),
            ..Self::new(scheme)
        }
    }

    /// UDP datagram without an application layer
    pub fn udp() -> Self {
        Self::new(SCHEME_UDP)
    }

    pub fn with_local(mut self, address: impl Into<String>, port: u16) -> Self {
        self.local_address = Some(address.into());
        self.local_port = Some(port);
        self
    }

    pub fn with_remote(mut self, address: impl Into<String>, port: u16) -> Self {
        self.remote_address = Some(address.into());
        self.remote_port = Some(port);
        self
    }

    pub fn with_certificate(mut self, der: Vec<u8>) -> Self {
        self.certificates.push(der);
        self
    }

    pub fn http_info(&self) -> Option<&HttpInfo> {
        match &self.application {
            ApplicationInfo::Http(info) => Some(info),
            ApplicationInfo::Other => None,
        }
    }

    /// HTTP headers, empty for other transports
    pub fn headers(&self) -> &[(String, String)] {
        self.http_info()
            .map(|info| info.headers.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trips_through_str() {
        assert_eq!("inbound".parse::<Direction>(), Ok(Direction::Inbound));
        assert_eq!(Direction::Outbound.to_string(), "OUTBOUND");
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!("RESPONSE".parse::<MessageType>(), Ok(MessageType::Response));
    }

    #[test]
    fn test_transport_context_headers() {
        let context = TransportContext::http(
            SCHEME_HTTPS,
            HttpInfo::new("tx-1")
                .with_header("Content-Type", "application/soap+xml")
                .with_request_uri("/device"),
        )
        .with_remote("10.0.0.2", 6464);

        assert_eq!(context.headers().len(), 1);
        assert_eq!(context.http_info().unwrap().transaction_id, "tx-1");
        assert_eq!(context.remote_port, Some(6464));

        assert!(TransportContext::udp().headers().is_empty());
        assert!(TransportContext::udp().http_info().is_none());
    }

    #[test]
    fn test_monotonic_nanos_does_not_go_backwards() {
        let first = monotonic_nanos();
        let second = monotonic_nanos();
        assert!(second >= first);
        assert!(first >= 0);
    }
}
