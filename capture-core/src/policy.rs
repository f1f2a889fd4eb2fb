//! Protocol constants consulted during conversion
//!
//! The capture engine only needs a thin slice of protocol knowledge: which
//! namespaces identify the envelope and addressing headers, which body elements
//! carry version/sequence metadata, and which content types are acceptable on
//! inbound messages. All of it lives here so the extractor and resolver stay
//! protocol-agnostic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// WS-Addressing namespace
pub const WSA_NAMESPACE: &str = "http://www.w3.org/2005/08/addressing";

/// SOAP 1.2 envelope namespace
pub const SOAP_NAMESPACE: &str = "http://www.w3.org/2003/05/soap-envelope";

/// SDC message model namespace
pub const MESSAGE_NAMESPACE: &str =
    "http://standards.ieee.org/downloads/11073/11073-10207-2017/message";

/// Elements of the message model which carry an MdibVersion and SequenceId
const VERSION_BEARING_ELEMENTS: &[&str] = &[
    "EpisodicAlertReport",
    "EpisodicComponentReport",
    "EpisodicContextReport",
    "EpisodicMetricReport",
    "EpisodicOperationalStateReport",
    "DescriptionModificationReport",
    "OperationInvokedReport",
    "WaveformStream",
    "ObservedValueStream",
    "GetMdibResponse",
];

/// Namespace-qualified XML element name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    pub namespace: String,
    pub local: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Element of the message model namespace
    pub fn message(local: impl Into<String>) -> Self {
        Self::new(MESSAGE_NAMESPACE, local)
    }

    /// Parse the `{namespace}local` form produced by `Display`
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix('{').and_then(|rest| rest.split_once('}')) {
            Some((namespace, local)) => Self::new(namespace, local),
            None => Self::new("", text),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local)
        }
    }
}

/// Protocol knowledge used by the resolver and extractor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturePolicy {
    /// Namespace of the `Action` header element
    #[serde(default = "default_addressing_namespace")]
    pub addressing_namespace: String,

    /// Namespace of the `Envelope` and `Body` elements
    #[serde(default = "default_envelope_namespace")]
    pub envelope_namespace: String,

    /// Body elements whose version groups are extracted
    #[serde(default = "default_version_bearing")]
    pub version_bearing: Vec<QName>,

    /// Attribute carrying the MDIB version
    #[serde(default = "default_version_attribute")]
    pub version_attribute: String,

    /// Attribute carrying the sequence id
    #[serde(default = "default_sequence_id_attribute")]
    pub sequence_id_attribute: String,

    /// MIME types accepted on inbound messages, compared without parameters
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

fn default_addressing_namespace() -> String {
    WSA_NAMESPACE.to_string()
}

fn default_envelope_namespace() -> String {
    SOAP_NAMESPACE.to_string()
}

fn default_version_bearing() -> Vec<QName> {
    VERSION_BEARING_ELEMENTS
        .iter()
        .map(|local| QName::message(*local))
        .collect()
}

fn default_version_attribute() -> String {
    "MdibVersion".to_string()
}

fn default_sequence_id_attribute() -> String {
    "SequenceId".to_string()
}

fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "application/soap+xml".to_string(),
        "application/xml".to_string(),
    ]
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            addressing_namespace: default_addressing_namespace(),
            envelope_namespace: default_envelope_namespace(),
            version_bearing: default_version_bearing(),
            version_attribute: default_version_attribute(),
            sequence_id_attribute: default_sequence_id_attribute(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

impl CapturePolicy {
    pub fn is_version_bearing(&self, name: &QName) -> bool {
        self.version_bearing.contains(name)
    }

    pub fn is_allowed_mime_type(&self, mime: &str) -> bool {
        let mime = mime.trim();
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime))
    }
}
