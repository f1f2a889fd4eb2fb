//! Streaming inspection of decoded message bodies
//!
//! A single forward pass over the document picks out:
//! - every WS-Addressing `Action` value
//! - whether a SOAP `Envelope` was seen
//! - one [`VersionGroup`] per direct child of the SOAP `Body`
//!
//! No tree is built. A document that fails to parse yields an empty
//! [`Extraction`]; anomalies are returned as [`ExtractionReport`]s.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::policy::{CapturePolicy, QName};

/// Version recorded for a version-bearing element without a version attribute
pub const VERSION_MISSING: i64 = 0;

/// Version recorded for an empty version attribute
pub const VERSION_EMPTY: i64 = -1;

/// Version recorded for a version attribute that is not an integer
pub const VERSION_INVALID: i64 = -2;

/// Version recorded for body elements that carry no version at all
pub const VERSION_NOT_APPLICABLE: i64 = -3;

/// Version metadata of one direct child of a SOAP body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionGroup {
    pub mdib_version: i64,
    pub sequence_id: Option<String>,
    pub body_element: QName,
}

/// Non-fatal findings while inspecting a body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionReport {
    EmptyVersion { element: QName },
    InvalidVersion { element: QName, value: String },
    MissingSequenceId { element: QName },
    MultipleBodyElements,
}

impl fmt::Display for ExtractionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionReport::EmptyVersion { element } => write!(
                f,
                "Encountered MdibVersion attribute on {} that has an empty string as its value \
                 and saved {} as a replacement value.",
                element, VERSION_EMPTY
            ),
            ExtractionReport::InvalidVersion { element, value } => write!(
                f,
                "Encountered MdibVersion attribute on {} with the non-numeric value '{}' and \
                 saved {} as a replacement value.",
                element, value, VERSION_INVALID
            ),
            ExtractionReport::MissingSequenceId { element } => write!(
                f,
                "Encountered body with the QName {} without a SequenceId attribute.",
                element
            ),
            ExtractionReport::MultipleBodyElements => f.write_str(
                "Encountered multiple elements in soap body, but more than one are not allowed.",
            ),
        }
    }
}

/// Everything pulled out of one body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub actions: BTreeSet<String>,
    pub is_soap: bool,
    pub version_groups: Vec<VersionGroup>,
    pub reports: Vec<ExtractionReport>,
}

/// Extracts actions, envelope marker and version groups from XML bodies
#[derive(Debug, Clone)]
pub struct BodyExtractor {
    policy: Arc<CapturePolicy>,
}

impl BodyExtractor {
    pub fn new(policy: Arc<CapturePolicy>) -> Self {
        Self { policy }
    }

    /// Inspect a decoded body
    pub fn extract(&self, body: &str) -> Extraction {
        let body = body.strip_prefix('\u{FEFF}').unwrap_or(body);
        let mut extraction = Extraction::default();

        if let Err(e) = self.scan(body, &mut extraction) {
            trace!(error = %e, "unable to extract action or body from message content, this is expected for invalid messages");
            return Extraction {
                reports: extraction.reports,
                ..Extraction::default()
            };
        }
        extraction
    }

    fn scan(&self, body: &str, out: &mut Extraction) -> quick_xml::Result<()> {
        let mut reader = NsReader::from_str(body);

        loop {
            let (namespace, event) = reader.read_resolved_event()?;
            match event {
                Event::Start(start) => {
                    let name = qualified(&namespace, &start);
                    if self.is_addressing(&name, "Action") {
                        out.actions.insert(read_action(&mut reader)?);
                    } else if self.is_envelope(&name, "Body") {
                        self.scan_body(&mut reader, out)?;
                    } else if self.is_envelope(&name, "Envelope") {
                        out.is_soap = true;
                    }
                }
                Event::Empty(start) => {
                    let name = qualified(&namespace, &start);
                    if self.is_addressing(&name, "Action") {
                        warn!("empty action element encountered");
                        out.actions.insert(String::new());
                    } else if self.is_envelope(&name, "Envelope") {
                        out.is_soap = true;
                    }
                }
                Event::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    fn scan_body(&self, reader: &mut NsReader<&[u8]>, out: &mut Extraction) -> quick_xml::Result<()> {
        let mut depth = 0usize;
        let mut children = 0usize;

        loop {
            let (namespace, event) = reader.read_resolved_event()?;
            match event {
                Event::Start(start) => {
                    if depth == 0 {
                        children += 1;
                        let group = self.version_group(&namespace, &start, out)?;
                        out.version_groups.push(group);
                    }
                    depth += 1;
                }
                Event::Empty(start) => {
                    if depth == 0 {
                        children += 1;
                        let group = self.version_group(&namespace, &start, out)?;
                        out.version_groups.push(group);
                    }
                }
                Event::End(_) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Event::Eof => {
                    return Err(quick_xml::Error::UnexpectedEof("soap body".to_string()));
                }
                _ => {}
            }
        }

        if children > 1 {
            out.reports.push(ExtractionReport::MultipleBodyElements);
        }
        Ok(())
    }

    fn version_group(
        &self,
        namespace: &ResolveResult<'_>,
        start: &BytesStart<'_>,
        out: &mut Extraction,
    ) -> quick_xml::Result<VersionGroup> {
        let element = qualified(namespace, start);
        if !self.policy.is_version_bearing(&element) {
            return Ok(VersionGroup {
                mdib_version: VERSION_NOT_APPLICABLE,
                sequence_id: None,
                body_element: element,
            });
        }

        let mut version = None;
        let mut sequence_id = None;
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = attribute.key.as_ref();
            if key == self.policy.version_attribute.as_bytes() {
                version = Some(attribute.unescape_value()?.into_owned());
            } else if key == self.policy.sequence_id_attribute.as_bytes() {
                sequence_id = Some(attribute.unescape_value()?.into_owned());
            }
        }

        let mdib_version = match version {
            None => VERSION_MISSING,
            Some(value) if value.is_empty() => {
                out.reports.push(ExtractionReport::EmptyVersion {
                    element: element.clone(),
                });
                VERSION_EMPTY
            }
            Some(value) => match value.trim().parse::<i64>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    out.reports.push(ExtractionReport::InvalidVersion {
                        element: element.clone(),
                        value,
                    });
                    VERSION_INVALID
                }
            },
        };

        if sequence_id.is_none() {
            out.reports.push(ExtractionReport::MissingSequenceId {
                element: element.clone(),
            });
        }

        Ok(VersionGroup {
            mdib_version,
            sequence_id,
            body_element: element,
        })
    }

    fn is_addressing(&self, name: &QName, local: &str) -> bool {
        name.local == local && name.namespace == self.policy.addressing_namespace
    }

    fn is_envelope(&self, name: &QName, local: &str) -> bool {
        name.local == local && name.namespace == self.policy.envelope_namespace
    }
}

fn qualified(namespace: &ResolveResult<'_>, start: &BytesStart<'_>) -> QName {
    let namespace = match namespace {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
        _ => String::new(),
    };
    let local = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    QName::new(namespace, local)
}

fn read_action(reader: &mut NsReader<&[u8]>) -> quick_xml::Result<String> {
    match reader.read_event()? {
        Event::Text(text) => Ok(text.unescape()?.into_owned()),
        Event::CData(data) => Ok(String::from_utf8_lossy(&data).into_owned()),
        _ => {
            warn!("empty action element encountered");
            Ok(String::new())
        }
    }
}
