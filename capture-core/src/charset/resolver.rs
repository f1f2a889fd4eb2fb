//! Charset resolution for captured message bodies
//!
//! Three signals are inspected independently:
//!
//! 1. the `charset` parameter of a `Content-Type` HTTP header
//! 2. a Unicode byte order mark
//! 3. the `encoding` attribute of the XML declaration, read with the encoding
//!    family implied by the first four bytes of the body
//!
//! The first signal present wins; UTF-8 is the fallback. Disagreements between
//! signals never change the outcome, they only produce [`CharsetReport`]s.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tracing::{debug, trace};

use super::{detect_bom, Charset};
use crate::capture::Direction;
use crate::error::{CaptureError, Result};
use crate::policy::CapturePolicy;

/// Bytes decoded when looking for the XML declaration
const DECLARATION_SCAN_LENGTH: usize = 1024;

const CONTENT_TYPE: &str = "content-type";

/// Where a charset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetSource {
    HttpHeader,
    ByteOrderMark,
    XmlDeclaration,
    /// Nothing declared a charset
    Fallback,
}

/// A non-fatal finding produced while resolving a charset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CharsetReport {
    /// The header named a charset that does not exist
    InvalidHeaderCharset { name: String },

    /// The XML declaration named a charset that does not exist
    InvalidDeclaredCharset { name: String },

    /// Two signals disagree
    Inconsistent {
        message_id: String,
        first: String,
        second: String,
    },

    /// No signal was present
    Undetermined,

    /// The chosen charset is not UTF-8
    NotUtf8 {
        charset: Charset,
        source: CharsetSource,
    },

    /// Inbound message with a content type outside the allow-list
    WrongMimeType { mime_type: String },
}

impl CharsetReport {
    pub fn is_inconsistency(&self) -> bool {
        matches!(self, CharsetReport::Inconsistent { .. })
    }
}

impl fmt::Display for CharsetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharsetReport::InvalidHeaderCharset { name } => {
                write!(f, "Encountered invalid/unknown charset '{}' in HTTP Header", name)
            }
            CharsetReport::InvalidDeclaredCharset { name } => {
                write!(f, "Encountered invalid/unknown charset '{}' in XML Declaration", name)
            }
            CharsetReport::Inconsistent {
                message_id,
                first,
                second,
            } => write!(
                f,
                "MessageID={}: Inconsistent charset declaration: {}, but {}",
                message_id, first, second
            ),
            CharsetReport::Undetermined => f.write_str(
                "Message encoding could not be determined. Please ensure that all Messages send by \
                 the Device under Test declare their encoding either in the HTTP Header, in the \
                 Unicode Byte Order Mark, or in the XML Declaration as mandated by the XML Standard.",
            ),
            CharsetReport::NotUtf8 { charset, source } => {
                let origin = match source {
                    CharsetSource::HttpHeader => "HTTP Header",
                    CharsetSource::XmlDeclaration => "XML Declaration",
                    _ => "Unicode Byte Order Mark",
                };
                write!(
                    f,
                    "Encountered a message whose encoding is declared to be '{}' in {}. This \
                     violates MDPWS:R0007_0 - SOAP ENVELOPEs SHALL be encoded by using UTF-8.",
                    charset, origin
                )
            }
            CharsetReport::WrongMimeType { mime_type } => write!(
                f,
                "encountered a SOAP Envelope whose mimeType '{}' (declared in its HTTP Header) \
                 indicates that it was not serialized as 'application/soap+xml' and that hence \
                 violates the definition of a SOAP TEXT ENVELOPE in MDPWS Section 3.1.",
                mime_type
            ),
        }
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCharset {
    pub charset: Charset,
    pub source: CharsetSource,
    pub reports: Vec<CharsetReport>,
}

impl ResolvedCharset {
    pub fn inconsistencies(&self) -> impl Iterator<Item = &CharsetReport> {
        self.reports.iter().filter(|r| r.is_inconsistency())
    }
}

enum Origin {
    Header,
    Bom,
    Declaration,
    DeclarationPrefix,
}

impl Origin {
    fn describe(&self, charset: Charset) -> String {
        match self {
            Origin::Header => format!("HTTP Header states '{}'", charset),
            Origin::Bom => format!("Unicode Byte Order Mark for {} found", charset),
            Origin::Declaration => format!("XML Declaration states '{}'", charset),
            Origin::DeclarationPrefix => format!("XML Declaration is encoded in {}", charset),
        }
    }
}

/// Determines the charset of raw message bodies
#[derive(Debug, Clone)]
pub struct CharsetResolver {
    policy: Arc<CapturePolicy>,
    header_pattern: Regex,
    declaration_pattern: Regex,
}

impl CharsetResolver {
    pub fn new(policy: Arc<CapturePolicy>) -> Result<Self> {
        let header_pattern = RegexBuilder::new(r";\s*charset\s*=\s*([^;]*)")
            .case_insensitive(true)
            .build()
            .map_err(|e| CaptureError::internal(format!("invalid charset pattern: {}", e)))?;
        let declaration_pattern =
            Regex::new(r#"<\?xml\s[^?]*?\bencoding\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
                .map_err(|e| CaptureError::internal(format!("invalid declaration pattern: {}", e)))?;

        Ok(Self {
            policy,
            header_pattern,
            declaration_pattern,
        })
    }

    /// Resolve the charset of one message body
    ///
    /// `headers` are the HTTP headers of the exchange, empty for other transports.
    pub fn resolve(
        &self,
        message_id: &str,
        direction: Direction,
        headers: &[(String, String)],
        bytes: &[u8],
    ) -> ResolvedCharset {
        let mut reports = Vec::new();

        let from_header = self.charset_from_headers(headers, &mut reports);
        let from_bom = detect_bom(bytes).map(|(charset, _)| charset);
        let from_prefix = charset_from_prefix(bytes);
        let from_declaration = from_bom
            .or(from_prefix)
            .and_then(|family| self.charset_from_declaration(bytes, family, &mut reports));

        let mut inconsistent = |first: Origin, a: Charset, second: Origin, b: Charset| {
            reports.push(CharsetReport::Inconsistent {
                message_id: message_id.to_string(),
                first: first.describe(a),
                second: second.describe(b),
            })
        };

        if let Some(header) = from_header {
            match (from_bom, from_declaration) {
                (Some(bom), _) if bom != header => {
                    inconsistent(Origin::Header, header, Origin::Bom, bom)
                }
                (_, Some(declared)) if declared != header => {
                    inconsistent(Origin::Header, header, Origin::Declaration, declared)
                }
                _ => {}
            }
        }

        match from_declaration {
            None => {
                if let (Some(bom), Some(prefix)) = (from_bom, from_prefix) {
                    if !bom_and_prefix_compatible(bom, prefix) {
                        inconsistent(Origin::DeclarationPrefix, prefix, Origin::Bom, bom);
                    }
                }
            }
            Some(declared) => {
                if let Some(bom) = from_bom.filter(|bom| *bom != declared) {
                    inconsistent(Origin::Declaration, declared, Origin::Bom, bom);
                }
                if let Some(prefix) = from_prefix.filter(|prefix| *prefix != declared) {
                    let ebcdic_family =
                        prefix == Charset::ebcdic_placeholder() && declared.is_ebcdic();
                    let ascii_compatible = prefix == Charset::UsAscii;
                    if !ebcdic_family && !ascii_compatible {
                        inconsistent(Origin::Declaration, declared, Origin::DeclarationPrefix, prefix);
                    }
                }
            }
        }

        let (charset, source) = match (from_header, from_bom, from_declaration) {
            (Some(charset), _, _) => (charset, CharsetSource::HttpHeader),
            (None, Some(charset), _) => (charset, CharsetSource::ByteOrderMark),
            (None, None, Some(charset)) => (charset, CharsetSource::XmlDeclaration),
            (None, None, None) => {
                reports.push(CharsetReport::Undetermined);
                (Charset::Utf8, CharsetSource::Fallback)
            }
        };

        if direction == Direction::Inbound {
            self.check_mime_types(headers, &mut reports);
        }

        if charset != Charset::Utf8 {
            reports.push(CharsetReport::NotUtf8 { charset, source });
        }

        debug!(message_id, %charset, ?source, reports = reports.len(), "resolved message charset");
        ResolvedCharset {
            charset,
            source,
            reports,
        }
    }

    fn charset_from_headers(
        &self,
        headers: &[(String, String)],
        reports: &mut Vec<CharsetReport>,
    ) -> Option<Charset> {
        let mut found = None;
        for (_, value) in content_types(headers) {
            let Some(captures) = self.header_pattern.captures(value) else {
                continue;
            };
            let name = strip_quotes(captures[1].trim()).trim();
            match Charset::for_label(name) {
                Some(charset) => found = Some(charset),
                None => reports.push(CharsetReport::InvalidHeaderCharset {
                    name: name.to_string(),
                }),
            }
        }
        found
    }

    fn charset_from_declaration(
        &self,
        bytes: &[u8],
        family: Charset,
        reports: &mut Vec<CharsetReport>,
    ) -> Option<Charset> {
        let head = &bytes[..bytes.len().min(DECLARATION_SCAN_LENGTH)];
        let text = family.decode(head);
        let captures = self.declaration_pattern.captures(&text)?;
        let name = captures.get(1).or_else(|| captures.get(2))?.as_str();
        let charset = Charset::for_label(name);
        if charset.is_none() {
            trace!(name, "unknown charset in xml declaration");
            reports.push(CharsetReport::InvalidDeclaredCharset {
                name: name.to_string(),
            });
        }
        charset
    }

    fn check_mime_types(&self, headers: &[(String, String)], reports: &mut Vec<CharsetReport>) {
        for (_, value) in content_types(headers) {
            let mime_type = value.split(';').next().unwrap_or_default().trim();
            if !self.policy.is_allowed_mime_type(mime_type) {
                reports.push(CharsetReport::WrongMimeType {
                    mime_type: mime_type.to_string(),
                });
            }
        }
    }
}

fn content_types(headers: &[(String, String)]) -> impl Iterator<Item = (&str, &str)> {
    headers
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(CONTENT_TYPE))
        .map(|(key, value)| (key.as_str(), value.as_str()))
}

fn strip_quotes(value: &str) -> &str {
    let quoted = value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')));
    if quoted {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Encoding family implied by the first bytes of an XML document
///
/// A leading UTF-8 BOM is skipped; other BOMs leave no match.
fn charset_from_prefix(bytes: &[u8]) -> Option<Charset> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match bytes.get(..4)? {
        [0x00, 0x00, 0x00, 0x3C] => Some(Charset::Utf32Be),
        [0x3C, 0x00, 0x00, 0x00] => Some(Charset::Utf32Le),
        [0x00, 0x3C, 0x00, 0x3F] => Some(Charset::Utf16Be),
        [0x3C, 0x00, 0x3F, 0x00] => Some(Charset::Utf16Le),
        [0x3C, 0x3F, 0x78, 0x6D] => Some(Charset::UsAscii),
        [0x4C, 0x6F, 0xA7, 0x94] => Some(Charset::ebcdic_placeholder()),
        _ => None,
    }
}

fn bom_and_prefix_compatible(bom: Charset, prefix: Charset) -> bool {
    (prefix == Charset::UsAscii && bom == Charset::Utf8) || prefix == bom
}
