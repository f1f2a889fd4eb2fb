//! Character sets of captured message bodies
//!
//! [`Charset`] names every encoding a captured body may declare. The Unicode
//! families, US-ASCII, ISO-8859-1 and EBCDIC are handled here directly because
//! the WHATWG label table (`encoding_rs`) either lacks them or folds them into
//! windows-1252; everything else is delegated to `encoding_rs`.
//!
//! [`CharsetResolver`] decides which charset a message body is decoded with.

mod ebcdic;
mod resolver;

use std::fmt;

use encoding_rs::Encoding;

pub use ebcdic::CodePage;
pub use resolver::{CharsetReport, CharsetResolver, CharsetSource, ResolvedCharset};

/// Code page used for XML declarations that start with the EBCDIC `<?xm` pattern
pub const EBCDIC_PLACEHOLDER_CODE_PAGE: u16 = 1148;

/// A character set a message body can be decoded with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Utf8,
    /// UTF-16 with byte order taken from a BOM, big endian otherwise
    Utf16,
    Utf16Le,
    Utf16Be,
    /// UTF-32 with byte order taken from a BOM, big endian otherwise
    Utf32,
    Utf32Le,
    Utf32Be,
    UsAscii,
    Iso8859_1,
    Ebcdic(&'static CodePage),
    /// Any other encoding known to the WHATWG label table
    Web(&'static Encoding),
}

impl Charset {
    /// Resolve a charset label case-insensitively
    pub fn for_label(label: &str) -> Option<Charset> {
        let label = label.trim().to_ascii_lowercase();
        let charset = match label.as_str() {
            "utf-8" | "utf8" | "unicode-1-1-utf-8" => Charset::Utf8,
            "utf-16" | "utf16" | "utf_16" | "unicode" => Charset::Utf16,
            "utf-16le" | "utf_16le" | "x-utf-16le" | "unicodelittleunmarked" => Charset::Utf16Le,
            "utf-16be" | "utf_16be" | "x-utf-16be" | "unicodebigunmarked" | "iso-10646-ucs-2" => {
                Charset::Utf16Be
            }
            "utf-32" | "utf32" | "utf_32" => Charset::Utf32,
            "utf-32le" | "utf_32le" | "x-utf-32le" => Charset::Utf32Le,
            "utf-32be" | "utf_32be" | "x-utf-32be" => Charset::Utf32Be,
            "us-ascii" | "ascii" | "us" | "iso646-us" | "ansi_x3.4-1968" | "ansi_x3.4-1986"
            | "iso-ir-6" | "cp367" | "ibm367" | "csascii" | "646" | "ascii7" => Charset::UsAscii,
            "iso-8859-1" | "iso8859-1" | "iso_8859-1" | "iso8859_1" | "8859_1" | "latin1"
            | "l1" | "iso-ir-100" | "iso_8859-1:1987" | "ibm819" | "cp819" | "csisolatin1"
            | "819" => Charset::Iso8859_1,
            other => {
                if let Some(page) = ebcdic::lookup(other) {
                    return Some(Charset::Ebcdic(page));
                }
                let encoding = Encoding::for_label_no_replacement(other.as_bytes())?;
                Charset::from_encoding(encoding)
            }
        };
        Some(charset)
    }

    /// EBCDIC code page by number, if supported
    pub fn ebcdic(number: u16) -> Option<Charset> {
        ebcdic::by_number(number).map(Charset::Ebcdic)
    }

    /// Charset standing in for "some EBCDIC code page" during prefix sniffing
    pub fn ebcdic_placeholder() -> Charset {
        match ebcdic::by_number(EBCDIC_PLACEHOLDER_CODE_PAGE) {
            Some(page) => Charset::Ebcdic(page),
            None => Charset::Utf8,
        }
    }

    fn from_encoding(encoding: &'static Encoding) -> Charset {
        if encoding == encoding_rs::UTF_8 {
            Charset::Utf8
        } else if encoding == encoding_rs::UTF_16LE {
            Charset::Utf16Le
        } else if encoding == encoding_rs::UTF_16BE {
            Charset::Utf16Be
        } else {
            Charset::Web(encoding)
        }
    }

    /// Canonical name, e.g. `UTF-16LE` or `IBM01147`
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Utf16 => "UTF-16",
            Charset::Utf16Le => "UTF-16LE",
            Charset::Utf16Be => "UTF-16BE",
            Charset::Utf32 => "UTF-32",
            Charset::Utf32Le => "UTF-32LE",
            Charset::Utf32Be => "UTF-32BE",
            Charset::UsAscii => "US-ASCII",
            Charset::Iso8859_1 => "ISO-8859-1",
            Charset::Ebcdic(page) => page.name,
            Charset::Web(encoding) => encoding.name(),
        }
    }

    pub fn is_ebcdic(&self) -> bool {
        matches!(self, Charset::Ebcdic(_))
    }

    /// Decode bytes, replacing malformed sequences with U+FFFD
    ///
    /// A byte order mark is kept as U+FEFF except for the BOM-detecting
    /// `UTF-16` and `UTF-32` variants.
    ///
    /// EBCDIC pages only map their shared invariant subset. Characters whose
    /// position differs between pages, such as `[ ] ! | $ #`, decode to U+FFFD
    /// and do not survive a round trip through the page.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Utf16Le => decode_web(encoding_rs::UTF_16LE, bytes),
            Charset::Utf16Be => decode_web(encoding_rs::UTF_16BE, bytes),
            Charset::Utf16 => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_web(encoding_rs::UTF_16LE, rest),
                [0xFE, 0xFF, rest @ ..] => decode_web(encoding_rs::UTF_16BE, rest),
                _ => decode_web(encoding_rs::UTF_16BE, bytes),
            },
            Charset::Utf32Le => decode_utf32(bytes, u32::from_le_bytes),
            Charset::Utf32Be => decode_utf32(bytes, u32::from_be_bytes),
            Charset::Utf32 => match bytes {
                [0xFF, 0xFE, 0x00, 0x00, rest @ ..] => decode_utf32(rest, u32::from_le_bytes),
                [0x00, 0x00, 0xFE, 0xFF, rest @ ..] => decode_utf32(rest, u32::from_be_bytes),
                _ => decode_utf32(bytes, u32::from_be_bytes),
            },
            Charset::UsAscii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { char::REPLACEMENT_CHARACTER })
                .collect(),
            Charset::Iso8859_1 => bytes.iter().map(|&b| char::from(b)).collect(),
            Charset::Ebcdic(_) => bytes.iter().copied().map(ebcdic::decode_byte).collect(),
            Charset::Web(encoding) => decode_web(encoding, bytes),
        }
    }

    /// Encode text; characters the charset cannot represent become `?`
    ///
    /// The BOM-detecting variants write big endian without a BOM.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Charset::Utf8 => text.as_bytes().to_vec(),
            Charset::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
            Charset::Utf16Be | Charset::Utf16 => {
                text.encode_utf16().flat_map(u16::to_be_bytes).collect()
            }
            Charset::Utf32Le => text.chars().flat_map(|c| (c as u32).to_le_bytes()).collect(),
            Charset::Utf32Be | Charset::Utf32 => {
                text.chars().flat_map(|c| (c as u32).to_be_bytes()).collect()
            }
            Charset::UsAscii => text
                .chars()
                .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
                .collect(),
            Charset::Iso8859_1 => text
                .chars()
                .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
                .collect(),
            Charset::Ebcdic(_) => text.chars().map(ebcdic::encode_char).collect(),
            Charset::Web(encoding) => encoding.encode(text).0.into_owned(),
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn decode_web(encoding: &'static Encoding, bytes: &[u8]) -> String {
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}

fn decode_utf32(bytes: &[u8], read: fn([u8; 4]) -> u32) -> String {
    let chunks = bytes.chunks_exact(4);
    let trailing = !chunks.remainder().is_empty();
    let mut text: String = chunks
        .map(|chunk| {
            let unit = read([chunk[0], chunk[1], chunk[2], chunk[3]]);
            char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect();
    if trailing {
        text.push(char::REPLACEMENT_CHARACTER);
    }
    text
}

/// Detect a Unicode byte order mark, returning the charset and its length
pub fn detect_bom(bytes: &[u8]) -> Option<(Charset, usize)> {
    match bytes {
        [0xEF, 0xBB, 0xBF, ..] => Some((Charset::Utf8, 3)),
        [0xFF, 0xFE, 0x00, 0x00, ..] => Some((Charset::Utf32Le, 4)),
        [0x00, 0x00, 0xFE, 0xFF, ..] => Some((Charset::Utf32Be, 4)),
        [0xFF, 0xFE, ..] => Some((Charset::Utf16Le, 2)),
        [0xFE, 0xFF, ..] => Some((Charset::Utf16Be, 2)),
        _ => None,
    }
}
