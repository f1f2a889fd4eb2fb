//! EBCDIC code pages
//!
//! Only the invariant character subset shared by the supported country code
//! pages is mapped (letters, digits, the XML markup punctuation and layout
//! controls). Anything outside it decodes to U+FFFD.

/// An IBM EBCDIC code page
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CodePage {
    pub number: u16,
    pub name: &'static str,
}

pub(crate) static CODE_PAGES: &[CodePage] = &[
    CodePage { number: 37, name: "IBM037" },
    CodePage { number: 273, name: "IBM273" },
    CodePage { number: 277, name: "IBM277" },
    CodePage { number: 278, name: "IBM278" },
    CodePage { number: 280, name: "IBM280" },
    CodePage { number: 284, name: "IBM284" },
    CodePage { number: 285, name: "IBM285" },
    CodePage { number: 297, name: "IBM297" },
    CodePage { number: 500, name: "IBM500" },
    CodePage { number: 871, name: "IBM871" },
    CodePage { number: 1047, name: "IBM1047" },
    CodePage { number: 1140, name: "IBM01140" },
    CodePage { number: 1141, name: "IBM01141" },
    CodePage { number: 1142, name: "IBM01142" },
    CodePage { number: 1143, name: "IBM01143" },
    CodePage { number: 1144, name: "IBM01144" },
    CodePage { number: 1145, name: "IBM01145" },
    CodePage { number: 1146, name: "IBM01146" },
    CodePage { number: 1147, name: "IBM01147" },
    CodePage { number: 1148, name: "IBM01148" },
    CodePage { number: 1149, name: "IBM01149" },
];

/// Country code page and its euro-enabled successor
const EURO_VARIANTS: &[(u16, u16)] = &[
    (37, 1140),
    (273, 1141),
    (277, 1142),
    (278, 1143),
    (280, 1144),
    (284, 1145),
    (285, 1146),
    (297, 1147),
    (500, 1148),
    (871, 1149),
];

/// `ebcdic-cp-*` aliases without an embedded code page number
const COUNTRY_ALIASES: &[(&str, u16)] = &[
    ("ebcdic-cp-us", 37),
    ("ebcdic-cp-ca", 37),
    ("ebcdic-cp-wt", 37),
    ("ebcdic-cp-nl", 37),
    ("ebcdic-cp-de", 273),
    ("ebcdic-cp-dk", 277),
    ("ebcdic-cp-no", 277),
    ("ebcdic-cp-fi", 278),
    ("ebcdic-cp-se", 278),
    ("ebcdic-cp-it", 280),
    ("ebcdic-cp-es", 284),
    ("ebcdic-cp-gb", 285),
    ("ebcdic-gb", 285),
    ("ebcdic-cp-fr", 297),
    ("ebcdic-cp-ch", 500),
    ("ebcdic-cp-be", 500),
    ("ebcdic-cp-is", 871),
];

pub(crate) fn by_number(number: u16) -> Option<&'static CodePage> {
    CODE_PAGES.iter().find(|page| page.number == number)
}

/// Look up a lowercased label such as `cp1147`, `ibm-037` or `ebcdic-gb-285+euro`
pub(crate) fn lookup(label: &str) -> Option<&'static CodePage> {
    if let Some(&(_, number)) = COUNTRY_ALIASES.iter().find(|(alias, _)| *alias == label) {
        return by_number(number);
    }

    if label.starts_with("ebcdic-") {
        let last = label.rsplit('-').next()?;
        let (digits, euro) = match last.strip_suffix("+euro") {
            Some(digits) => (digits, true),
            None => (last, false),
        };
        let base: u16 = digits.parse().ok()?;
        let number = if euro {
            EURO_VARIANTS
                .iter()
                .find(|(country, _)| *country == base)
                .map(|(_, euro)| *euro)?
        } else {
            base
        };
        return by_number(number);
    }

    let digits = ["x-ibm", "ibm-", "ibm", "cp-", "cp", "ccsid"]
        .iter()
        .find_map(|prefix| label.strip_prefix(prefix))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    by_number(digits.parse().ok()?)
}

/// Invariant subset only; page-specific positions yield U+FFFD
pub(crate) fn decode_byte(byte: u8) -> char {
    match byte {
        0x05 => '\t',
        0x0D => '\r',
        0x15 | 0x25 => '\n',
        0x40 => ' ',
        0x4B => '.',
        0x4C => '<',
        0x4D => '(',
        0x4E => '+',
        0x50 => '&',
        0x5C => '*',
        0x5D => ')',
        0x5E => ';',
        0x60 => '-',
        0x61 => '/',
        0x6B => ',',
        0x6C => '%',
        0x6D => '_',
        0x6E => '>',
        0x6F => '?',
        0x7A => ':',
        0x7D => '\'',
        0x7E => '=',
        0x7F => '"',
        0x81..=0x89 => char::from(b'a' + (byte - 0x81)),
        0x91..=0x99 => char::from(b'j' + (byte - 0x91)),
        0xA2..=0xA9 => char::from(b's' + (byte - 0xA2)),
        0xC1..=0xC9 => char::from(b'A' + (byte - 0xC1)),
        0xD1..=0xD9 => char::from(b'J' + (byte - 0xD1)),
        0xE2..=0xE9 => char::from(b'S' + (byte - 0xE2)),
        0xF0..=0xF9 => char::from(b'0' + (byte - 0xF0)),
        _ => char::REPLACEMENT_CHARACTER,
    }
}

/// Inverse of [`decode_byte`]; unmapped characters become `?`
pub(crate) fn encode_char(c: char) -> u8 {
    match c {
        '\t' => 0x05,
        '\r' => 0x0D,
        '\n' => 0x25,
        ' ' => 0x40,
        '.' => 0x4B,
        '<' => 0x4C,
        '(' => 0x4D,
        '+' => 0x4E,
        '&' => 0x50,
        '*' => 0x5C,
        ')' => 0x5D,
        ';' => 0x5E,
        '-' => 0x60,
        '/' => 0x61,
        ',' => 0x6B,
        '%' => 0x6C,
        '_' => 0x6D,
        '>' => 0x6E,
        ':' => 0x7A,
        '\'' => 0x7D,
        '=' => 0x7E,
        '"' => 0x7F,
        'a'..='i' => 0x81 + (c as u8 - b'a'),
        'j'..='r' => 0x91 + (c as u8 - b'j'),
        's'..='z' => 0xA2 + (c as u8 - b's'),
        'A'..='I' => 0xC1 + (c as u8 - b'A'),
        'J'..='R' => 0xD1 + (c as u8 - b'J'),
        'S'..='Z' => 0xE2 + (c as u8 - b'S'),
        '0'..='9' => 0xF0 + (c as u8 - b'0'),
        _ => 0x6F,
    }
}
