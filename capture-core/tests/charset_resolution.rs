//! Charset resolution precedence and its effect on persisted bodies.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use capture_core::{
    Charset, CharsetReport, CharsetResolver, CharsetSource, CapturePolicy, Direction, HttpInfo,
    MessageStore, MessageType, StoreConfig, TransportContext,
};

fn resolver() -> CharsetResolver {
    CharsetResolver::new(Arc::new(CapturePolicy::default())).unwrap()
}

fn header(charset: &str) -> Vec<(String, String)> {
    vec![(
        "Content-Type".to_string(),
        format!("application/soap+xml; charset={}", charset),
    )]
}

fn declared(encoding: &str) -> Vec<u8> {
    format!(r#"<?xml version="1.0" encoding="{}"?><a/>"#, encoding).into_bytes()
}

#[test]
fn test_consistent_signals_resolve_without_reports() {
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend(declared("UTF-8"));

    let resolved = resolver().resolve("m1", Direction::Inbound, &header("UTF-8"), &bytes);
    assert_eq!(resolved.charset, Charset::Utf8);
    assert_eq!(resolved.source, CharsetSource::HttpHeader);
    assert!(resolved.reports.is_empty(), "{:?}", resolved.reports);
}

#[test]
fn test_header_wins_and_reports_one_inconsistency() {
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend(declared("UTF-8"));

    let resolved = resolver().resolve("m2", Direction::Inbound, &header("ISO-8859-1"), &bytes);
    assert_eq!(resolved.charset, Charset::Iso8859_1);
    assert_eq!(resolved.inconsistencies().count(), 1);
    assert_eq!(
        resolved.inconsistencies().next().unwrap().to_string(),
        "MessageID=m2: Inconsistent charset declaration: HTTP Header states 'ISO-8859-1', \
         but Unicode Byte Order Mark for UTF-8 found"
    );
    assert!(resolved
        .reports
        .iter()
        .any(|r| matches!(r, CharsetReport::NotUtf8 { source: CharsetSource::HttpHeader, .. })));
}

#[test]
fn test_no_signal_falls_back_to_utf8() {
    let resolved = resolver().resolve("m3", Direction::Outbound, &[], b"<a/>");
    assert_eq!(resolved.charset, Charset::Utf8);
    assert_eq!(resolved.source, CharsetSource::Fallback);
    assert_eq!(resolved.reports, vec![CharsetReport::Undetermined]);
}

#[test]
fn test_declaration_used_without_header_or_bom() {
    let resolved = resolver().resolve("m4", Direction::Outbound, &[], &declared("windows-1252"));
    assert_eq!(resolved.source, CharsetSource::XmlDeclaration);
    assert_eq!(resolved.charset.name(), "windows-1252");
    assert_eq!(resolved.inconsistencies().count(), 0);
}

#[test]
fn test_utf16_bom_without_declaration() {
    let mut bytes = vec![0xFF, 0xFE];
    for unit in "<a/>".encode_utf16() {
        bytes.extend(unit.to_le_bytes());
    }
    let resolved = resolver().resolve("m5", Direction::Outbound, &[], &bytes);
    assert_eq!(resolved.charset, Charset::Utf16Le);
    assert_eq!(resolved.source, CharsetSource::ByteOrderMark);
    assert_eq!(resolved.inconsistencies().count(), 0);
}

#[test]
fn test_wrong_mime_type_reported_for_inbound_only() {
    let headers = vec![("content-type".to_string(), "text/plain; charset=utf-8".to_string())];
    let inbound = resolver().resolve("m6", Direction::Inbound, &headers, b"<a/>");
    assert!(inbound
        .reports
        .iter()
        .any(|r| matches!(r, CharsetReport::WrongMimeType { mime_type } if mime_type == "text/plain")));

    let outbound = resolver().resolve("m6", Direction::Outbound, &headers, b"<a/>");
    assert!(outbound.reports.is_empty());
}

#[test]
fn test_latin1_body_persisted_decoded_and_run_invalidated() {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(
        StoreConfig::new(dir.path().join("capture.sqlite"))
            .with_worker_count(1)
            .with_poll_interval(Duration::from_micros(200)),
    )
    .unwrap();

    let context = TransportContext::http(
        "http",
        HttpInfo::new("tx").with_header("Content-Type", "application/soap+xml; charset=ISO-8859-1"),
    );
    let mut buffer = store
        .open_capture(Direction::Inbound, MessageType::Response, context)
        .unwrap();
    buffer.write_all(b"<a>caf\xE9</a>").unwrap();
    buffer.close().unwrap();
    store.flush().unwrap();

    let message = store
        .queries()
        .inbound_messages()
        .unwrap()
        .collect_all()
        .unwrap()
        .remove(0);
    assert_eq!(message.body, "<a>café</a>");
    assert_eq!(message.charset, "ISO-8859-1");
    assert!(store.observer().is_invalid());
    assert!(store.observer().reasons()[0].contains("ISO-8859-1"));
}

#[test]
fn test_ebcdic_declared_body_is_decoded() {
    let charset = Charset::ebcdic(1047).unwrap();
    let text = r#"<?xml version="1.0" encoding="IBM1047"?><a>EBCDIC</a>"#;
    let bytes = charset.encode(text);

    let resolved = resolver().resolve("m7", Direction::Outbound, &[], &bytes);
    assert_eq!(resolved.charset, charset);
    assert_eq!(resolved.inconsistencies().count(), 0);
    assert_eq!(resolved.charset.decode(&bytes), text);
}
