//! End-to-end capture, flush and retrieval through the message store.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use capture_core::policy::SOAP_NAMESPACE;
use capture_core::{
    CaptureError, Direction, HttpInfo, ManipulationResult, MessageStore, MessageType,
    StoreConfig, TransportContext,
};
use tempfile::TempDir;

fn open_store(workers: usize) -> (TempDir, MessageStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new(dir.path().join("capture.sqlite"))
        .with_worker_count(workers)
        .with_queue_capacity(16)
        .with_insert_batch_size(4)
        .with_poll_interval(Duration::from_micros(200));
    let store = MessageStore::open(config).expect("store opens");
    (dir, store)
}

fn utf8_context() -> TransportContext {
    TransportContext::http(
        "https",
        HttpInfo::new("tx").with_header("Content-Type", "application/soap+xml; charset=UTF-8"),
    )
    .with_local("10.0.0.1", 6464)
    .with_remote("10.0.0.2", 443)
}

fn capture(store: &MessageStore, direction: Direction, body: &str) {
    let mut buffer = store
        .open_capture(direction, MessageType::Request, utf8_context())
        .expect("capture opens");
    buffer.write_all(body.as_bytes()).expect("write");
    buffer.close().expect("close");
}

#[test]
fn test_write_close_round_trip_preserves_unicode() {
    let (_dir, store) = open_store(2);
    let bodies = [
        "<a/>",
        "<a>ünïcödé</a>",
        "<a>\u{1F600} astral plane</a>",
        "<a>\u{FFFD}\u{200B}zero width</a>",
        "",
    ];
    for body in bodies {
        capture(&store, Direction::Outbound, body);
    }
    store.flush().unwrap();

    let mut stored: Vec<String> = store
        .queries()
        .outbound_messages()
        .unwrap()
        .collect_all()
        .unwrap()
        .into_iter()
        .map(|message| message.body)
        .collect();
    stored.sort();
    let mut expected: Vec<String> = bodies.iter().map(|b| b.to_string()).collect();
    expected.sort();
    assert_eq!(stored, expected);
    assert!(!store.observer().is_invalid(), "{:?}", store.observer().reasons());
}

#[test]
fn test_transport_details_are_persisted() {
    let (_dir, store) = open_store(1);
    capture(&store, Direction::Inbound, "<a/>");
    store.flush().unwrap();

    let message = store
        .queries()
        .inbound_http_messages()
        .unwrap()
        .collect_all()
        .unwrap()
        .remove(0);
    assert_eq!(message.scheme, "https");
    assert_eq!(message.local_port, Some(6464));
    assert_eq!(message.remote_address.as_deref(), Some("10.0.0.2"));
    assert_eq!(message.transaction_id.as_deref(), Some("tx"));
    assert_eq!(message.header_values("content-type").len(), 1);
    assert_eq!(message.charset, "UTF-8");
    assert_eq!(message.message_hash.len(), 64);
}

#[test]
fn test_double_close_enqueues_once() {
    let (_dir, store) = open_store(2);
    let mut buffer = store
        .open_capture(Direction::Inbound, MessageType::Request, utf8_context())
        .unwrap();
    buffer.write_all(b"<once/>").unwrap();
    buffer.close().unwrap();
    buffer.close().unwrap();
    store.flush().unwrap();

    assert_eq!(store.queries().inbound_messages().unwrap().count(), 1);
}

#[test]
fn test_write_after_close_fails() {
    let (_dir, store) = open_store(1);
    let mut buffer = store
        .open_capture(Direction::Inbound, MessageType::Request, utf8_context())
        .unwrap();
    buffer.close().unwrap();
    assert!(buffer.write_all(b"late").is_err());
    assert!(buffer.flush().is_err());
}

#[test]
fn test_filtered_retrieval_counts() {
    let (_dir, store) = open_store(3);
    for i in 0..7 {
        capture(&store, Direction::Inbound, &format!("<in n=\"{}\"/>", i));
    }
    for i in 0..3 {
        capture(&store, Direction::Outbound, &format!("<out n=\"{}\"/>", i));
    }
    store.flush().unwrap();

    let queries = store.queries();
    let inbound = queries.inbound_messages().unwrap();
    assert!(inbound.objects_present());
    assert_eq!(inbound.count(), 7);

    let outbound = queries.outbound_messages().unwrap();
    assert!(outbound.objects_present());
    assert_eq!(outbound.count(), 3);
}

#[test]
fn test_flush_is_durable_under_concurrent_submission() {
    let (_dir, store) = open_store(2);
    let store = Arc::new(store);

    let producer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mut ids = Vec::new();
            for i in 0..200 {
                let id = store
                    .record_manipulation(i, i + 1, ManipulationResult::Success, "poke", vec![])
                    .unwrap();
                ids.push(id);
            }
            ids
        })
    };

    for i in 0..20 {
        capture(&store, Direction::Inbound, &format!("<m n=\"{}\"/>", i));
        store.flush().unwrap();
        assert_eq!(
            store.queries().inbound_messages().unwrap().count(),
            i as usize + 1
        );
    }

    let ids = producer.join().unwrap();
    store.flush().unwrap();

    let mut stored: Vec<_> = store
        .queries()
        .manipulation_data()
        .unwrap()
        .collect_all()
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    stored.sort();
    let mut expected = ids;
    expected.sort();
    assert_eq!(stored, expected);
}

#[test]
fn test_close_commits_pending_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.sqlite");
    {
        let store = MessageStore::open(StoreConfig::new(&path).with_worker_count(2)).unwrap();
        capture(&store, Direction::Inbound, "<pending/>");
        store.close().unwrap();
    }

    let queries = capture_core::QueryLayer::open_existing(
        &path,
        Default::default(),
        10,
        Duration::from_secs(1),
    )
    .unwrap();
    assert_eq!(queries.inbound_messages().unwrap().count(), 1);
}

#[test]
fn test_dropped_capture_is_persisted() {
    let (_dir, store) = open_store(1);
    {
        let mut buffer = store
            .open_capture(Direction::Outbound, MessageType::Response, utf8_context())
            .unwrap();
        buffer.write_all(b"<dropped/>").unwrap();
    }
    store.flush().unwrap();
    assert_eq!(store.queries().outbound_messages().unwrap().count(), 1);
}

#[test]
fn test_capture_closed_after_store_close_invalidates_run() {
    let (_dir, store) = open_store(1);
    let mut buffer = store
        .open_capture(Direction::Inbound, MessageType::Request, utf8_context())
        .unwrap();
    store.close().unwrap();

    let err = buffer.close().unwrap_err();
    assert!(matches!(
        err,
        CaptureError::UsedAfterClose {
            operation: "add_message"
        }
    ));
    assert_eq!(
        store.observer().reasons(),
        vec!["add_message called on closed storage".to_string()]
    );
}

#[test]
fn test_empty_bodies_do_not_invalidate_run() {
    let (_dir, store) = open_store(2);

    let udp = store
        .open_capture(Direction::Inbound, MessageType::Unknown, TransportContext::udp())
        .unwrap();
    drop(udp);

    let mut accepted = store
        .open_capture(
            Direction::Inbound,
            MessageType::Response,
            TransportContext::http("http", HttpInfo::new("tx-202")),
        )
        .unwrap();
    accepted.close().unwrap();
    store.flush().unwrap();

    let messages = store
        .queries()
        .inbound_messages()
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(messages.len(), 2);
    for message in &messages {
        assert_eq!(message.body, "");
        assert_eq!(message.charset, "UTF-8");
        assert!(!message.is_soap);
        assert!(message.version_groups.is_empty());
    }
    assert!(!store.observer().is_invalid(), "{:?}", store.observer().reasons());
}

#[test]
fn test_multiple_body_children_persisted_with_one_report() {
    let (_dir, store) = open_store(1);
    let body = format!(
        r#"<s12:Envelope xmlns:s12="{}"><s12:Body><first/><second/></s12:Body></s12:Envelope>"#,
        SOAP_NAMESPACE
    );
    capture(&store, Direction::Inbound, &body);
    store.flush().unwrap();

    let messages = store
        .queries()
        .inbound_messages()
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body, body);
    assert!(messages[0].is_soap);
    assert_eq!(
        store.observer().reasons(),
        vec![
            "Encountered multiple elements in soap body, but more than one are not allowed."
                .to_string()
        ]
    );
}
