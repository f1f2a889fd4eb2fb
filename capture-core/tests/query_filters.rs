//! Filter semantics of the query layer over a populated store.

use std::io::Write;
use std::time::Duration;

use capture_core::capture::monotonic_nanos;
use capture_core::policy::{MESSAGE_NAMESPACE, SOAP_NAMESPACE};
use capture_core::{
    CaptureError, Direction, HttpInfo, ManipulationFilter, ManipulationResult, MessageFilter,
    MessageStore, MessageType, QName, StoreConfig, TransportContext,
};
use tempfile::TempDir;

fn open_store() -> (TempDir, MessageStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = MessageStore::open(
        StoreConfig::new(dir.path().join("capture.sqlite"))
            .with_worker_count(2)
            .with_fetch_size(2)
            .with_poll_interval(Duration::from_micros(200)),
    )
    .unwrap();
    (dir, store)
}

fn report(element: &str, version: i64, sequence_id: &str) -> String {
    format!(
        r#"<s12:Envelope xmlns:s12="{soap}" xmlns:msg="{msg}"><s12:Body><msg:{element} MdibVersion="{version}" SequenceId="{sequence_id}"/></s12:Body></s12:Envelope>"#,
        soap = SOAP_NAMESPACE,
        msg = MESSAGE_NAMESPACE,
    )
}

fn http(content_type: &str) -> TransportContext {
    TransportContext::http("http", HttpInfo::new("tx").with_header("Content-Type", content_type))
}

fn soap_http() -> TransportContext {
    http("application/soap+xml; charset=utf-8")
}

fn put(
    store: &MessageStore,
    direction: Direction,
    message_type: MessageType,
    context: TransportContext,
    body: &str,
) {
    let mut buffer = store.open_capture(direction, message_type, context).unwrap();
    buffer.write_all(body.as_bytes()).unwrap();
    buffer.close().unwrap();
}

fn versions(result: capture_core::QueryResult<capture_core::PersistedMessage>) -> Vec<i64> {
    result
        .collect_all()
        .unwrap()
        .iter()
        .map(|m| m.version_groups[0].mdib_version)
        .collect()
}

#[test]
fn test_version_ordering_across_sequences() {
    let (_dir, store) = open_store();
    for (version, sequence) in [(5, "a"), (1, "b"), (9, "a"), (3, "b"), (7, "a")] {
        put(
            &store,
            Direction::Inbound,
            MessageType::Request,
            soap_http(),
            &report("EpisodicMetricReport", version, sequence),
        );
    }
    put(
        &store,
        Direction::Inbound,
        MessageType::Request,
        soap_http(),
        &report("WaveformStream", 2, "a"),
    );
    store.flush().unwrap();

    let queries = store.queries();
    let metric = [QName::message("EpisodicMetricReport")];
    assert_eq!(
        versions(queries.inbound_messages_by_body_type(true, &metric).unwrap()),
        vec![1, 3, 5, 7, 9]
    );
    assert_eq!(
        versions(
            queries
                .inbound_messages_by_body_type_and_sequence_id("a", &metric)
                .unwrap()
        ),
        vec![5, 7, 9]
    );

    let both = [
        QName::message("EpisodicMetricReport"),
        QName::message("WaveformStream"),
    ];
    assert_eq!(
        versions(queries.inbound_messages_by_body_type(true, &both).unwrap()),
        vec![1, 2, 3, 5, 7, 9]
    );

    let mut ids = queries.unique_sequence_ids().unwrap();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
}

#[test]
fn test_soap_detection_by_envelope_or_content_type() {
    let (_dir, store) = open_store();
    // envelope, xml content type
    put(
        &store,
        Direction::Inbound,
        MessageType::Response,
        http("application/xml"),
        &report("GetMdibResponse", 1, "s"),
    );
    // no envelope, soap content type
    put(&store, Direction::Inbound, MessageType::Request, soap_http(), "<plain/>");
    // neither
    put(&store, Direction::Inbound, MessageType::Response, http("application/xml"), "<plain/>");
    store.flush().unwrap();

    let queries = store.queries();
    assert_eq!(queries.inbound_soap_messages().unwrap().count(), 2);
    assert_eq!(queries.inbound_soap_response_messages().unwrap().count(), 1);
}

#[test]
fn test_http_scheme_filter() {
    let (_dir, store) = open_store();
    put(&store, Direction::Inbound, MessageType::Request, soap_http(), "<a/>");
    put(
        &store,
        Direction::Inbound,
        MessageType::Request,
        TransportContext::http(
            "HTTPS",
            HttpInfo::new("tx").with_header("Content-Type", "application/soap+xml"),
        ),
        "<b/>",
    );
    put(&store, Direction::Inbound, MessageType::Request, TransportContext::udp(), "<c/>");
    store.flush().unwrap();

    let http_messages = store.queries().inbound_http_messages().unwrap();
    assert!(http_messages.objects_present());
    assert_eq!(http_messages.count(), 2);
}

#[test]
fn test_outbound_http_by_body_type_and_headers() {
    let (_dir, store) = open_store();
    let with_header = |value: &str| {
        TransportContext::http(
            "http",
            HttpInfo::new("tx")
                .with_header("Content-Type", "application/soap+xml")
                .with_header("X-Trace", value),
        )
    };
    put(
        &store,
        Direction::Outbound,
        MessageType::Request,
        with_header("Alpha"),
        &report("GetMdibResponse", 1, "s"),
    );
    put(
        &store,
        Direction::Outbound,
        MessageType::Request,
        with_header("beta"),
        &report("GetMdibResponse", 2, "s"),
    );
    put(
        &store,
        Direction::Outbound,
        MessageType::Request,
        with_header("alpha"),
        "<not-a-report/>",
    );
    store.flush().unwrap();

    let body = [QName::message("GetMdibResponse")];
    let headers = vec![("x-trace".to_string(), "ALPHA".to_string())];
    let found = store
        .queries()
        .outbound_http_messages_by_body_type_and_headers(&body, &headers)
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].version_groups[0].mdib_version, 1);

    let none = store
        .queries()
        .outbound_http_messages_by_body_type_and_headers(&body, &[])
        .unwrap();
    assert!(!none.objects_present());
}

#[test]
fn test_time_interval_bounds_are_inclusive() {
    let (_dir, store) = open_store();
    let element = [QName::message("EpisodicAlertReport")];

    put(
        &store,
        Direction::Inbound,
        MessageType::Request,
        soap_http(),
        &report("EpisodicAlertReport", 1, "s"),
    );
    store.flush().unwrap();
    let start = monotonic_nanos();
    put(
        &store,
        Direction::Inbound,
        MessageType::Request,
        soap_http(),
        &report("EpisodicAlertReport", 2, "s"),
    );
    store.flush().unwrap();
    let finish = monotonic_nanos();
    put(
        &store,
        Direction::Inbound,
        MessageType::Request,
        soap_http(),
        &report("EpisodicAlertReport", 3, "s"),
    );
    store.flush().unwrap();

    let queries = store.queries();
    assert_eq!(
        versions(
            queries
                .inbound_messages_by_time_interval_and_body_type(start, finish, &element)
                .unwrap()
        ),
        vec![2]
    );

    let everything = queries
        .inbound_messages_by_body_type(false, &element)
        .unwrap()
        .collect_all()
        .unwrap();
    let stamp = everything
        .iter()
        .find(|m| m.version_groups[0].mdib_version == 3)
        .unwrap()
        .monotonic_nanos;
    assert_eq!(
        versions(
            queries
                .inbound_messages_by_time_interval_and_body_type(stamp, stamp, &element)
                .unwrap()
        ),
        vec![3]
    );
}

#[test]
fn test_sorting_requires_version_bearing_elements() {
    let (_dir, store) = open_store();
    let err = store
        .queries()
        .inbound_messages_by_time_interval_and_body_type(0, i64::MAX, &[QName::message("GetMdib")])
        .unwrap_err();
    assert!(matches!(err, CaptureError::UnsupportedBodyElement { .. }));
    assert!(err.to_string().contains("GetMdib"));
    assert!(store.observer().is_invalid());
}

#[test]
fn test_manipulation_filters() {
    let (_dir, store) = open_store();
    let params = |handle: &str, value: &str| {
        vec![
            ("handle".to_string(), handle.to_string()),
            ("value".to_string(), value.to_string()),
        ]
    };
    store
        .record_manipulation(30, 31, ManipulationResult::Success, "setValue", params("h1", "1"))
        .unwrap();
    store
        .record_manipulation(10, 11, ManipulationResult::Fail, "setValue", params("h1", "2"))
        .unwrap();
    store
        .record_manipulation(20, 21, ManipulationResult::NotSupported, "setString", params("h1", "1"))
        .unwrap();
    store.flush().unwrap();

    let queries = store.queries();
    let starts = |filter: ManipulationFilter| -> Vec<i64> {
        queries
            .manipulations(&filter)
            .unwrap()
            .map(|m| m.unwrap().start_timestamp)
            .collect()
    };

    assert_eq!(starts(ManipulationFilter::new()), vec![10, 20, 30]);
    assert_eq!(starts(ManipulationFilter::new().method("setValue")), vec![10, 30]);
    assert_eq!(
        starts(ManipulationFilter::new().methods(["setValue", "setString"])),
        vec![10, 20, 30]
    );
    assert_eq!(
        starts(ManipulationFilter::new().parameter("handle", "h1").parameter("value", "1")),
        vec![20, 30]
    );

    let by_name = queries.manipulation_data_by_manipulation(&["setString"]).unwrap();
    assert!(by_name.objects_present());
    assert_eq!(by_name.count(), 1);

    let missing = queries
        .manipulation_data_by_parameters_and_manipulation(
            &[("handle".to_string(), "h9".to_string())],
            "setValue",
        )
        .unwrap();
    assert!(!missing.objects_present());
}

#[test]
fn test_composed_message_filter() {
    let (_dir, store) = open_store();
    put(
        &store,
        Direction::Outbound,
        MessageType::Response,
        soap_http(),
        &report("OperationInvokedReport", 4, "s"),
    );
    put(
        &store,
        Direction::Outbound,
        MessageType::Request,
        soap_http(),
        &report("OperationInvokedReport", 5, "s"),
    );
    store.flush().unwrap();

    let filter = MessageFilter::new()
        .direction(Direction::Outbound)
        .message_type(MessageType::Response)
        .soap()
        .body_elements([QName::message("OperationInvokedReport")]);
    assert_eq!(versions(store.queries().messages(&filter).unwrap()), vec![4]);
}

#[test]
fn test_result_is_lazy_and_closeable() {
    let (_dir, store) = open_store();
    for i in 0..5 {
        put(
            &store,
            Direction::Inbound,
            MessageType::Request,
            soap_http(),
            &format!("<m{}/>", i),
        );
    }
    store.flush().unwrap();

    let mut result = store.queries().inbound_messages().unwrap();
    assert!(result.objects_present());
    assert!(result.next().unwrap().is_ok());
    result.close();
    assert!(result.next().is_none());

    // a result opened before more data was committed still pages through it
    let mut pending = store.queries().inbound_messages().unwrap();
    put(&store, Direction::Inbound, MessageType::Request, soap_http(), "<late/>");
    store.flush().unwrap();
    assert_eq!(pending.by_ref().count(), 6);
}

#[test]
fn test_queries_fail_after_close() {
    let (_dir, store) = open_store();
    store.close().unwrap();

    let err = store.queries().inbound_soap_messages().unwrap_err();
    assert_eq!(err.to_string(), "inbound_soap_messages called on closed storage");
    let err = store.queries().unique_sequence_ids().unwrap_err();
    assert_eq!(err.error_code(), "USED_AFTER_CLOSE");
}
