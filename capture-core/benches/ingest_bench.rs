//! Benchmarks for the conversion path of captured messages
//!
//! Charset resolution and body extraction run once per message on the
//! persistence workers.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use capture_core::policy::{MESSAGE_NAMESPACE, SOAP_NAMESPACE, WSA_NAMESPACE};
use capture_core::{BodyExtractor, CapturePolicy, CharsetResolver, Direction};

fn report(metrics: usize) -> String {
    let mut states = String::new();
    for i in 0..metrics {
        states.push_str(&format!(
            r#"<msg:MetricState DescriptorHandle="numeric.{i}" StateVersion="{i}"><msg:Value>{i}</msg:Value></msg:MetricState>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><s12:Envelope xmlns:s12="{SOAP_NAMESPACE}" xmlns:wsa="{WSA_NAMESPACE}" xmlns:msg="{MESSAGE_NAMESPACE}"><s12:Header><wsa:Action>urn:episodic</wsa:Action></s12:Header><s12:Body><msg:EpisodicMetricReport MdibVersion="42" SequenceId="urn:uuid:bench">{states}</msg:EpisodicMetricReport></s12:Body></s12:Envelope>"#
    )
}

fn bench_charset_resolution(c: &mut Criterion) {
    let resolver = CharsetResolver::new(Arc::new(CapturePolicy::default())).unwrap();
    let headers = vec![(
        "Content-Type".to_string(),
        "application/soap+xml; charset=utf-8".to_string(),
    )];
    let body = report(10).into_bytes();

    let mut group = c.benchmark_group("charset_resolution");
    group.bench_function("header_and_declaration", |b| {
        b.iter(|| resolver.resolve("bench", Direction::Inbound, black_box(&headers), black_box(&body)))
    });
    group.bench_function("declaration_only", |b| {
        b.iter(|| resolver.resolve("bench", Direction::Outbound, &[], black_box(&body)))
    });
    group.finish();
}

fn bench_body_extraction(c: &mut Criterion) {
    let extractor = BodyExtractor::new(Arc::new(CapturePolicy::default()));

    let mut group = c.benchmark_group("body_extraction");
    for metrics in [1, 50, 500] {
        let body = report(metrics);
        group.bench_with_input(BenchmarkId::new("metrics", metrics), &body, |b, body| {
            b.iter(|| extractor.extract(black_box(body)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_charset_resolution, bench_body_extraction);
criterion_main!(benches);
