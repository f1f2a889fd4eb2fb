//! Conversion of queued entries into persisted rows

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::capture::{CapturedMessage, ManipulationRecord};
use crate::charset::{Charset, CharsetResolver};
use crate::error::Result;
use crate::extract::{BodyExtractor, Extraction};
use crate::observer::RunObserver;
use crate::policy::CapturePolicy;
use crate::storage::{PersistedManipulation, PersistedMessage};

/// Decodes and inspects captured messages
///
/// Every anomaly found on the way is forwarded to the run observer; conversion
/// itself never fails.
#[derive(Debug, Clone)]
pub(crate) struct Converter {
    resolver: CharsetResolver,
    extractor: BodyExtractor,
    observer: Arc<RunObserver>,
}

impl Converter {
    pub(crate) fn new(policy: Arc<CapturePolicy>, observer: Arc<RunObserver>) -> Result<Self> {
        Ok(Self {
            resolver: CharsetResolver::new(Arc::clone(&policy))?,
            extractor: BodyExtractor::new(policy),
            observer,
        })
    }

    pub(crate) fn message(&self, message: &CapturedMessage) -> PersistedMessage {
        let context = message.context();
        let id = message.id().to_string();

        // empty bodies carry no charset signal and nothing to inspect
        let (charset, body, extraction) = if message.bytes().is_empty() {
            (Charset::Utf8, String::new(), Extraction::default())
        } else {
            let resolved = self.resolver.resolve(
                &id,
                message.direction(),
                context.headers(),
                message.bytes(),
            );
            for report in &resolved.reports {
                self.observer.invalidate(report.to_string());
            }

            let body = resolved.charset.decode(message.bytes());
            let extraction = self.extractor.extract(&body);
            for report in &extraction.reports {
                self.observer.invalidate(report.to_string());
            }
            (resolved.charset, body, extraction)
        };

        let http = context.http_info();
        PersistedMessage {
            id: message.id(),
            message_hash: hash_body(&body),
            body,
            charset: charset.name().to_string(),
            direction: message.direction(),
            message_type: message.message_type(),
            timestamp_millis: message.timestamp_millis(),
            monotonic_nanos: message.monotonic_nanos(),
            scheme: context.scheme.clone(),
            local_address: context.local_address.clone(),
            local_port: context.local_port,
            remote_address: context.remote_address.clone(),
            remote_port: context.remote_port,
            transaction_id: http.map(|info| info.transaction_id.clone()),
            request_uri: http.and_then(|info| info.request_uri.clone()),
            is_soap: extraction.is_soap,
            headers: context.headers().to_vec(),
            actions: extraction.actions,
            version_groups: extraction.version_groups,
            certificates: context.certificates.clone(),
        }
    }

    pub(crate) fn manipulation(&self, record: &ManipulationRecord) -> PersistedManipulation {
        PersistedManipulation {
            id: record.id(),
            start_timestamp: record.start_timestamp(),
            finish_timestamp: record.finish_timestamp(),
            result: record.result(),
            method_name: record.method_name().to_string(),
            parameters: record.parameters().to_vec(),
        }
    }
}

/// Lowercase hex SHA-256 of the body's UTF-8 bytes
pub(crate) fn hash_body(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}
