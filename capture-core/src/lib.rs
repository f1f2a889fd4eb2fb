//! # Capture Core - message capture for device conformance testing
//!
//! Capture Core records every wire message exchanged with a device under test,
//! together with the manipulations the harness performed on it, and answers
//! filtered queries over both once they are durable.
//!
//! - **Capture**: transports open a [`CaptureBuffer`] per message, write the raw
//!   bytes and close it. Manipulation collaborators submit [`ManipulationRecord`]s.
//! - **Ingest**: a bounded queue feeds a pool of workers that resolve the charset,
//!   extract addressing actions and version metadata, and commit in batches.
//! - **Flush**: [`MessageStore::flush`] returns only once everything accepted
//!   before the call is committed exactly once.
//! - **Query**: the [`QueryLayer`] returns lazy, closeable results with an
//!   eager presence flag.
//!
//! Anomalies found while decoding (inconsistent charset declarations, malformed
//! version attributes, lifecycle misuse) never abort the pipeline. They are
//! reported to the [`RunObserver`], which marks the test run invalid.
//!
//! ## Example
//!
//! ```rust
//! use capture_core::{
//!     Direction, HttpInfo, MessageStore, MessageType, StoreConfig, TransportContext,
//! };
//! use std::io::Write;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = MessageStore::open(
//!     StoreConfig::new(dir.path().join("capture.sqlite")).with_worker_count(1),
//! )
//! .unwrap();
//!
//! let context = TransportContext::http(
//!     "https",
//!     HttpInfo::new("tx-1").with_header("Content-Type", "application/soap+xml; charset=utf-8"),
//! );
//! let mut capture = store
//!     .open_capture(Direction::Inbound, MessageType::Response, context)
//!     .unwrap();
//! capture
//!     .write_all(br#"<s12:Envelope xmlns:s12="http://www.w3.org/2003/05/soap-envelope"><s12:Body/></s12:Envelope>"#)
//!     .unwrap();
//! capture.close().unwrap();
//!
//! store.flush().unwrap();
//!
//! let result = store.queries().inbound_soap_response_messages().unwrap();
//! assert!(result.objects_present());
//! let messages = result.collect_all().unwrap();
//! assert_eq!(messages[0].charset, "UTF-8");
//!
//! store.close().unwrap();
//! assert!(!store.observer().is_invalid());
//! ```

pub mod capture;
pub mod charset;
pub mod config;
pub mod error;
pub mod extract;
mod ingest;
pub mod observer;
pub mod policy;
pub mod query;
pub mod storage;
pub mod store;

pub use capture::{
    CaptureBuffer, CapturedMessage, Direction, HttpInfo, ManipulationRecord, ManipulationResult,
    MessageType, TransportContext,
};
pub use charset::{Charset, CharsetReport, CharsetResolver, CharsetSource, ResolvedCharset};
pub use config::StoreConfig;
pub use error::{CaptureError, ErrorCategory, Result};
pub use extract::{BodyExtractor, Extraction, ExtractionReport, VersionGroup};
pub use observer::RunObserver;
pub use policy::{CapturePolicy, QName};
pub use query::{ManipulationFilter, MessageFilter, QueryLayer, QueryResult};
pub use storage::{Database, PersistedManipulation, PersistedMessage};
pub use store::MessageStore;

/// Crate version, recorded by the inspection tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
