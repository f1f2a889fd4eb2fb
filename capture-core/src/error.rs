//! Error types for capture operations
//!
//! Every fallible operation in the crate returns [`CaptureError`]. Errors carry:
//! - A human-readable message
//! - A stable error code for programmatic handling
//! - A category for grouping
//!
//! Anomalies found while decoding or inspecting a single message are *not*
//! errors. They are reported through the [`RunObserver`](crate::observer::RunObserver)
//! so one malformed message never aborts the pipeline.
//!
//! # Example
//!
//! ```rust
//! use capture_core::error::{CaptureError, ErrorCategory};
//!
//! fn handle(err: CaptureError) {
//!     match err.category() {
//!         ErrorCategory::Lifecycle => println!("store already closed"),
//!         ErrorCategory::Integrity => println!("storage integrity violated"),
//!         _ => println!("other error: {}", err),
//!     }
//!
//!     if err.is_fatal() {
//!         println!("test run can no longer be trusted");
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Store or capture used outside its open lifetime
    Lifecycle,
    /// A blocking wait was torn down underneath the caller
    Interrupted,
    /// Persisted identifiers are missing or duplicated
    Integrity,
    /// Storage engine failure
    Storage,
    /// Configuration or argument rejected
    Validation,
    /// Query shape the store cannot answer
    Unsupported,
    /// I/O or serialization outside the storage engine
    External,
}

/// Errors that can occur in capture operations
#[derive(Error, Debug)]
pub enum CaptureError {
    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle errors (store and capture open/close)
    // ═══════════════════════════════════════════════════════════════════════

    /// An operation was invoked after the store was closed
    #[error("{operation} called on closed storage")]
    UsedAfterClose { operation: &'static str },

    /// Bytes were written to a capture that was already closed
    #[error("Message write called on closed message")]
    WriteAfterClose,

    // ═══════════════════════════════════════════════════════════════════════
    // Interruption errors (queue and barrier waits)
    // ═══════════════════════════════════════════════════════════════════════

    /// The ingestion queue lost its other side while a caller was blocked on it
    #[error("Ingestion queue disconnected while waiting")]
    QueueDisconnected,

    /// A flush rendezvous could not complete
    #[error("Flush barrier broken: {reason}")]
    BarrierBroken { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Integrity errors (post-commit verification)
    // ═══════════════════════════════════════════════════════════════════════

    /// An identifier was found more than once after a commit
    #[error("Duplicate identifier '{id}' found in database")]
    DuplicateIdentifier { id: String },

    /// An identifier never became visible after a commit
    #[error("Identifier '{id}' not visible after {attempts} verification attempts")]
    MissingIdentifier { id: String, attempts: usize },

    // ═══════════════════════════════════════════════════════════════════════
    // Query errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Sorting was requested for an element that carries no version groups
    #[error(
        "Filtering for the given element name is not supported due to MdibVersionGroups \
         not being parsed for elements with the name {name} ."
    )]
    UnsupportedBodyElement { name: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Configuration errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Store configuration rejected by validation
    #[error("Invalid store configuration: {reason}")]
    InvalidConfig { reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (storage engine, serialization, I/O)
    // ═══════════════════════════════════════════════════════════════════════

    /// SQLite reported an error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl CaptureError {
    /// Returns true if this error means the test run can no longer be trusted
    ///
    /// Fatal errors include:
    /// - Interrupted blocking waits (uncontrolled shutdown)
    /// - Duplicate or missing identifiers after a commit
    /// - Internal errors
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::QueueDisconnected
                | CaptureError::BarrierBroken { .. }
                | CaptureError::DuplicateIdentifier { .. }
                | CaptureError::MissingIdentifier { .. }
                | CaptureError::InternalError { .. }
        )
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            CaptureError::UsedAfterClose { .. } | CaptureError::WriteAfterClose => {
                ErrorCategory::Lifecycle
            }

            CaptureError::QueueDisconnected | CaptureError::BarrierBroken { .. } => {
                ErrorCategory::Interrupted
            }

            CaptureError::DuplicateIdentifier { .. }
            | CaptureError::MissingIdentifier { .. }
            | CaptureError::InternalError { .. } => ErrorCategory::Integrity,

            CaptureError::UnsupportedBodyElement { .. } => ErrorCategory::Unsupported,

            CaptureError::InvalidConfig { .. } => ErrorCategory::Validation,

            CaptureError::Storage(_) => ErrorCategory::Storage,

            CaptureError::Io(_) | CaptureError::Json(_) => ErrorCategory::External,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            CaptureError::UsedAfterClose { .. } => "USED_AFTER_CLOSE",
            CaptureError::WriteAfterClose => "WRITE_AFTER_CLOSE",
            CaptureError::QueueDisconnected => "QUEUE_DISCONNECTED",
            CaptureError::BarrierBroken { .. } => "BARRIER_BROKEN",
            CaptureError::DuplicateIdentifier { .. } => "DUPLICATE_IDENTIFIER",
            CaptureError::MissingIdentifier { .. } => "MISSING_IDENTIFIER",
            CaptureError::UnsupportedBodyElement { .. } => "UNSUPPORTED_BODY_ELEMENT",
            CaptureError::InvalidConfig { .. } => "INVALID_CONFIG",
            CaptureError::Storage(_) => "STORAGE_ERROR",
            CaptureError::Io(_) => "IO_ERROR",
            CaptureError::Json(_) => "JSON_ERROR",
            CaptureError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Convenience constructor for [`CaptureError::InternalError`]
    pub fn internal(reason: impl Into<String>) -> Self {
        CaptureError::InternalError {
            reason: reason.into(),
        }
    }
}

impl From<CaptureError> for std::io::Error {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Io(inner) => inner,
            other => std::io::Error::other(other.to_string()),
        }
    }
}
