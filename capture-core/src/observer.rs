//! Run invalidation channel
//!
//! Conversion-time anomalies (charset inconsistencies, malformed bodies, missing
//! attributes) and lifecycle misuse are recorded here instead of being raised.
//! A test run with at least one recorded reason is invalid.

use std::error::Error;

use parking_lot::Mutex;
use tracing::error;

/// Collects reasons why the current test run cannot be trusted
#[derive(Debug, Default)]
pub struct RunObserver {
    reasons: Mutex<Vec<String>>,
}

impl RunObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the run invalid
    pub fn invalidate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(%reason, "test run invalidated");
        let mut reasons = self.reasons.lock();
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }

    /// Mark the run invalid, appending the cause to the reason
    pub fn invalidate_with(&self, reason: impl Into<String>, cause: &dyn Error) {
        self.invalidate(format!("{}: {}", reason.into(), cause));
    }

    pub fn is_invalid(&self) -> bool {
        !self.reasons.lock().is_empty()
    }

    /// Reasons in the order they were first reported
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }

    /// Forget all reasons, e.g. between independent test runs
    pub fn reset(&self) {
        self.reasons.lock().clear();
    }
}
