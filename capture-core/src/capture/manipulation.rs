use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome reported by the manipulation dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManipulationResult {
    Success,
    Fail,
    NotSupported,
    NotImplemented,
}

impl ManipulationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManipulationResult::Success => "RESULT_SUCCESS",
            ManipulationResult::Fail => "RESULT_FAIL",
            ManipulationResult::NotSupported => "RESULT_NOT_SUPPORTED",
            ManipulationResult::NotImplemented => "RESULT_NOT_IMPLEMENTED",
        }
    }
}

impl fmt::Display for ManipulationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ManipulationResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RESULT_SUCCESS" => Ok(ManipulationResult::Success),
            "RESULT_FAIL" => Ok(ManipulationResult::Fail),
            "RESULT_NOT_SUPPORTED" => Ok(ManipulationResult::NotSupported),
            "RESULT_NOT_IMPLEMENTED" => Ok(ManipulationResult::NotImplemented),
            other => Err(format!("unknown manipulation result '{}'", other)),
        }
    }
}

/// Audit entry for one device manipulation
///
/// Immutable once built; persisted unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManipulationRecord {
    id: Uuid,
    start_timestamp: i64,
    finish_timestamp: i64,
    result: ManipulationResult,
    method_name: String,
    parameters: Vec<(String, String)>,
}

impl ManipulationRecord {
    pub fn new(
        start_timestamp: i64,
        finish_timestamp: i64,
        result: ManipulationResult,
        method_name: impl Into<String>,
        parameters: Vec<(String, String)>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_timestamp,
            finish_timestamp,
            result,
            method_name: method_name.into(),
            parameters,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn start_timestamp(&self) -> i64 {
        self.start_timestamp
    }

    pub fn finish_timestamp(&self) -> i64 {
        self.finish_timestamp
    }

    pub fn result(&self) -> ManipulationResult {
        self.result
    }

    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Parameters in call order
    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}
