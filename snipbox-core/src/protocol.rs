//! Boundary Protocol - Request/Response Envelopes
//!
//! Everything that crosses the isolation boundary is one of the two envelopes
//! defined here. A request carries its inputs as serialized JSON text, never
//! as live host values, so the snippet can only ever see a copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExecutionError;
use crate::language::Language;

/// The input bundle handed to a snippet as `inputs`.
pub type Inputs = serde_json::Map<String, serde_json::Value>;

/// Token pairing one outgoing request with its eventual (or absent) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A single evaluation as seen by the dispatcher.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub id: CorrelationId,
    pub code: String,
    pub language: Language,
    pub inputs: Inputs,
}

/// Wire form of a request once it is posted into the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryRequest {
    pub id: CorrelationId,
    pub code: String,
    pub inputs_json: String,
    /// Caller budget, reported back in the timeout message.
    pub timeout_ms: u64,
    /// When the caller stops waiting. The boundary interrupts the run here
    /// and skips the request entirely if it is already past.
    pub deadline: DateTime<Utc>,
}

impl BoundaryRequest {
    /// Time left before the deadline, or `None` once it has passed.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        (self.deadline - Utc::now()).to_std().ok().filter(|left| !left.is_zero())
    }
}

/// Exactly one of these is emitted per [`BoundaryRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryResponse {
    pub id: CorrelationId,
    pub result: ExecutionResult,
    /// The return value fell back to its string form.
    #[serde(default)]
    pub degraded: bool,
    /// The run was cut off at (or skipped past) its deadline.
    #[serde(default)]
    pub interrupted: bool,
}

/// Outcome of one evaluation, persisted by collaborators as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Successful evaluation with optional captured output and return value.
    pub fn success(output: Option<String>, return_value: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            output,
            return_value,
            markup_output: None,
            error: None,
            executed_at: Utc::now(),
        }
    }

    /// Successful result with nothing to report (empty snippet).
    pub fn empty() -> Self {
        Self::success(None, None)
    }

    /// Markup document handed back untouched, never evaluated.
    pub fn passthrough(document: &str) -> Self {
        Self {
            markup_output: Some(document.to_string()),
            ..Self::success(Some(document.to_string()), None)
        }
    }

    /// Failed evaluation. `output` keeps whatever was logged before the failure.
    pub fn failure(error: ExecutionError, output: Option<String>) -> Self {
        Self {
            success: false,
            output,
            return_value: None,
            markup_output: None,
            error: Some(error.to_string()),
            executed_at: Utc::now(),
        }
    }
}
