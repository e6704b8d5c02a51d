//! Caller-facing request types for the pre- and post-phases.

use serde::{Deserialize, Serialize};

/// What a caller submits before performing an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreRequest {
    /// Agent attempting the operation.
    pub agent: String,
    /// The operation itself (command line, description, SQL, …).
    pub operation: String,
    /// Tool being invoked, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// File the operation touches, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Estimated cost of the operation in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
    /// Session the operation belongs to.
    pub session_id: String,
}

/// How the performed operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// What a caller reports after performing (or failing) an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRequest {
    pub agent: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Diff of a file change, when the caller captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    /// External service name, when the operation was an API call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Target of an API call (model, endpoint, resource).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub session_id: String,
    pub outcome: Outcome,
    /// Actual cost incurred, in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Model behind the cost, when it came from an LLM call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
    /// The budget hold returned by the pre-phase, to settle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}
