//! Gate verdicts — structured accept/reject values with reason codes.

use serde::{Deserialize, Serialize};

/// Why the gate rejected an operation.
///
/// Each code maps to a distinct process exit code for scripts embedding
/// the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The daily budget would be exceeded.
    DailyBudget,
    /// The per-session spending limit would be exceeded.
    SessionLimit,
    /// The agent is over its hourly call budget.
    RateLimit,
    /// The operation matches a hard-blocked pattern.
    BlockedOperation,
    /// A budget or rate store could not be evaluated; the gate fails
    /// closed rather than waving the operation through unchecked.
    StoreUnavailable,
}

impl ReasonCode {
    /// The exit code scripts embedding the gate receive.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::DailyBudget => 1,
            Self::SessionLimit => 2,
            Self::RateLimit => 3,
            Self::BlockedOperation => 4,
            Self::StoreUnavailable => 5,
        }
    }

    /// The stable string form used in audit records and JSON output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyBudget => "daily_budget",
            Self::SessionLimit => "session_limit",
            Self::RateLimit => "rate_limit",
            Self::BlockedOperation => "blocked_operation",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pre-phase verdict handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreDecision {
    /// Whether the caller may perform the operation.
    pub allowed: bool,
    /// Set on rejections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<ReasonCode>,
    /// Human-readable explanation of a rejection; empty when allowed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Advisory findings to relay (sensitive paths, expensive operation).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Budget hold to pass back to the post-phase, when one was placed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
}

impl PreDecision {
    /// An accepting decision.
    pub fn accept(warnings: Vec<String>, reservation_id: Option<String>) -> Self {
        Self {
            allowed: true,
            reason_code: None,
            reason: String::new(),
            warnings,
            reservation_id,
        }
    }

    /// A rejecting decision.
    pub fn reject(code: ReasonCode, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason_code: Some(code),
            reason: reason.into(),
            warnings: Vec::new(),
            reservation_id: None,
        }
    }

    /// The exit code for scripts embedding the gate: 0 when allowed,
    /// otherwise the reason code's mapping.
    pub fn exit_code(&self) -> i32 {
        match (self.allowed, self.reason_code) {
            (true, _) => 0,
            (false, Some(code)) => code.exit_code(),
            (false, None) => 1,
        }
    }
}

/// The post-phase outcome report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostReport {
    /// Whether the side-effect audit entry reached the log.
    pub audit_written: bool,
    /// First failure encountered, when any. The caller's action is never
    /// unwound because of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
