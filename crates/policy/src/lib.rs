//! The AgentGate policy gate — orchestrates every guardrail around one
//! agent operation.
//!
//! Per operation the gate runs a pre-phase
//! (`RATE_CHECK → BUDGET_CHECK → CLASSIFY`) that either admits the
//! operation — possibly with advisory warnings — or rejects it with a
//! specific reason code, and a post-phase that settles the budget hold,
//! records the actual cost, and appends the side-effect audit entry.
//!
//! The gate owns no state of its own: it is a composition of reads and
//! writes against the ledger, the rate-limit store, and the audit log,
//! plus the loaded configuration. Rejections are structured values, not
//! errors; storage failures fail closed in the pre-phase and fail open in
//! the post-phase.

pub mod decision;
pub mod gate;
pub mod request;

pub use decision::{PostReport, PreDecision, ReasonCode};
pub use gate::PolicyGate;
pub use request::{Outcome, PostRequest, PreRequest};

/// Errors opening the gate's stores.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("ledger: {0}")]
    Ledger(#[from] agentgate_ledger::LedgerError),

    #[error("rate limiter: {0}")]
    RateLimit(#[from] agentgate_ratelimit::RateLimitError),
}
