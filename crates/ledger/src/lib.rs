//! Budget ledger for AgentGate — append-only cost records with daily and
//! per-session aggregation, and an atomic check-and-reserve admission path.
//!
//! Costs are tracked as decimal USD with cent precision: every amount is
//! stored as integer cents and all comparisons happen in cents, so sums
//! are exact. A projected total equal to a limit passes; strictly greater
//! fails.
//!
//! The budget check and the hold on the estimated cost are fused into a
//! single conditional `INSERT`, which SQLite executes atomically under its
//! own file locking. Two concurrent gate processes therefore cannot both
//! pass a limit they jointly exceed.

pub mod model;
pub mod store;

pub use model::{
    BudgetDecision, BudgetLimits, CostRecord, cents_to_usd, usd_to_cents,
};
pub use store::CostLedger;

/// Errors from the budget ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("invalid cost record: {0}")]
    InvalidRecord(String),
}
