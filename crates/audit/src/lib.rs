//! Audit logging for AgentGate — a durable, rotating, retention-bounded
//! append log of every decision and side effect.
//!
//! One self-describing JSON record per line. The live file (`audit.log`)
//! is append-only; rotation renames completed segments
//! (`audit.log` → `audit.log.1` → … → `audit.log.N`) and never edits
//! them. Rotated segments strictly older than the retention period are
//! deleted opportunistically on append — no scheduler.
//!
//! An exclusive advisory lock on `audit.lock` serializes the
//! rotate-and-append critical section across processes.

pub mod log;
pub mod model;

pub use log::{AuditSink, FileAuditLog, TracingSink};
pub use model::{AuditEntry, AuditEvent};

/// Errors from the audit subsystem.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
