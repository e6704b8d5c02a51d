//! Sensitive-operation classification for AgentGate.
//!
//! Matches a candidate operation and its file path against three
//! configured pattern lists:
//! - **sensitive paths** — advisory, warn only
//! - **sensitive filename patterns** — advisory, warn only
//! - **blocked operations** — hard, the gate must reject
//!
//! Matching is plain, case-sensitive substring containment. `*`
//! characters are stripped from a pattern before the test, so the
//! conventional shell-glob spelling `*key*` matches `api_key.txt`.
//! This is deliberately not glob or regex matching.

pub mod classifier;

pub use classifier::{Classifier, Finding, FindingKind, Verdict};
