//! Data model for cost records and budget decisions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Convert a USD amount to integer cents, rounding half away from zero.
pub fn usd_to_cents(usd: f64) -> i64 {
    (usd * 100.0).round() as i64
}

/// Convert integer cents back to a USD amount.
pub fn cents_to_usd(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// One costed event, reported by a caller after the cost was incurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    /// Unique identifier.
    pub id: String,
    /// When the cost was incurred.
    pub timestamp: DateTime<Utc>,
    /// Session the cost belongs to.
    pub session_id: String,
    /// Agent that incurred the cost.
    pub agent: String,
    /// Model used, when the cost came from an LLM call.
    pub model: String,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens produced.
    pub output_tokens: u32,
    /// Cost in USD. Must be ≥ 0.
    pub cost_usd: f64,
}

impl CostRecord {
    /// Create a record stamped with the given time.
    pub fn new(
        session_id: impl Into<String>,
        agent: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            session_id: session_id.into(),
            agent: agent.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            cost_usd,
        }
    }

    /// The UTC calendar day this record counts toward.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// The configured spending limits a check runs against.
#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    /// Maximum spend per UTC calendar day, USD.
    pub daily_usd: f64,
    /// Maximum spend per session, USD.
    pub session_usd: f64,
}

/// Outcome of a budget check.
///
/// Rejections carry the numbers behind them so the caller can explain the
/// refusal (and its margin) rather than surfacing a bare code.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    /// Within both limits. When the check also reserved the estimate,
    /// `reservation_id` identifies the hold to settle or release.
    Allowed { reservation_id: Option<String> },
    /// The daily budget would be exceeded.
    DailyExceeded {
        spent_usd: f64,
        estimated_usd: f64,
        limit_usd: f64,
    },
    /// The per-session limit would be exceeded.
    SessionExceeded {
        spent_usd: f64,
        estimated_usd: f64,
        limit_usd: f64,
    },
}

impl BudgetDecision {
    /// Whether the operation may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Human-readable explanation of a rejection; empty for `Allowed`.
    pub fn reason(&self) -> String {
        match self {
            Self::Allowed { .. } => String::new(),
            Self::DailyExceeded {
                spent_usd,
                estimated_usd,
                limit_usd,
            } => format!(
                "daily budget exceeded: ${spent_usd:.2} spent today + ${estimated_usd:.2} estimated \
                 is ${:.2} over the ${limit_usd:.2} limit",
                spent_usd + estimated_usd - limit_usd
            ),
            Self::SessionExceeded {
                spent_usd,
                estimated_usd,
                limit_usd,
            } => format!(
                "session limit exceeded: ${spent_usd:.2} spent this session + ${estimated_usd:.2} \
                 estimated is ${:.2} over the ${limit_usd:.2} limit",
                spent_usd + estimated_usd - limit_usd
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_round_half_away_from_zero() {
        assert_eq!(usd_to_cents(10.0), 1000);
        assert_eq!(usd_to_cents(10.01), 1001);
        assert_eq!(usd_to_cents(0.015), 2);
        assert_eq!(usd_to_cents(0.004), 0);
        assert!((cents_to_usd(1001) - 10.01).abs() < 1e-9);
    }

    #[test]
    fn record_date_is_utc_calendar_day() {
        let ts = "2026-08-06T23:59:59Z".parse::<DateTime<Utc>>().unwrap();
        let record = CostRecord::new("s-1", "builder", "claude-sonnet-4", 100, 50, 0.01, ts);
        assert_eq!(record.date().to_string(), "2026-08-06");
    }

    #[test]
    fn rejection_reason_names_limit_and_margin() {
        let decision = BudgetDecision::DailyExceeded {
            spent_usd: 90.0,
            estimated_usd: 10.01,
            limit_usd: 100.0,
        };
        assert!(!decision.is_allowed());
        let reason = decision.reason();
        assert!(reason.contains("daily budget"));
        assert!(reason.contains("$90.00"));
        assert!(reason.contains("$100.00"));
        assert!(reason.contains("$0.01 over"));
    }

    #[test]
    fn allowed_has_empty_reason() {
        let decision = BudgetDecision::Allowed {
            reservation_id: None,
        };
        assert!(decision.is_allowed());
        assert!(decision.reason().is_empty());
    }
}
