//! SQLite cost ledger — the `costs` and `reservations` tables.

use crate::LedgerError;
use crate::model::{BudgetDecision, BudgetLimits, CostRecord, cents_to_usd, usd_to_cents};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Reservations older than this are treated as abandoned by a crashed
/// caller and ignored/pruned.
const RESERVATION_TTL: Duration = Duration::hours(1);

/// How long a locked database is retried before the check fails closed.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Format a timestamp so lexicographic order equals chronological order.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The budget ledger store.
///
/// Shared across gate processes through SQLite's own file locking; a
/// store held by another process past the busy timeout surfaces as
/// [`LedgerError::Storage`] rather than blocking forever.
pub struct CostLedger {
    pool: SqlitePool,
}

impl CostLedger {
    /// Open (creating if missing) the ledger database at `path`.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Storage(format!("create ledger dir: {e}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let ledger = Self::connect(options).await?;
        info!("Cost ledger opened at {}", path.display());
        Ok(ledger)
    }

    /// An ephemeral in-process ledger (tests).
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LedgerError::Storage(format!("invalid SQLite options: {e}")))?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, LedgerError> {
        // A single pooled connection: invocations are single-shot, and an
        // in-memory database does not survive across connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Storage(format!("failed to open ledger: {e}")))?;

        let ledger = Self { pool };
        ledger.run_migrations().await?;
        Ok(ledger)
    }

    async fn run_migrations(&self) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS costs (
                id            TEXT PRIMARY KEY,
                created_at    TEXT NOT NULL,
                date          TEXT NOT NULL,
                session_id    TEXT NOT NULL,
                agent         TEXT NOT NULL,
                model         TEXT NOT NULL DEFAULT '',
                input_tokens  INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cost_cents    INTEGER NOT NULL CHECK (cost_cents >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("costs table: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_costs_date ON costs(date)")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("date index: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_costs_session ON costs(session_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("session index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reservations (
                id           TEXT PRIMARY KEY,
                session_id   TEXT NOT NULL,
                amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
                created_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("reservations table: {e}")))?;

        debug!("Ledger migrations complete");
        Ok(())
    }

    /// Append one cost event. Duplicate detection is the caller's
    /// responsibility.
    pub async fn record_cost(&self, record: &CostRecord) -> Result<(), LedgerError> {
        Self::validate(record)?;
        sqlx::query(
            r#"
            INSERT INTO costs
                (id, created_at, date, session_id, agent, model,
                 input_tokens, output_tokens, cost_cents)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.id)
        .bind(fmt_ts(record.timestamp))
        .bind(record.date().to_string())
        .bind(&record.session_id)
        .bind(&record.agent)
        .bind(&record.model)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(usd_to_cents(record.cost_usd))
        .execute(&self.pool)
        .await
        .map_err(|e| LedgerError::Storage(format!("cost insert: {e}")))?;
        Ok(())
    }

    fn validate(record: &CostRecord) -> Result<(), LedgerError> {
        if !record.cost_usd.is_finite() || record.cost_usd < 0.0 {
            return Err(LedgerError::InvalidRecord(format!(
                "cost_usd must be a non-negative amount, got {}",
                record.cost_usd
            )));
        }
        Ok(())
    }

    /// Exact sum of recorded costs for a UTC calendar day, in USD.
    pub async fn daily_spend(&self, date: NaiveDate) -> Result<f64, LedgerError> {
        let cents = self
            .sum_cents("SELECT COALESCE(SUM(cost_cents), 0) AS total FROM costs WHERE date = ?1", date.to_string())
            .await?;
        Ok(cents_to_usd(cents))
    }

    /// Sum of recorded costs for a session, unbounded by time, in USD.
    pub async fn session_spend(&self, session_id: &str) -> Result<f64, LedgerError> {
        let cents = self
            .sum_cents(
                "SELECT COALESCE(SUM(cost_cents), 0) AS total FROM costs WHERE session_id = ?1",
                session_id.to_string(),
            )
            .await?;
        Ok(cents_to_usd(cents))
    }

    async fn sum_cents(&self, sql: &str, param: String) -> Result<i64, LedgerError> {
        let row = sqlx::query(sql)
            .bind(param)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::QueryFailed(format!("spend sum: {e}")))?;
        row.try_get("total")
            .map_err(|e| LedgerError::QueryFailed(format!("total column: {e}")))
    }

    /// Read-only budget check: would `estimated_usd` fit under both limits?
    ///
    /// A projected total equal to a limit passes; strictly greater fails.
    /// Open reservations count toward both projections.
    pub async fn check_budget(
        &self,
        session_id: &str,
        estimated_usd: f64,
        limits: BudgetLimits,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision, LedgerError> {
        let estimate = usd_to_cents(estimated_usd);
        let stale_cutoff = fmt_ts(now - RESERVATION_TTL);

        let daily = self.daily_projection_cents(now.date_naive(), &stale_cutoff).await?;
        if daily + estimate > usd_to_cents(limits.daily_usd) {
            return Ok(BudgetDecision::DailyExceeded {
                spent_usd: cents_to_usd(daily),
                estimated_usd,
                limit_usd: limits.daily_usd,
            });
        }

        let session = self.session_projection_cents(session_id, &stale_cutoff).await?;
        if session + estimate > usd_to_cents(limits.session_usd) {
            return Ok(BudgetDecision::SessionExceeded {
                spent_usd: cents_to_usd(session),
                estimated_usd,
                limit_usd: limits.session_usd,
            });
        }

        Ok(BudgetDecision::Allowed {
            reservation_id: None,
        })
    }

    /// Atomic check-and-reserve: the budget check fused with the insertion
    /// of a hold on the estimate, in one conditional `INSERT`.
    ///
    /// On `Allowed`, the returned reservation must later be settled
    /// ([`Self::settle`]) or released ([`Self::release`]); abandoned
    /// holds expire after one hour.
    pub async fn check_and_reserve(
        &self,
        session_id: &str,
        estimated_usd: f64,
        limits: BudgetLimits,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision, LedgerError> {
        let estimate = usd_to_cents(estimated_usd);
        let stale_cutoff = fmt_ts(now - RESERVATION_TTL);
        self.prune_stale_reservations(now).await?;

        // Lost-race retries: the conditional insert can fail while a
        // concurrent settle/release frees head room between our read and
        // the re-check.
        for _ in 0..3 {
            let reservation_id = Uuid::new_v4().to_string();
            let inserted = sqlx::query(
                r#"
                INSERT INTO reservations (id, session_id, amount_cents, created_at)
                SELECT ?1, ?2, ?3, ?4
                WHERE COALESCE((SELECT SUM(cost_cents) FROM costs WHERE date = ?5), 0)
                      + COALESCE((SELECT SUM(amount_cents) FROM reservations
                                  WHERE created_at > ?6), 0)
                      + ?3 <= ?7
                  AND COALESCE((SELECT SUM(cost_cents) FROM costs WHERE session_id = ?2), 0)
                      + COALESCE((SELECT SUM(amount_cents) FROM reservations
                                  WHERE session_id = ?2 AND created_at > ?6), 0)
                      + ?3 <= ?8
                "#,
            )
            .bind(&reservation_id)
            .bind(session_id)
            .bind(estimate)
            .bind(fmt_ts(now))
            .bind(now.date_naive().to_string())
            .bind(&stale_cutoff)
            .bind(usd_to_cents(limits.daily_usd))
            .bind(usd_to_cents(limits.session_usd))
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("reserve insert: {e}")))?;

            if inserted.rows_affected() == 1 {
                debug!(reservation = %reservation_id, "Budget hold placed");
                return Ok(BudgetDecision::Allowed {
                    reservation_id: Some(reservation_id),
                });
            }

            let daily = self.daily_projection_cents(now.date_naive(), &stale_cutoff).await?;
            if daily + estimate > usd_to_cents(limits.daily_usd) {
                return Ok(BudgetDecision::DailyExceeded {
                    spent_usd: cents_to_usd(daily),
                    estimated_usd,
                    limit_usd: limits.daily_usd,
                });
            }
            let session = self.session_projection_cents(session_id, &stale_cutoff).await?;
            if session + estimate > usd_to_cents(limits.session_usd) {
                return Ok(BudgetDecision::SessionExceeded {
                    spent_usd: cents_to_usd(session),
                    estimated_usd,
                    limit_usd: limits.session_usd,
                });
            }
        }

        Err(LedgerError::Storage(
            "budget reservation kept losing races; giving up".into(),
        ))
    }

    /// Committed spend plus open holds for a UTC day, in cents.
    async fn daily_projection_cents(
        &self,
        date: NaiveDate,
        stale_cutoff: &str,
    ) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE((SELECT SUM(cost_cents) FROM costs WHERE date = ?1), 0)
                 + COALESCE((SELECT SUM(amount_cents) FROM reservations
                             WHERE created_at > ?2), 0) AS total
            "#,
        )
        .bind(date.to_string())
        .bind(stale_cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::QueryFailed(format!("daily projection: {e}")))?;
        row.try_get("total")
            .map_err(|e| LedgerError::QueryFailed(format!("total column: {e}")))
    }

    /// Committed spend plus open holds for a session, in cents.
    async fn session_projection_cents(
        &self,
        session_id: &str,
        stale_cutoff: &str,
    ) -> Result<i64, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE((SELECT SUM(cost_cents) FROM costs WHERE session_id = ?1), 0)
                 + COALESCE((SELECT SUM(amount_cents) FROM reservations
                             WHERE session_id = ?1 AND created_at > ?2), 0) AS total
            "#,
        )
        .bind(session_id)
        .bind(stale_cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| LedgerError::QueryFailed(format!("session projection: {e}")))?;
        row.try_get("total")
            .map_err(|e| LedgerError::QueryFailed(format!("total column: {e}")))
    }

    /// Settle a reservation: drop the hold and, when the caller reports
    /// the real cost, record it in the same transaction.
    pub async fn settle(
        &self,
        reservation_id: &str,
        actual: Option<&CostRecord>,
    ) -> Result<(), LedgerError> {
        if let Some(record) = actual {
            Self::validate(record)?;
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(format!("settle begin: {e}")))?;

        sqlx::query("DELETE FROM reservations WHERE id = ?1")
            .bind(reservation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(format!("settle delete: {e}")))?;

        if let Some(record) = actual {
            sqlx::query(
                r#"
                INSERT INTO costs
                    (id, created_at, date, session_id, agent, model,
                     input_tokens, output_tokens, cost_cents)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&record.id)
            .bind(fmt_ts(record.timestamp))
            .bind(record.date().to_string())
            .bind(&record.session_id)
            .bind(&record.agent)
            .bind(&record.model)
            .bind(record.input_tokens as i64)
            .bind(record.output_tokens as i64)
            .bind(usd_to_cents(record.cost_usd))
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(format!("settle insert: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(format!("settle commit: {e}")))
    }

    /// Drop a reservation without recording any cost.
    pub async fn release(&self, reservation_id: &str) -> Result<(), LedgerError> {
        sqlx::query("DELETE FROM reservations WHERE id = ?1")
            .bind(reservation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("release: {e}")))?;
        Ok(())
    }

    /// Delete reservations abandoned by crashed callers.
    pub async fn prune_stale_reservations(&self, now: DateTime<Utc>) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM reservations WHERE created_at < ?1")
            .bind(fmt_ts(now - RESERVATION_TTL))
            .execute(&self.pool)
            .await
            .map_err(|e| LedgerError::Storage(format!("reservation prune: {e}")))?;
        Ok(result.rows_affected())
    }

    /// Number of open (unexpired or not-yet-pruned) reservations.
    pub async fn reservation_count(&self) -> Result<usize, LedgerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM reservations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LedgerError::QueryFailed(format!("reservation count: {e}")))?;
        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| LedgerError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> CostLedger {
        CostLedger::in_memory().await.unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn record(session: &str, cost: f64, at: &str) -> CostRecord {
        CostRecord::new(session, "builder", "claude-sonnet-4", 1000, 500, cost, ts(at))
    }

    const LIMITS: BudgetLimits = BudgetLimits {
        daily_usd: 100.0,
        session_usd: 10.0,
    };

    #[tokio::test]
    async fn daily_spend_is_exact_sum() {
        let db = ledger().await;
        db.record_cost(&record("s-1", 1.25, "2026-08-06T10:00:00Z")).await.unwrap();
        db.record_cost(&record("s-2", 2.50, "2026-08-06T11:00:00Z")).await.unwrap();
        db.record_cost(&record("s-1", 0.25, "2026-08-07T00:00:01Z")).await.unwrap();

        let date = ts("2026-08-06T12:00:00Z").date_naive();
        assert!((db.daily_spend(date).await.unwrap() - 3.75).abs() < 1e-9);
        let next = ts("2026-08-07T12:00:00Z").date_naive();
        assert!((db.daily_spend(next).await.unwrap() - 0.25).abs() < 1e-9);
        let empty = ts("2026-08-08T12:00:00Z").date_naive();
        assert!(db.daily_spend(empty).await.unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn session_spend_crosses_days() {
        let db = ledger().await;
        db.record_cost(&record("s-1", 1.00, "2026-08-05T10:00:00Z")).await.unwrap();
        db.record_cost(&record("s-1", 2.00, "2026-08-06T10:00:00Z")).await.unwrap();
        db.record_cost(&record("s-2", 4.00, "2026-08-06T10:00:00Z")).await.unwrap();

        assert!((db.session_spend("s-1").await.unwrap() - 3.00).abs() < 1e-9);
        assert!((db.session_spend("s-2").await.unwrap() - 4.00).abs() < 1e-9);
        assert!(db.session_spend("s-3").await.unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn negative_cost_rejected() {
        let db = ledger().await;
        let result = db.record_cost(&record("s-1", -0.5, "2026-08-06T10:00:00Z")).await;
        assert!(matches!(result, Err(LedgerError::InvalidRecord(_))));
    }

    #[tokio::test]
    async fn budget_boundary_equal_passes_greater_fails() {
        let db = ledger().await;
        // $90 spent today across other sessions; daily limit $100.
        db.record_cost(&record("s-other", 90.0, "2026-08-06T08:00:00Z")).await.unwrap();
        let now = ts("2026-08-06T12:00:00Z");
        let limits = BudgetLimits {
            daily_usd: 100.0,
            session_usd: 100.0,
        };

        let exact = db.check_budget("s-1", 10.0, limits, now).await.unwrap();
        assert!(exact.is_allowed());

        let over = db.check_budget("s-1", 10.01, limits, now).await.unwrap();
        assert!(matches!(over, BudgetDecision::DailyExceeded { .. }));
        assert!(over.reason().contains("$0.01 over"));
    }

    #[tokio::test]
    async fn session_limit_distinguished_from_daily() {
        let db = ledger().await;
        db.record_cost(&record("s-1", 9.50, "2026-08-06T08:00:00Z")).await.unwrap();
        let now = ts("2026-08-06T12:00:00Z");

        let decision = db.check_budget("s-1", 1.00, LIMITS, now).await.unwrap();
        assert!(matches!(decision, BudgetDecision::SessionExceeded { .. }));
        assert!(decision.reason().contains("session limit"));

        // Another session has head room under the same daily budget.
        let other = db.check_budget("s-2", 1.00, LIMITS, now).await.unwrap();
        assert!(other.is_allowed());
    }

    #[tokio::test]
    async fn reserve_holds_head_room() {
        let db = ledger().await;
        let now = ts("2026-08-06T12:00:00Z");
        let limits = BudgetLimits {
            daily_usd: 100.0,
            session_usd: 10.0,
        };

        let first = db.check_and_reserve("s-1", 6.0, limits, now).await.unwrap();
        assert!(first.is_allowed());
        assert_eq!(db.reservation_count().await.unwrap(), 1);

        // The open hold makes a second 6-dollar estimate overflow the
        // session limit even though nothing is committed yet.
        let second = db.check_and_reserve("s-1", 6.0, limits, now).await.unwrap();
        assert!(matches!(second, BudgetDecision::SessionExceeded { .. }));
    }

    #[tokio::test]
    async fn release_frees_head_room() {
        let db = ledger().await;
        let now = ts("2026-08-06T12:00:00Z");

        let BudgetDecision::Allowed {
            reservation_id: Some(id),
        } = db.check_and_reserve("s-1", 6.0, LIMITS, now).await.unwrap()
        else {
            panic!("expected an allowed decision with a reservation");
        };

        db.release(&id).await.unwrap();
        assert_eq!(db.reservation_count().await.unwrap(), 0);

        let retry = db.check_and_reserve("s-1", 6.0, LIMITS, now).await.unwrap();
        assert!(retry.is_allowed());
    }

    #[tokio::test]
    async fn settle_converts_hold_to_cost() {
        let db = ledger().await;
        let now = ts("2026-08-06T12:00:00Z");

        let BudgetDecision::Allowed {
            reservation_id: Some(id),
        } = db.check_and_reserve("s-1", 5.0, LIMITS, now).await.unwrap()
        else {
            panic!("expected an allowed decision with a reservation");
        };

        let actual = record("s-1", 4.25, "2026-08-06T12:00:30Z");
        db.settle(&id, Some(&actual)).await.unwrap();

        assert_eq!(db.reservation_count().await.unwrap(), 0);
        assert!((db.session_spend("s-1").await.unwrap() - 4.25).abs() < 1e-9);
        assert!((db.daily_spend(now.date_naive()).await.unwrap() - 4.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn settle_without_cost_only_drops_hold() {
        let db = ledger().await;
        let now = ts("2026-08-06T12:00:00Z");
        let BudgetDecision::Allowed {
            reservation_id: Some(id),
        } = db.check_and_reserve("s-1", 5.0, LIMITS, now).await.unwrap()
        else {
            panic!("expected an allowed decision with a reservation");
        };

        db.settle(&id, None).await.unwrap();
        assert_eq!(db.reservation_count().await.unwrap(), 0);
        assert!(db.session_spend("s-1").await.unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn stale_reservations_expire() {
        let db = ledger().await;
        let early = ts("2026-08-06T08:00:00Z");
        let reserved = db.check_and_reserve("s-1", 8.0, LIMITS, early).await.unwrap();
        assert!(reserved.is_allowed());

        // Two hours later the abandoned hold no longer counts, and the
        // next check prunes it.
        let later = ts("2026-08-06T10:00:00Z");
        let retry = db.check_and_reserve("s-1", 8.0, LIMITS, later).await.unwrap();
        assert!(retry.is_allowed());
        assert_eq!(db.reservation_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_estimate_still_checks_committed_spend() {
        let db = ledger().await;
        db.record_cost(&record("s-1", 10.5, "2026-08-06T08:00:00Z")).await.unwrap();
        let now = ts("2026-08-06T12:00:00Z");

        let decision = db.check_and_reserve("s-1", 0.0, LIMITS, now).await.unwrap();
        assert!(matches!(decision, BudgetDecision::SessionExceeded { .. }));
    }

    #[tokio::test]
    async fn sub_cent_costs_round_per_event() {
        let db = ledger().await;
        db.record_cost(&record("s-1", 0.016, "2026-08-06T08:00:00Z")).await.unwrap();
        db.record_cost(&record("s-1", 0.016, "2026-08-06T09:00:00Z")).await.unwrap();
        // Each event rounds to 2 cents before summing.
        assert!((db.session_spend("s-1").await.unwrap() - 0.04).abs() < 1e-9);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");

        {
            let db = CostLedger::open(&path).await.unwrap();
            db.record_cost(&record("s-1", 1.5, "2026-08-06T08:00:00Z")).await.unwrap();
        }

        let db = CostLedger::open(&path).await.unwrap();
        assert!((db.session_spend("s-1").await.unwrap() - 1.5).abs() < 1e-9);
    }
}
