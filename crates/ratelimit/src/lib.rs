//! Sliding-hour rate limiter for AgentGate.
//!
//! Counts calls per agent over a fixed trailing hour from `now` — not
//! calendar-aligned. A call at exactly `now - 1h` is outside the window
//! (strict `>` comparison); this is the canonical tie-break.
//!
//! Admission uses a single conditional `INSERT` (`try_acquire`), so two
//! concurrent gate processes cannot both take the last slot in the
//! window. Rows older than 24 hours are pruned lazily — comfortably
//! outside the 1-hour window, so a concurrent count can never lose a
//! countable row.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// The trailing span calls are counted over.
pub const RATE_WINDOW: Duration = Duration::hours(1);

/// Rows older than this are eligible for pruning.
pub const PRUNE_AGE: Duration = Duration::hours(24);

const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Errors from the rate-limit store.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Outcome of a rate check for one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the call is admitted.
    pub allowed: bool,
    /// Calls counted in the trailing window (including this one when
    /// admitted by `try_acquire`).
    pub current_count: u32,
    /// The agent's hourly budget.
    pub limit: u32,
}

impl RateDecision {
    /// Human-readable explanation of a rejection; empty when allowed.
    pub fn reason(&self) -> String {
        if self.allowed {
            return String::new();
        }
        format!(
            "rate limit exceeded: {} calls in the last hour (limit {})",
            self.current_count, self.limit
        )
    }
}

/// Format a timestamp so lexicographic order equals chronological order.
fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// The per-agent call counter store.
pub struct RateLimiter {
    pool: SqlitePool,
}

impl RateLimiter {
    /// Open (creating if missing) the rate-limit database at `path`.
    pub async fn open(path: &Path) -> Result<Self, RateLimitError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RateLimitError::Storage(format!("create store dir: {e}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);
        let limiter = Self::connect(options).await?;
        info!("Rate-limit store opened at {}", path.display());
        Ok(limiter)
    }

    /// An ephemeral in-process store (tests).
    pub async fn in_memory() -> Result<Self, RateLimitError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RateLimitError::Storage(format!("invalid SQLite options: {e}")))?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, RateLimitError> {
        // A single pooled connection: invocations are single-shot, and an
        // in-memory database does not survive across connections.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| RateLimitError::Storage(format!("failed to open store: {e}")))?;

        let limiter = Self { pool };
        limiter.run_migrations().await?;
        Ok(limiter)
    }

    async fn run_migrations(&self) -> Result<(), RateLimitError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rate_events (
                id         TEXT PRIMARY KEY,
                agent      TEXT NOT NULL,
                operation  TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RateLimitError::Storage(format!("rate_events table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_rate_agent_time ON rate_events(agent, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RateLimitError::Storage(format!("agent index: {e}")))?;

        debug!("Rate-limit migrations complete");
        Ok(())
    }

    /// Read-only check: is the agent under its hourly budget?
    pub async fn allow(
        &self,
        agent: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RateLimitError> {
        let current = self.count_in_window(agent, now).await?;
        Ok(RateDecision {
            allowed: current < limit,
            current_count: current,
            limit,
        })
    }

    /// Atomic check-and-record: admit the call and insert its row in one
    /// conditional `INSERT`. A rejected attempt inserts nothing.
    pub async fn try_acquire(
        &self,
        agent: &str,
        operation: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, RateLimitError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO rate_events (id, agent, operation, created_at)
            SELECT ?1, ?2, ?3, ?4
            WHERE (SELECT COUNT(*) FROM rate_events
                   WHERE agent = ?2 AND created_at > ?5) < ?6
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(agent)
        .bind(operation)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now - RATE_WINDOW))
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| RateLimitError::Storage(format!("acquire insert: {e}")))?;

        let current = self.count_in_window(agent, now).await?;
        Ok(RateDecision {
            allowed: inserted.rows_affected() == 1,
            current_count: current,
            limit,
        })
    }

    /// Unconditionally record an admitted call.
    pub async fn record(
        &self,
        agent: &str,
        operation: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitError> {
        sqlx::query(
            "INSERT INTO rate_events (id, agent, operation, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(agent)
        .bind(operation)
        .bind(fmt_ts(now))
        .execute(&self.pool)
        .await
        .map_err(|e| RateLimitError::Storage(format!("record insert: {e}")))?;
        Ok(())
    }

    /// Delete rows strictly older than `older_than`.
    ///
    /// The gate calls this with `now - 24h`; never prune inside the
    /// 1-hour window.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, RateLimitError> {
        let result = sqlx::query("DELETE FROM rate_events WHERE created_at < ?1")
            .bind(fmt_ts(older_than))
            .execute(&self.pool)
            .await
            .map_err(|e| RateLimitError::Storage(format!("prune: {e}")))?;
        if result.rows_affected() > 0 {
            debug!(pruned = result.rows_affected(), "Rate rows pruned");
        }
        Ok(result.rows_affected())
    }

    /// Calls counted for `agent` in the trailing window (strict `>`).
    pub async fn count_in_window(
        &self,
        agent: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, RateLimitError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM rate_events WHERE agent = ?1 AND created_at > ?2",
        )
        .bind(agent)
        .bind(fmt_ts(now - RATE_WINDOW))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RateLimitError::QueryFailed(format!("window count: {e}")))?;
        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| RateLimitError::QueryFailed(format!("cnt column: {e}")))?;
        Ok(cnt as u32)
    }
}
