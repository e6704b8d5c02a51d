//! The gate itself — pre-phase admission and post-phase commit.

use crate::decision::{PostReport, PreDecision, ReasonCode};
use crate::request::{PostRequest, PreRequest};
use crate::GateError;
use agentgate_audit::{AuditEntry, AuditEvent, AuditSink, FileAuditLog};
use agentgate_config::PolicyConfig;
use agentgate_ledger::{BudgetDecision, BudgetLimits, CostLedger, CostRecord};
use agentgate_ratelimit::{RateLimiter, PRUNE_AGE};
use agentgate_security::{Classifier, Finding, FindingKind, Verdict};
use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

/// The policy gate: one instance per invocation, stores opened fresh.
pub struct PolicyGate {
    config: PolicyConfig,
    ledger: CostLedger,
    limiter: RateLimiter,
    classifier: Classifier,
    audit: Option<FileAuditLog>,
    user: String,
}

impl PolicyGate {
    /// Open the gate against the stores named in `config`.
    ///
    /// A store that cannot be opened is a hard error: the caller should
    /// treat it as `store_unavailable` (fail closed).
    pub async fn open(config: PolicyConfig) -> Result<Self, GateError> {
        let ledger = CostLedger::open(&config.ledger_path()).await?;
        let limiter = RateLimiter::open(&config.ratelimit_path()).await?;
        let classifier = Classifier::new(
            config.security_sensitive_paths.clone(),
            config.security_sensitive_file_patterns.clone(),
            config.block_sensitive_operations.clone(),
        );
        let audit = config.audit_enabled.then(|| {
            FileAuditLog::new(
                config.audit_dir(),
                config.max_audit_file_bytes,
                config.max_audit_generations,
                config.retention_days,
            )
        });
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".into());
        Ok(Self {
            config,
            ledger,
            limiter,
            classifier,
            audit,
            user,
        })
    }

    /// Pre-phase: decide whether the operation may proceed.
    ///
    /// `RATE_CHECK → BUDGET_CHECK → CLASSIFY`. Rejections are structured
    /// values, never errors; a budget or rate store that cannot be
    /// evaluated rejects with `store_unavailable` (fail closed). The
    /// decision itself is appended to the audit log, non-fatally.
    pub async fn pre(&self, request: &PreRequest, now: DateTime<Utc>) -> PreDecision {
        if !self.config.enabled {
            debug!("Policy gate disabled; accepting unchecked");
            return PreDecision::accept(Vec::new(), None);
        }

        let decision = self.evaluate(request, now).await;
        self.audit_decision(request, &decision, now);
        decision
    }

    async fn evaluate(&self, request: &PreRequest, now: DateTime<Utc>) -> PreDecision {
        // Opportunistic maintenance, piggybacked on the check.
        if let Err(e) = self.limiter.prune(now - PRUNE_AGE).await {
            warn!(error = %e, "Rate-row pruning failed");
        }

        // RATE_CHECK — atomic check-and-record of the call slot.
        let limit = self.config.calls_per_hour(&request.agent);
        let rate = match self
            .limiter
            .try_acquire(&request.agent, &request.operation, limit, now)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "Rate-limit store unavailable; failing closed");
                return PreDecision::reject(
                    ReasonCode::StoreUnavailable,
                    format!("rate-limit store unavailable: {e}"),
                );
            }
        };
        if !rate.allowed {
            return PreDecision::reject(ReasonCode::RateLimit, rate.reason());
        }

        // BUDGET_CHECK — atomic check-and-reserve of the estimate.
        let estimate = request.estimated_cost_usd.unwrap_or(0.0);
        let limits = BudgetLimits {
            daily_usd: self.config.daily_budget_usd,
            session_usd: self.config.per_session_limit_usd,
        };
        let reservation_id = match self
            .ledger
            .check_and_reserve(&request.session_id, estimate, limits, now)
            .await
        {
            Ok(BudgetDecision::Allowed { reservation_id }) => reservation_id,
            Ok(rejection @ BudgetDecision::DailyExceeded { .. }) => {
                return PreDecision::reject(ReasonCode::DailyBudget, rejection.reason());
            }
            Ok(rejection @ BudgetDecision::SessionExceeded { .. }) => {
                return PreDecision::reject(ReasonCode::SessionLimit, rejection.reason());
            }
            Err(e) => {
                error!(error = %e, "Budget ledger unavailable; failing closed");
                return PreDecision::reject(
                    ReasonCode::StoreUnavailable,
                    format!("budget ledger unavailable: {e}"),
                );
            }
        };

        // CLASSIFY — hard blocks reject; sensitive matches only warn.
        let verdict = self
            .classifier
            .classify(request.file.as_deref(), &request.operation);
        if let Verdict::Blocked { pattern } = verdict {
            if let Some(id) = &reservation_id {
                if let Err(e) = self.ledger.release(id).await {
                    warn!(error = %e, "Failed to release budget hold after block");
                }
            }
            return PreDecision::reject(
                ReasonCode::BlockedOperation,
                format!("operation matches blocked pattern '{pattern}'"),
            );
        }

        let mut warnings: Vec<String> = self
            .classifier
            .findings(request.file.as_deref())
            .iter()
            .map(warning_text)
            .collect();

        if estimate >= self.config.expensive_operation_threshold_usd {
            warnings.push(format!(
                "expensive operation: estimated ${estimate:.2} meets the \
                 ${:.2} review threshold",
                self.config.expensive_operation_threshold_usd
            ));
        }

        PreDecision::accept(warnings, reservation_id)
    }

    /// Post-phase: settle the budget hold, record the actual cost, and
    /// append the side-effect audit entry.
    ///
    /// Failures are reported but never unwind the caller's
    /// already-performed action (fail open).
    pub async fn post(&self, request: &PostRequest, now: DateTime<Utc>) -> PostReport {
        let mut first_error: Option<String> = None;

        let actual = request.cost_usd.map(|cost| {
            CostRecord::new(
                &request.session_id,
                &request.agent,
                request.model.clone().unwrap_or_default(),
                request.input_tokens.unwrap_or(0),
                request.output_tokens.unwrap_or(0),
                cost,
                now,
            )
        });

        let commit = match &request.reservation_id {
            Some(id) => self.ledger.settle(id, actual.as_ref()).await,
            None => match &actual {
                Some(record) => self.ledger.record_cost(record).await,
                None => Ok(()),
            },
        };
        if let Err(e) = commit {
            error!(error = %e, "Post-phase cost commit failed");
            first_error = Some(format!("cost commit failed: {e}"));
        }

        let entry = AuditEntry::new(
            side_effect_event(request),
            &request.agent,
            &self.user,
            &request.session_id,
            now,
        );
        let audit_written = self.append_audit(&entry, &mut first_error);

        PostReport {
            audit_written,
            error: first_error,
        }
    }

    fn audit_decision(&self, request: &PreRequest, decision: &PreDecision, now: DateTime<Utc>) {
        let event = AuditEvent::Decision {
            decision: if decision.allowed { "accept" } else { "reject" }.into(),
            reason: if decision.allowed {
                decision.warnings.join("; ")
            } else {
                format!(
                    "{}: {}",
                    decision
                        .reason_code
                        .map(|c| c.as_str())
                        .unwrap_or("rejected"),
                    decision.reason
                )
            },
        };
        let entry = AuditEntry::new(event, &request.agent, &self.user, &request.session_id, now);
        let mut sink_error = None;
        self.append_audit(&entry, &mut sink_error);
    }

    /// Append to the audit log, falling back to `tracing` on failure.
    /// Returns whether the durable log took the entry.
    fn append_audit(&self, entry: &AuditEntry, first_error: &mut Option<String>) -> bool {
        let Some(audit) = &self.audit else {
            return false;
        };
        match audit.append(entry) {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Audit append failed; entry reported to stderr only");
                let _ = agentgate_audit::TracingSink.append(entry);
                if first_error.is_none() {
                    *first_error = Some(format!("audit append failed: {e}"));
                }
                false
            }
        }
    }
}

fn warning_text(finding: &Finding) -> String {
    match finding.kind {
        FindingKind::SensitiveFilename => format!(
            "sensitive file name: '{}' matches pattern '{}' — recommend security review",
            finding.matched, finding.pattern
        ),
        FindingKind::SensitivePath => format!(
            "sensitive path: '{}' matches pattern '{}' — recommend security review",
            finding.matched, finding.pattern
        ),
    }
}

/// Derive the audit payload for a performed operation.
fn side_effect_event(request: &PostRequest) -> AuditEvent {
    if let Some(service) = &request.service {
        return AuditEvent::ApiCall {
            service: service.clone(),
            operation: request.operation.clone(),
            target: request.target.clone(),
        };
    }
    if let Some(file) = &request.file {
        if request.diff.is_some() || request.tool.is_none() {
            return AuditEvent::FileChange {
                file: file.clone(),
                action: request.operation.clone(),
                diff: request.diff.clone(),
            };
        }
    }
    AuditEvent::ToolCall {
        tool: request
            .tool
            .clone()
            .unwrap_or_else(|| request.operation.clone()),
        file: request.file.clone(),
    }
}
