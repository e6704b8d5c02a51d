//! `agentgate status` — Show spend against configured limits.

use agentgate_config::PolicyConfig;
use agentgate_ledger::CostLedger;
use chrono::{NaiveDate, Utc};

pub async fn run(session: Option<String>, date: Option<String>) -> i32 {
    let (config, _warnings) = PolicyConfig::load();

    let date = match date {
        Some(s) => match s.parse::<NaiveDate>() {
            Ok(d) => d,
            Err(e) => {
                eprintln!("Invalid --date '{s}': {e}");
                return 5;
            }
        },
        None => Utc::now().date_naive(),
    };

    let ledger = match CostLedger::open(&config.ledger_path()).await {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Cannot open ledger: {e}");
            return 5;
        }
    };

    let daily = match ledger.daily_spend(date).await {
        Ok(usd) => usd,
        Err(e) => {
            eprintln!("Cannot read daily spend: {e}");
            return 5;
        }
    };

    let mut status = serde_json::json!({
        "date": date.to_string(),
        "daily_spend_usd": daily,
        "daily_budget_usd": config.daily_budget_usd,
        "daily_remaining_usd": (config.daily_budget_usd - daily).max(0.0),
        "gate_enabled": config.enabled,
        "audit_enabled": config.audit_enabled,
    });

    if let Some(session_id) = session {
        match ledger.session_spend(&session_id).await {
            Ok(spend) => {
                status["session_id"] = serde_json::json!(session_id);
                status["session_spend_usd"] = serde_json::json!(spend);
                status["session_limit_usd"] = serde_json::json!(config.per_session_limit_usd);
                status["session_remaining_usd"] =
                    serde_json::json!((config.per_session_limit_usd - spend).max(0.0));
            }
            Err(e) => {
                eprintln!("Cannot read session spend: {e}");
                return 5;
            }
        }
    }

    match serde_json::to_string_pretty(&status) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Failed to render status: {e}");
            return 5;
        }
    }
    0
}
