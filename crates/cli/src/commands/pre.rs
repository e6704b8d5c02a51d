//! `agentgate pre` — Admission check before an agent operation.

use agentgate_config::PolicyConfig;
use agentgate_policy::{PolicyGate, PreDecision, PreRequest, ReasonCode};
use chrono::Utc;

pub async fn run(
    agent: String,
    operation: String,
    tool: Option<String>,
    file: Option<String>,
    estimated_cost: Option<f64>,
    session: String,
) -> i32 {
    let (config, _warnings) = PolicyConfig::load();

    let gate = match PolicyGate::open(config).await {
        Ok(gate) => gate,
        Err(e) => {
            // Stores we cannot evaluate fail closed.
            let decision = PreDecision::reject(
                ReasonCode::StoreUnavailable,
                format!("cannot open policy stores: {e}"),
            );
            print_decision(&decision);
            return decision.exit_code();
        }
    };

    let request = PreRequest {
        agent,
        operation,
        tool,
        file,
        estimated_cost_usd: estimated_cost,
        session_id: session,
    };

    let decision = gate.pre(&request, Utc::now()).await;
    print_decision(&decision);
    decision.exit_code()
}

fn print_decision(decision: &PreDecision) {
    match serde_json::to_string_pretty(decision) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to render decision: {e}"),
    }
}
