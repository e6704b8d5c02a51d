//! `agentgate post` — Report an operation's outcome and cost.

use agentgate_config::PolicyConfig;
use agentgate_policy::{Outcome, PolicyGate, PostReport, PostRequest};
use chrono::Utc;

/// Everything `post` takes from the command line.
pub struct Args {
    pub agent: String,
    pub operation: String,
    pub tool: Option<String>,
    pub file: Option<String>,
    pub diff: Option<String>,
    pub service: Option<String>,
    pub target: Option<String>,
    pub session: String,
    pub outcome: String,
    pub cost: Option<f64>,
    pub model: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub reservation: Option<String>,
}

pub async fn run(args: Args) -> i32 {
    let (config, _warnings) = PolicyConfig::load();

    // The caller's action already happened: every failure from here on
    // is reported, never fatal (fail open).
    let gate = match PolicyGate::open(config).await {
        Ok(gate) => gate,
        Err(e) => {
            print_report(&PostReport {
                audit_written: false,
                error: Some(format!("cannot open policy stores: {e}")),
            });
            return 0;
        }
    };

    let outcome = if args.outcome == "failure" {
        Outcome::Failure
    } else {
        Outcome::Success
    };

    let request = PostRequest {
        agent: args.agent,
        operation: args.operation,
        tool: args.tool,
        file: args.file,
        diff: args.diff,
        service: args.service,
        target: args.target,
        session_id: args.session,
        outcome,
        cost_usd: args.cost,
        model: args.model,
        input_tokens: args.input_tokens,
        output_tokens: args.output_tokens,
        reservation_id: args.reservation,
    };

    let report = gate.post(&request, Utc::now()).await;
    print_report(&report);
    0
}

fn print_report(report: &PostReport) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to render report: {e}"),
    }
}
