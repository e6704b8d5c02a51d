//! AgentGate CLI — the main entry point.
//!
//! Commands:
//! - `init`   — Write the default policy configuration
//! - `pre`    — Admission check before an agent operation
//! - `post`   — Report an operation's outcome and cost
//! - `status` — Show spend against configured limits
//!
//! `pre` exits with the embedding contract's codes:
//! `0` ok · `1` daily budget exceeded · `2` session limit exceeded ·
//! `3` rate limit exceeded · `4` blocked operation · `5` store
//! unavailable. JSON goes to stdout; diagnostics go to stderr.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentgate",
    about = "AgentGate — policy gate for AI coding agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default policy configuration if none exists
    Init,

    /// Check whether an operation may proceed (admission control)
    Pre {
        /// Agent attempting the operation
        #[arg(long)]
        agent: String,

        /// The operation (command line, description, SQL, …)
        #[arg(long)]
        operation: String,

        /// Tool being invoked
        #[arg(long)]
        tool: Option<String>,

        /// File the operation touches
        #[arg(long)]
        file: Option<String>,

        /// Estimated cost in USD
        #[arg(long)]
        estimated_cost: Option<f64>,

        /// Session the operation belongs to
        #[arg(long)]
        session: String,
    },

    /// Report a performed operation: settle cost, write the audit entry
    Post {
        #[arg(long)]
        agent: String,

        #[arg(long)]
        operation: String,

        #[arg(long)]
        tool: Option<String>,

        #[arg(long)]
        file: Option<String>,

        /// Diff of a file change
        #[arg(long)]
        diff: Option<String>,

        /// External service name, for API calls
        #[arg(long)]
        service: Option<String>,

        /// Target of an API call (model, endpoint, resource)
        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        session: String,

        /// How the operation ended
        #[arg(long, value_parser = ["success", "failure"])]
        outcome: String,

        /// Actual cost incurred, in USD
        #[arg(long)]
        cost: Option<f64>,

        /// Model behind the cost
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        input_tokens: Option<u32>,

        #[arg(long)]
        output_tokens: Option<u32>,

        /// Budget hold returned by `pre`
        #[arg(long)]
        reservation: Option<String>,
    },

    /// Show daily (and optionally per-session) spend against limits
    Status {
        /// Session to include in the report
        #[arg(long)]
        session: Option<String>,

        /// UTC day to report (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Diagnostics on stderr so stdout stays JSON-clean.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Pre {
            agent,
            operation,
            tool,
            file,
            estimated_cost,
            session,
        } => commands::pre::run(agent, operation, tool, file, estimated_cost, session).await,
        Commands::Post {
            agent,
            operation,
            tool,
            file,
            diff,
            service,
            target,
            session,
            outcome,
            cost,
            model,
            input_tokens,
            output_tokens,
            reservation,
        } => {
            commands::post::run(commands::post::Args {
                agent,
                operation,
                tool,
                file,
                diff,
                service,
                target,
                session,
                outcome,
                cost,
                model,
                input_tokens,
                output_tokens,
                reservation,
            })
            .await
        }
        Commands::Status { session, date } => commands::status::run(session, date).await,
    };

    std::process::exit(code);
}
