use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tether_diag::{parse_target, DiagConfig, DiagHarness};
use tether_proto::{ConnectionId, UserId};
use tether_rpc::{reconcile_liveness, CallOptions, ConnectionDirectory, LivenessProbe};

/// Drive a tether gateway against simulated clients and print JSON reports.
#[derive(Parser, Debug)]
#[command(name = "tether-diag", version, about)]
struct Cli {
    /// Fleet and gateway configuration; a built-in demo fleet when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Gateway counters
    Status,
    /// Connections grouped by user
    Connections {
        #[arg(long)]
        user: Option<String>,
    },
    /// Single-reply call: target is conn:ID, user:ID, users:A,B or all
    Invoke {
        #[arg(long, default_value = "all")]
        target: String,
        #[arg(long, default_value = "Ping")]
        method: String,
        /// JSON argument
        #[arg(long, default_value = "null")]
        arg: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Streaming call to each connection, every one by default
    Fanout {
        #[arg(long, value_delimiter = ',')]
        connections: Vec<String>,
        #[arg(long, default_value = "Ping")]
        method: String,
        #[arg(long, default_value = "null")]
        arg: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Probe every connection and evict stale non-responders
    Reconcile {
        #[arg(long, default_value_t = 60)]
        max_age_secs: u64,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn call_options(timeout_ms: Option<u64>) -> CallOptions {
    match timeout_ms {
        Some(ms) => CallOptions::default().with_timeout(Duration::from_millis(ms)),
        None => CallOptions::default(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match cli.config.as_deref() {
        Some(path) => DiagConfig::from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DiagConfig::default(),
    };
    let harness = DiagHarness::build(&config).context("building harness")?;
    let diagnostics = &harness.diagnostics;

    match cli.command {
        Command::Status => print_json(&diagnostics.status()),
        Command::Connections { user: Some(user) } => {
            print_json(&diagnostics.connections_of(&UserId::new(user)))
        }
        Command::Connections { user: None } => print_json(&diagnostics.listing()),
        Command::Invoke { target, method, arg, timeout_ms } => {
            let target = parse_target(&target).map_err(|err| anyhow!(err))?;
            let argument: serde_json::Value = serde_json::from_str(&arg).context("parsing --arg")?;
            let report = diagnostics.test_invoke(target, &method, argument, call_options(timeout_ms)).await;
            print_json(&report)
        }
        Command::Fanout { connections, method, arg, timeout_ms } => {
            let targets: Vec<ConnectionId> = if connections.is_empty() {
                harness.registry.connection_ids()
            } else {
                connections.into_iter().map(ConnectionId::new).collect()
            };
            let argument: serde_json::Value = serde_json::from_str(&arg).context("parsing --arg")?;
            let report = diagnostics.test_fan_out(&targets, &method, argument, call_options(timeout_ms)).await?;
            print_json(&report)
        }
        Command::Reconcile { max_age_secs, timeout_ms } => {
            let probe = LivenessProbe {
                timeout: Duration::from_millis(timeout_ms),
                max_age: Duration::from_secs(max_age_secs),
                ..LivenessProbe::default()
            };
            let report = reconcile_liveness(&harness.gateway, &probe).await?;
            print_json(&report)
        }
    }
}
