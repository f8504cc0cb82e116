//! AgentComm command-line interface
//!
//! Inspects and edits a shared coordination document from the shell, so
//! humans and scripts can take part in the same protocol as agents.

use agentcomm_core::{
    AgentRecord, CommsConfig, CommunicationsFile, FileWatcher, RequestId, StatusUpdate,
};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agentcomm")]
#[command(about = "File-based coordination for cooperating agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Coordination document path (overrides config and AGENTCOMM_FILE)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Config file path
    #[arg(short, long, env = "AGENTCOMM_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show status and queue sizes of every agent
    Status,

    /// Print the raw coordination document
    Show,

    /// Replace the document with an empty one
    Reset,

    /// Publish status for an agent
    Report {
        agent: String,

        #[arg(short, long)]
        mission: Option<String>,

        #[arg(short, long)]
        working_on: Option<String>,

        #[arg(short, long)]
        done: Option<String>,

        #[arg(short, long)]
        next: Option<String>,
    },

    /// Send a request from one agent to another
    Request {
        from: String,
        to: String,
        request: String,
    },

    /// List pending requests addressed to an agent
    Requests { agent: String },

    /// Complete a request and deliver the result to the requester
    Complete {
        /// Agent doing the work
        agent: String,

        /// Agent that sent the request
        requester: String,

        /// Result handed back to the requester
        result: String,

        /// Request text to match
        #[arg(short, long, conflicts_with = "id", required_unless_present = "id")]
        request: Option<String>,

        /// Request id to match
        #[arg(long)]
        id: Option<String>,
    },

    /// List deliveries received by an agent
    Deliveries { agent: String },

    /// Clear an agent's deliveries
    Ack { agent: String },

    /// Withdraw a request before it is completed
    Withdraw {
        from: String,
        to: String,
        request: String,
    },

    /// Remove an agent's record from the document
    Remove { agent: String },

    /// Print change events until interrupted
    Watch {
        /// Poll interval in milliseconds (overrides config)
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!(
        "agentcomm={level},agentcomm_core={level}",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("AgentComm v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.clone().unwrap_or_else(CommsConfig::default_path);
    let mut config = CommsConfig::load(&config_path)?.apply_env();
    if let Some(file) = cli.file {
        config.communications.path = file;
    }

    let comms = CommunicationsFile::from_config(&config);
    debug!("Using coordination document {}", comms.store_key());

    match cli.command {
        Commands::Status => {
            let agents = comms.list_agents().await?;
            if agents.is_empty() {
                println!("No agents recorded");
            }
            for (name, record) in &agents {
                print_agent(name, record);
            }
        }
        Commands::Show => {
            let document = comms.read_raw().await?;
            let bytes = document.to_json_pretty()?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
        Commands::Reset => {
            comms.reset().await?;
            println!("Coordination document reset");
        }
        Commands::Report {
            agent,
            mission,
            working_on,
            done,
            next,
        } => {
            let update = StatusUpdate {
                mission,
                working_on,
                done,
                next,
            };
            if update.is_empty() {
                bail!("Nothing to report; pass --mission, --working-on, --done or --next");
            }
            let status = comms.update_agent(&agent, update).await?;
            println!("{}: {} / {}", agent, status.mission, status.working_on);
        }
        Commands::Request { from, to, request } => {
            let id = comms.add_request(&from, &to, &request).await?;
            println!("{}", id);
        }
        Commands::Requests { agent } => {
            for request in comms.get_requests_for_agent(&agent).await? {
                let id = request
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}", id, request.from_agent, request.request);
            }
        }
        Commands::Complete {
            agent,
            requester,
            result,
            request,
            id,
        } => {
            let outcome = match (id, request) {
                (Some(id), _) => {
                    let id = RequestId::from_string(&id)
                        .with_context(|| format!("Invalid request id: {}", id))?;
                    comms
                        .complete_request_by_id(&agent, &requester, id, &result)
                        .await?
                }
                (None, Some(request)) => {
                    comms
                        .complete_request(&agent, &requester, &request, &result)
                        .await?
                }
                (None, None) => bail!("Either --request or --id is required"),
            };

            if outcome.matched {
                println!("Completed");
            } else {
                println!("Delivered, but no matching request was pending");
            }
        }
        Commands::Deliveries { agent } => {
            let deliveries = comms
                .get_agent(&agent)
                .await?
                .map(|record| record.delivery_summaries())
                .unwrap_or_default();
            for delivery in deliveries {
                println!("{}\t{}", delivery.from_agent, delivery.description);
            }
        }
        Commands::Ack { agent } => {
            if comms.clear_deliveries(&agent).await? {
                println!("Deliveries cleared");
            }
        }
        Commands::Withdraw { from, to, request } => {
            if !comms.remove_request(&from, &to, &request).await? {
                bail!("No pending request from {} to {}: {}", from, to, request);
            }
            println!("Request withdrawn");
        }
        Commands::Remove { agent } => {
            if !comms.remove_agent(&agent).await? {
                bail!("No such agent: {}", agent);
            }
            println!("Removed {}", agent);
        }
        Commands::Watch { interval_ms } => {
            if let Some(ms) = interval_ms {
                config.watcher.poll_interval_ms = ms;
            }
            watch(comms, &config).await?;
        }
    }

    Ok(())
}

fn print_agent(name: &str, record: &AgentRecord) {
    println!("{}", name);
    match &record.status {
        Some(status) => {
            println!("  mission:    {}", status.mission);
            println!("  working on: {}", status.working_on);
            if let Some(done) = &status.done {
                println!("  done:       {}", done);
            }
            if let Some(next) = &status.next {
                println!("  next:       {}", next);
            }
        }
        None => println!("  (no status)"),
    }
    println!(
        "  requests: {}  deliveries: {}",
        record.requests.len(),
        record.deliveries.len()
    );
}

async fn watch(comms: CommunicationsFile, config: &CommsConfig) -> anyhow::Result<()> {
    let mut watcher = FileWatcher::spawn(
        comms,
        config.watcher.poll_interval(),
        config.watcher.channel_capacity,
    );
    let mut events = watcher.subscribe();
    info!("Watching for changes, press Ctrl+C to stop");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!(
                    "revision {} by {}",
                    event.revision,
                    event.updated_by.as_deref().unwrap_or("-")
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Skipped {} change events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.stop().await?;
    Ok(())
}
