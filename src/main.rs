//! Office Bridge - multi-agent backend to embedded document engine bridge
//!
//! Headless host: asks the agent backend questions, or listens on the
//! control channel and exchanges engine envelopes as NDJSON on
//! stdout/stdin.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use office_bridge::{
    agent::AgentSession,
    config::BridgeConfig,
    control::ControlChannel,
    document::{ChannelSink, DocumentBridge, EngineEvent},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// How long `ask` waits for channels to drain after the agent finished
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "office-bridge")]
#[command(author = "A3S Lab Team")]
#[command(version)]
#[command(about = "Multi-agent backend to document engine bridge")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "OFFICE_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the agent system a question and print the turn's channels
    Ask {
        /// Query text
        query: String,

        /// Extra context as a JSON value
        #[arg(long)]
        context: Option<String>,
    },

    /// Relay pushed document operations to the engine over stdin/stdout
    Listen {
        /// Identity to register with; a new session is started if omitted
        #[arg(long)]
        id: Option<String>,
    },

    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries data
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("office_bridge={}", log_level).into());
    let fmt_layer = if cli.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    let config = BridgeConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Ask { query, context } => {
            let context = context
                .map(|c| serde_json::from_str(&c).context("--context must be valid JSON"))
                .transpose()?;
            run_ask(config, &query, context).await?;
        }
        Commands::Listen { id } => {
            run_listen(config, id).await?;
        }
        Commands::Config { default } => {
            show_config(if default { None } else { Some(&config) })?;
        }
    }

    Ok(())
}

async fn run_ask(
    config: BridgeConfig,
    query: &str,
    context: Option<serde_json::Value>,
) -> Result<()> {
    let session = AgentSession::new(&config)?;
    let router = session.router();

    let mut updates = router.subscribe();
    let logger = tokio::spawn(async move {
        while let Some(update) = updates.next().await {
            match update {
                Ok(update) => tracing::info!(
                    turn = %update.turn,
                    channel = %update.channel,
                    fragment = %update.fragment,
                    "Fragment"
                ),
                Err(e) => tracing::debug!(error = %e, "Fragment log lagged"),
            }
        }
    });

    let (turn, handle) = session.ask(query, context).await?;
    tracing::info!(stream_id = %handle.stream_id, "Streaming {} channel(s)", handle.channels.len());

    let mut status = session.start_agent_mode().await?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
        result = status.wait_for(|s| s.map(|s| s.finished).unwrap_or(false)) => {
            if result.is_err() {
                tracing::warn!("Status poller stopped before the agent finished");
            }
        }
    }
    session.stop_agent_mode().await;

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while !session.channels_idle().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Channels still open, printing what arrived so far");
    }

    let buffer = router.turn(turn).await.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&buffer)?);

    logger.abort();
    session.reset().await;
    Ok(())
}

async fn run_listen(config: BridgeConfig, id: Option<String>) -> Result<()> {
    // Whichever owns the identity watch must live for the whole run
    let (identity, session, _fixed_identity) = match id {
        Some(id) => {
            let (tx, rx) = watch::channel(Some(id));
            (rx, None, Some(tx))
        }
        None => {
            let session = AgentSession::new(&config)?;
            session.initialize().await?;
            (session.identity(), Some(session), None)
        }
    };

    let (sink, mut envelopes) = ChannelSink::new();
    let bridge = DocumentBridge::new(Arc::new(sink), &config.document);
    let control = Arc::new(ControlChannel::new(
        config.control.clone(),
        identity,
        Arc::new(bridge.clone()),
    ));
    let mut control_task = control.clone().spawn();

    // Engine-bound envelopes as NDJSON on stdout
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(envelope) = envelopes.recv().await {
            let line = match serde_json::to_string(&envelope) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to encode envelope");
                    continue;
                }
            };
            if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err()
                || stdout.flush().await.is_err()
            {
                break;
            }
        }
    });

    // Engine messages as NDJSON on stdin
    let inbound_bridge = bridge.clone();
    let reader = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                inbound_bridge.handle_inbound(&line);
            }
        }
        tracing::debug!("Engine input closed");
    });

    let mut events = bridge.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::Ready => tracing::info!("Engine reported document loaded"),
                EngineEvent::ScriptResult(values) => {
                    tracing::info!(values = %values, "Script result")
                }
                EngineEvent::EngineError(values) => {
                    tracing::warn!(values = %values, "Engine error")
                }
            }
        }
    });

    tracing::info!("Listening for document operations. Press Ctrl+C to stop.");

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            control.close();
            control_task.await?
        }
        result = &mut control_task => result?,
    };

    reader.abort();
    event_logger.abort();
    writer.abort();
    if let Some(session) = session {
        session.reset().await;
    }

    result.map_err(Into::into)
}

fn show_config(config: Option<&BridgeConfig>) -> Result<()> {
    let config = config.cloned().unwrap_or_default();
    println!("{}", config.to_toml_string()?);
    Ok(())
}
