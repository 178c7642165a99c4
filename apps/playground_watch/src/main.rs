use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use client_core::{ChannelEvent, ConnectionState, EventChannel, PlaygroundSession};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

use config::load_settings;

#[derive(Parser, Debug)]
struct Args {
    /// Playground event endpoint (ws://, wss://, http:// or https://).
    #[arg(long)]
    endpoint: Option<String>,
    #[arg(long, default_value = "playground.toml")]
    config: PathBuf,
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,
    #[arg(long)]
    ack_keepalives: bool,
}

fn summary(session: &PlaygroundSession) -> String {
    let backup = session
        .backup()
        .status()
        .map_or("none", |status| status.as_str());
    format!(
        "connection={} backup={backup} backup_cycles={} merkle_mode={} output_fragments={} history={}",
        session.connection().state(),
        session.backup().completed_cycles(),
        session.merkle().display_mode().as_str(),
        session.output().len(),
        session.output().history().len(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings(&args.config)?;
    if let Some(endpoint) = args.endpoint {
        settings.endpoint = endpoint;
    }
    if let Some(attempts) = args.max_reconnect_attempts {
        settings.max_reconnect_attempts = attempts;
    }
    settings.ack_keepalives |= args.ack_keepalives;

    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (channel, mut events) = EventChannel::connect(&settings.endpoint, settings.channel_config())
        .with_context(|| format!("failed to open event channel to {}", settings.endpoint))?;
    let mut session = PlaygroundSession::new();
    info!(session_id = %session.id(), endpoint = %channel.endpoint(), "watch: session started");

    let mut last_summary = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(session_id = %session.id(), "watch: interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = matches!(event, ChannelEvent::StateChanged(state) if state.is_terminal());
                session.apply(event);
                let current = summary(&session);
                if current != last_summary {
                    println!("{current}");
                    last_summary = current;
                }
                if terminal {
                    break;
                }
            }
        }
    }

    channel.close().await;
    session.drive(&mut events).await;
    if session.connection().state() == ConnectionState::Error {
        bail!("gave up reconnecting to {}", settings.endpoint);
    }
    Ok(())
}
