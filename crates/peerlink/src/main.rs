//! peerlink - interactive peer channel client
//!
//! Connects to a forwarded local TCP endpoint, prints frames received from
//! the peer and sends lines typed on stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use peerlink::proto::HeaderProfile;
use peerlink::{ConsoleCommand, PeerClient, PeerConfig, PeerEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Reconnecting peer channel over a forwarded TCP endpoint")]
#[command(version)]
struct Cli {
    /// Log level for peerlink crates (overrides RUST_LOG)
    #[arg(long, global = true, env = "PEERLINK_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run the interactive console
    Run(RunArgs),

    /// Generate a default config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "peerlink.json")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Endpoint host
    host: Option<String>,

    /// Endpoint port
    port: Option<u16>,

    /// Path to config file
    #[arg(short, long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Do not retry after failures
    #[arg(long)]
    no_auto_reconnect: bool,

    /// Delay between reconnect attempts
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Interval between heartbeats
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Disable heartbeats
    #[arg(long)]
    no_heartbeat: bool,

    /// Wire header layout (compact or extended)
    #[arg(long)]
    header_profile: Option<HeaderProfile>,

    /// Wait this long for a reply to the handshake
    #[arg(long)]
    handshake_reply_timeout_ms: Option<u64>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<PeerConfig> {
        let mut config = match &self.config {
            Some(path) => PeerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => PeerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.no_auto_reconnect {
            config.reconnect.enabled = false;
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.reconnect.set_enabled(config.reconnect.enabled, Some(Duration::from_millis(ms)));
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.heartbeat.interval = Duration::from_millis(ms);
        }
        if self.no_heartbeat {
            config.heartbeat.enabled = false;
        }
        if let Some(profile) = self.header_profile {
            config.header_profile = profile;
        }
        if let Some(ms) = self.handshake_reply_timeout_ms {
            config.handshake_reply_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(format!("peerlink={level},peerlink_proto={level}"))?,
        None => EnvFilter::from_default_env().add_directive("peerlink=info".parse()?),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run(args) => {
            run_console(args.into_config()?).await?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn init_config(output: &std::path::Path) -> anyhow::Result<()> {
    PeerConfig::default().save(output)?;
    info!(path = %output.display(), "wrote default config");
    Ok(())
}

async fn run_console(config: PeerConfig) -> anyhow::Result<()> {
    info!(endpoint = %config.endpoint(), profile = %config.header_profile, "starting peerlink");

    let client = Arc::new(PeerClient::new(config)?);
    let events = client
        .take_events()
        .context("event receiver already taken")?;
    let printer = tokio::spawn(print_events(events));

    if let Err(e) = client.connect().await {
        warn!(error = %e, "initial connection failed");
    }
    eprintln!("{}", ConsoleCommand::help());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        };

        match ConsoleCommand::parse(&line) {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Reconnect => {
                client.disconnect().await;
                if let Err(e) = client.connect_with(client.reconnect_policy().enabled).await {
                    warn!(error = %e, "reconnect failed");
                }
            }
            ConsoleCommand::Auto(enabled) => {
                client.set_auto_reconnect(enabled, None);
                eprintln!("auto reconnect {}", if enabled { "enabled" } else { "disabled" });
            }
            ConsoleCommand::Send(text) => {
                if let Err(e) = client.send(text).await {
                    warn!(error = %e, "failed to send message, reconnecting");
                    if let Err(e) = client.connect_with(client.reconnect_policy().enabled).await {
                        warn!(error = %e, "reconnect failed");
                    }
                }
            }
            ConsoleCommand::Unknown(cmd) => eprintln!("unknown command {cmd}; {}", ConsoleCommand::help()),
            ConsoleCommand::Empty => {}
        }
    }

    client.set_auto_reconnect(false, None);
    client.disconnect().await;
    drop(client);
    printer.abort();
    info!("peerlink stopped");
    Ok(())
}

async fn print_events(mut events: tokio::sync::mpsc::Receiver<PeerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::Frame(frame) => {
                println!("<< [{}:{}] {}", frame.frame_type, frame.tag, frame.payload_text());
            }
            PeerEvent::Connected { addr } => eprintln!("connected to {addr}"),
            PeerEvent::Disconnected { reason } => eprintln!("disconnected: {reason}"),
            PeerEvent::Reconnecting { attempt, delay } => {
                eprintln!("reconnecting in {}ms (attempt {attempt})", delay.as_millis());
            }
            PeerEvent::ReconnectFailed { attempts, last_error } => {
                eprintln!("giving up after {attempts} attempts: {last_error}");
            }
            PeerEvent::ReconnectStopped => eprintln!("reconnect stopped"),
        }
    }
}
