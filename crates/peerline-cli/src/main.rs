//! peerline CLI: one-to-one line chat between two nodes over the LAN.

use std::sync::{Arc, Mutex, PoisonError};

use clap::{Parser, Subcommand};
use peerline_core::{setup, Config, ControllerEvent, Feed, FeedEvent, LogLevel, RoleController};
use peerline_transport::{LanTransport, StaticRadio};
use peerline_types::{DeviceAddress, DeviceRecord, RoleMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const FEED_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(
    name = "peerline",
    about = "Line chat between two nearby nodes",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for responders and connect to one.
    Initiate {
        /// Connect straight to this address (host:port) instead of picking
        /// from the scan results.
        #[arg(long)]
        connect: Option<String>,
    },

    /// Listen for one initiator.
    Respond,

    /// Print the effective configuration as TOML.
    PrintConfig,
}

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Scan,
    Mode(RoleMode),
    Devices,
    /// Device list index (1-based) or address.
    Connect(String),
    Quit,
    Send(String),
    Usage,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };
    let mut parts = rest.split_whitespace();
    let command = match (parts.next(), parts.next()) {
        (Some("scan"), None) => Command::Scan,
        (Some("respond"), None) => Command::Mode(RoleMode::Responder),
        (Some("idle"), None) => Command::Mode(RoleMode::Idle),
        (Some("devices"), None) => Command::Devices,
        (Some("connect"), Some(target)) => Command::Connect(target.to_string()),
        (Some("quit" | "exit"), None) => Command::Quit,
        _ => Command::Usage,
    };
    Some(command)
}

/// Resolve a `/connect` argument against the last device list.
fn resolve_target(target: &str, devices: &[DeviceRecord]) -> DeviceAddress {
    target
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| devices.get(i))
        .map_or_else(|| DeviceAddress::from(target), |record| record.address.clone())
}

/// Log to stderr, `RUST_LOG` taking precedence over `default_level`.
fn log_subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // The configured level is not known until the config is loaded.
    let config = tracing::subscriber::with_default(log_subscriber("info"), || {
        setup::load_config(cli.config.as_deref())
    })?;
    log_subscriber(&config.node.log_level).init();

    match cli.command {
        Commands::Initiate { connect } => run(config, RoleMode::Initiator, connect),
        Commands::Respond => run(config, RoleMode::Responder, None),
        Commands::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn run(config: Config, mode: RoleMode, connect: Option<String>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(chat(config, mode, connect))
}

async fn chat(config: Config, mode: RoleMode, connect: Option<String>) -> anyhow::Result<()> {
    let transport = Arc::new(LanTransport::new(config.lan_options()?));
    let (feed_tx, feed_rx) = mpsc::channel(FEED_CAPACITY);
    let feed = Feed::new(feed_tx, config.node.log_filter);
    feed.log("peerline", format!("App Version : {VERSION}"), LogLevel::Info);

    let mut controller =
        RoleController::new(&config, transport, Arc::new(StaticRadio::ready()), feed);
    let events = controller.event_sender();
    let devices = Arc::new(Mutex::new(Vec::new()));

    tokio::spawn(print_feed(feed_rx, Arc::clone(&devices)));
    tokio::spawn(read_commands(events.clone(), devices));
    tokio::spawn(shutdown_on_ctrl_c(events.clone()));

    events
        .send(ControllerEvent::RequestMode(mode))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    if let Some(address) = connect {
        events
            .send(ControllerEvent::Connect(DeviceAddress::from(address)))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    controller.run().await;
    tracing::info!("peerline stopped");
    Ok(())
}

async fn print_feed(
    mut feed: mpsc::Receiver<FeedEvent>,
    devices: Arc<Mutex<Vec<DeviceRecord>>>,
) {
    while let Some(event) = feed.recv().await {
        match event {
            FeedEvent::Devices(list) => {
                print_devices(&list);
                *devices.lock().unwrap_or_else(PoisonError::into_inner) = list;
            }
            other => println!("{other}"),
        }
    }
}

fn print_devices(devices: &[DeviceRecord]) {
    if devices.is_empty() {
        println!("(no devices)");
        return;
    }
    for (i, device) in devices.iter().enumerate() {
        println!("{:>3}. {device}", i + 1);
    }
}

async fn read_commands(
    events: mpsc::Sender<ControllerEvent>,
    devices: Arc<Mutex<Vec<DeviceRecord>>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };
        let outgoing = match command {
            Command::Scan => vec![
                ControllerEvent::RequestMode(RoleMode::Idle),
                ControllerEvent::RequestMode(RoleMode::Initiator),
            ],
            Command::Mode(mode) => vec![ControllerEvent::RequestMode(mode)],
            Command::Devices => {
                {
                    let list = devices.lock().unwrap_or_else(PoisonError::into_inner);
                    print_devices(&list);
                }
                continue;
            }
            Command::Connect(target) => {
                let address = {
                    let list = devices.lock().unwrap_or_else(PoisonError::into_inner);
                    resolve_target(&target, &list)
                };
                vec![ControllerEvent::Connect(address)]
            }
            Command::Send(text) => vec![ControllerEvent::Send(text)],
            Command::Usage => {
                println!("commands: /scan /respond /idle /devices /connect <n|address> /quit");
                continue;
            }
            Command::Quit => break,
        };
        for event in outgoing {
            if events.send(event).await.is_err() {
                return;
            }
        }
    }
    let _ = events.send(ControllerEvent::Shutdown).await;
}

async fn shutdown_on_ctrl_c(events: mpsc::Sender<ControllerEvent>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupted, shutting down");
        let _ = events.send(ControllerEvent::Shutdown).await;
    }
}
