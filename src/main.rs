//! Helmet pairing tool for Headware smart helmets.
//!
//! Scans for helmets, registers one, and relays its traffic to the
//! terminal. The heavy lifting lives in the library; this binary only
//! wires settings -> logging -> radio -> manager and renders events.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::info;

use headware_link::infrastructure::bluetooth::protocol::{self, InboundKind};
use headware_link::infrastructure::logging;
use headware_link::{
    CharacteristicMessage, HelmetEvent, HelmetManager, LinkConfig, MessageSeverity, SessionState,
    SettingsService, SystemRadio,
};

#[derive(Parser)]
#[command(name = "headware-link")]
#[command(about = "Helmet pairing tool for Headware smart helmets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby helmets
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "8")]
        duration: u64,
        /// List every BLE device, not just helmets
        #[arg(long)]
        all: bool,
    },
    /// Connect to a helmet and relay its traffic until it disconnects
    Link {
        /// Helmet name or address to pick; defaults to the first helmet seen
        #[arg(short, long)]
        device: Option<String>,
        /// Payload to write once the session is ready
        #[arg(short, long)]
        send: Option<String>,
    },
    /// Print the active configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = SettingsService::new()?;
    let _logging_guard = logging::init_logger(&settings.get().log_settings)?;

    match cli.command {
        Commands::Scan { duration, all } => scan(&settings, duration, all).await,
        Commands::Link { device, send } => link(settings, device, send).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(settings.get())?);
            Ok(())
        }
    }
}

async fn spawn_manager(
    config: LinkConfig,
) -> Result<(HelmetManager, mpsc::UnboundedReceiver<HelmetEvent>)> {
    let adapter = SystemRadio::first_adapter().await?;
    let (radio_tx, radio_rx) = mpsc::unbounded_channel();
    let radio = SystemRadio::new(
        adapter,
        config.service_uuid,
        config.characteristic_uuid,
        radio_tx,
    );
    let (event_tx, events) = mpsc::unbounded_channel();
    let manager = HelmetManager::new(radio, radio_rx, config, event_tx);
    Ok((manager, events))
}

async fn scan(settings: &SettingsService, duration: u64, all: bool) -> Result<()> {
    let mut config = LinkConfig::from_settings(settings.get())?;
    if all {
        config.name_prefix = None;
    }
    let (manager, mut events) = spawn_manager(config).await?;

    println!("Scanning for helmets ({duration} seconds)...");
    manager.start_scan();

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    let mut count = 0usize;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Some(HelmetEvent::DeviceDiscovered(device)) => {
                    count += 1;
                    let rssi = device
                        .rssi
                        .map(|r| format!("{r} dBm"))
                        .unwrap_or_else(|| "N/A".to_string());
                    println!("  {} ({}) RSSI: {}", device.name, device.address, rssi);
                }
                Some(HelmetEvent::ScanFailed(error)) => {
                    eprintln!("Scan failed: {error}");
                    break;
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    manager.stop_scan();
    manager.shutdown().await;
    println!("\n{count} helmet(s) found");
    Ok(())
}

async fn link(
    mut settings: SettingsService,
    target: Option<String>,
    send: Option<String>,
) -> Result<()> {
    let config = LinkConfig::from_settings(settings.get())?;
    let (manager, mut events) = spawn_manager(config).await?;

    println!("Scanning for helmets...");
    manager.start_scan();

    let mut pending_write = send.map(String::into_bytes);
    let mut connected_address: Option<String> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; disconnecting");
                manager.disconnect();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    HelmetEvent::DeviceDiscovered(device) => {
                        if connected_address.is_some() {
                            continue;
                        }
                        let wanted = target
                            .as_deref()
                            .map_or(true, |t| device.name.contains(t) || device.address.contains(t));
                        if !wanted {
                            continue;
                        }
                        println!("Found {} ({})", device.name, device.address);
                        connected_address = Some(device.address.clone());
                        manager.stop_scan();
                        manager.connect(device);
                    }
                    HelmetEvent::StateChanged { state, error } => {
                        match &error {
                            Some(error) => println!("Session {state:?}: {error}"),
                            None => println!("Session {state:?}"),
                        }
                        match state {
                            SessionState::Ready => {
                                if let Some(address) = connected_address.as_deref() {
                                    settings.remember_connection(address)?;
                                    info!(%address, "helmet registered");
                                }
                                if let Some(payload) = pending_write.take() {
                                    let message = CharacteristicMessage::outbound(payload);
                                    println!("Writing {} bytes", message.payload.len());
                                    manager.write(message.payload);
                                }
                            }
                            SessionState::Disconnected => break,
                            _ => {}
                        }
                    }
                    HelmetEvent::Inbound(message) => {
                        match protocol::classify_inbound(&message.payload) {
                            InboundKind::Ui(text) => println!("Helmet: {text}"),
                            InboundKind::Opaque => {
                                println!("Helmet data: {:02x?}", message.payload)
                            }
                        }
                    }
                    HelmetEvent::WriteOutcome(Ok(())) => println!("Write acknowledged"),
                    HelmetEvent::WriteOutcome(Err(error)) => println!("Write failed: {error}"),
                    HelmetEvent::ScanFailed(error) => {
                        eprintln!("Scan failed: {error}");
                        break;
                    }
                    HelmetEvent::LogMessage(status) => match status.severity {
                        MessageSeverity::Warning | MessageSeverity::Error => {
                            eprintln!("{}", status.message)
                        }
                        _ => {}
                    },
                }
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}
