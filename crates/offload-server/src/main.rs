//! deck-offload — recover newly recorded clips from a network video deck.
//!
//! The server owns exactly one control connection to the deck (CRLF line
//! protocol, port 9993) and offloads newly recorded clips over the deck's
//! anonymous file surface into a destination directory.
//!
//! ## Flow
//! 1. **Connect**: open the control connection and fetch the clip catalog.
//! 2. **Monitor**: capture a baseline listing, poll slot/transport status
//!    every second, re-list on an interval and diff against the baseline.
//! 3. **Offload**: on detection, retrieve the newest new clip into the
//!    destination directory.
//! 4. **Stop**: one final listing diff catches a clip that finished
//!    recording just before shutdown.
//!
//! Core events stream to stdout as JSON lines for whatever dispatch layer
//! is attached.

mod cli;
mod config;
mod deck;
mod error;
mod events;
mod monitor;
mod status;
mod transfer;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::events::EventBus;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,offload_server=info")),
        )
        .init();

    let cfg = match args.config.as_ref() {
        Some(path) => config::OffloadConfig::load(path)?,
        None => config::OffloadConfig::default(),
    };

    match &args.cmd {
        cli::Command::Catalog => run_catalog(&args, &cfg),
        cli::Command::Run { destination } => run_monitor(&args, &cfg, destination.as_deref()),
        cli::Command::Rename { path, new_name } => {
            let events = EventBus::new();
            let mut rx = events.subscribe();
            let old_name = file_name_of(path);
            let renamed = transfer::rename_clip(path, new_name)?;
            events.file_renamed(&old_name, &file_name_of(&renamed));
            while let Ok(event) = rx.try_recv() {
                if let Ok(json) = serde_json::to_string(&event) {
                    println!("{json}");
                }
            }
            println!("{}", renamed.display());
            Ok(())
        }
    }
}

fn run_catalog(args: &cli::Args, cfg: &config::OffloadConfig) -> Result<()> {
    let deck_addr = config::resolve_deck(args.deck.as_deref(), cfg)?;
    let slots = config::resolve_slots(&args.slots, cfg);

    let client = deck::DeckClient::connect(&deck_addr, EventBus::new())?;
    let catalog = client.catalog(&slots)?;
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    client.disconnect();
    Ok(())
}

fn run_monitor(
    args: &cli::Args,
    cfg: &config::OffloadConfig,
    destination: Option<&Path>,
) -> Result<()> {
    let deck_addr = config::resolve_deck(args.deck.as_deref(), cfg)?;
    let slots = config::resolve_slots(&args.slots, cfg);
    let destination = config::resolve_destination(destination, cfg)?;

    let events = EventBus::new();
    spawn_event_relay(&events);

    let client = deck::DeckClient::connect(&deck_addr, events.clone())?;
    tracing::debug!(state = ?client.state(), "control connection ready");
    let catalog = client.catalog(&slots)?;
    tracing::info!(clips = catalog.len(), "clip catalog fetched");

    client.start_status_poll(&slots);

    let source = Arc::new(transfer::FtpClipSource::new(
        config::host_only(&deck_addr),
        cfg.ftp_port.unwrap_or(deck_proto::FTP_PORT),
    ));
    let mut session = monitor::MonitorSession::start(
        source,
        monitor::MonitorOptions {
            slots,
            destination,
            interval: config::monitor_interval(cfg),
        },
        events.clone(),
    )?;

    let (sig_tx, sig_rx) = crossbeam_channel::bounded(1);
    let _ = ctrlc::set_handler(move || {
        let _ = sig_tx.send(());
    });
    tracing::info!("monitoring; press Ctrl-C to stop");
    let _ = sig_rx.recv();

    if let Some(snapshot) = client.status_snapshot() {
        if let Ok(json) = serde_json::to_string(&snapshot) {
            tracing::info!(status = %json, "stopping");
        }
    }
    let report = session.stop();
    client.stop_status_poll();
    client.disconnect();

    match report.last_transferred {
        Some(file) => {
            tracing::info!(name = %file.name, path = %file.path, "final check offloaded a clip");
        }
        None => tracing::info!("final check found no new clips"),
    }
    Ok(())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Drain core events to stdout as JSON lines.
fn spawn_event_relay(events: &EventBus) {
    let mut rx = events.subscribe();
    std::thread::spawn(move || {
        loop {
            match rx.blocking_recv() {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        println!("{json}");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event relay lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
