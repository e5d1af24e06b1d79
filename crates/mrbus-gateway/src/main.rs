// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MRBus Gateway CLI
//!
//! Connects to an MRBus UDP gateway, attaches the configured devices and
//! groups, and logs their state changes.
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! mrbus-gateway --config gateway.toml
//!
//! # Generate an example configuration
//! mrbus-gateway gen-config --output gateway.toml
//!
//! # Check a configuration file
//! mrbus-gateway validate --config gateway.toml
//!
//! # Send one frame (LIGHT/SET_STATE switch 1 on) and print the answer
//! mrbus-gateway send --config gateway.toml --receiver 9 --command 5 --sub-command 1 --payload 01,01
//! ```

use clap::{Parser, Subcommand};
use mrbus::devices::UPDATE_CHANNEL_CAPACITY;
use mrbus::{
    BusLink, Device, DeviceConfig, DeviceKind, Frame, Gateway, GatewayConfig, GatewayStatsSnapshot,
    GatewayStatus, GroupConfig, GroupKind, MrbusConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Pause before reconnecting after the receive socket failed.
const RESTART_DELAY: Duration = Duration::from_secs(5);

/// MRBus UDP gateway
#[derive(Parser, Debug)]
#[command(name = "mrbus-gateway")]
#[command(about = "MRBus UDP gateway - bus frames to device state and back")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "mrbus.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the file
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "mrbus.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Send a single frame and print the outcome
    Send {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Receiver bus address (255 = broadcast)
        #[arg(long)]
        receiver: u8,

        /// Command group
        #[arg(long)]
        command: u8,

        /// Sub-command
        #[arg(long)]
        sub_command: u8,

        /// Payload bytes in hex, comma-separated (e.g. 01,00)
        #[arg(long, value_delimiter = ',', value_parser = parse_hex_byte)]
        payload: Vec<u8>,
    },
}

fn parse_hex_byte(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid byte '{}': {}", s, e))
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::Send {
                config,
                receiver,
                command,
                sub_command,
                payload,
            } => cmd_send(config, receiver, command, sub_command, payload).await,
        };
    }

    let config = MrbusConfig::from_file(&args.config)?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    println!("MRBus Gateway v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();
    println!(
        "Bus ID {} via {}:{}",
        config.gateway.bus_id, config.gateway.ip_address, config.gateway.udp_port
    );

    let gateway = Gateway::new(config.gateway.clone());
    let (updates_tx, mut updates_rx) = broadcast::channel::<mrbus::ChannelUpdate>(UPDATE_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match updates_rx.recv().await {
                Ok(update) => {
                    println!("{} {} = {}", update.thing, update.channel, update.state);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {} channel updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    gateway.start().await?;
    if let (Some(resolved), Some(local)) = (gateway.resolved_config(), gateway.local_addr()) {
        println!(
            "Bus address {}, gateway {}, listening on {}",
            resolved.bus_address, resolved.gateway_addr, local
        );
    }

    // Reconnect when the link drops
    let watch_gateway = gateway.clone();
    let mut status_rx = gateway.subscribe_status();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            let GatewayStatus::LinkLost(reason) = status else {
                continue;
            };
            tracing::warn!(
                "gateway link lost ({}), restarting in {}s",
                reason,
                RESTART_DELAY.as_secs()
            );
            loop {
                tokio::time::sleep(RESTART_DELAY).await;
                match watch_gateway.restart().await {
                    Ok(()) => break,
                    Err(e) => tracing::error!("gateway restart failed: {}", e),
                }
            }
        }
    });

    let link: Arc<dyn BusLink> = Arc::new(gateway.clone());
    let mut endpoints = Vec::new();
    for device in &config.devices {
        let endpoint = Device::from_config(device, link.clone(), updates_tx.clone());
        match endpoint.attach() {
            Ok(()) => {
                println!(
                    "Device: {} ({}) at {}",
                    device.display_name(),
                    device.kind.label(),
                    device.address
                );
                endpoints.push(endpoint);
            }
            Err(e) => tracing::warn!("skipping device {}: {}", device.display_name(), e),
        }
    }
    for group in &config.groups {
        let endpoint = Device::from_group_config(group, link.clone(), updates_tx.clone());
        match endpoint.attach() {
            Ok(()) => {
                println!("Group: {} at {}", group.display_name(), group.address);
                endpoints.push(endpoint);
            }
            Err(e) => tracing::warn!("skipping group {}: {}", group.display_name(), e),
        }
    }
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    // Initial state of every channel
    let initial = endpoints.clone();
    tokio::spawn(async move {
        for endpoint in initial {
            endpoint.refresh_all().await;
        }
    });

    // Stats reporting task
    if config.stats_interval_secs > 0 {
        let stats_gateway = gateway.clone();
        let period = Duration::from_secs(config.stats_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if !stats_gateway.is_running() {
                    break;
                }
                print_stats(&stats_gateway.stats());
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    for endpoint in &endpoints {
        if let Err(e) = endpoint.detach() {
            tracing::warn!("detach failed: {}", e);
        }
    }
    gateway.shutdown().await;

    println!("\nFinal Statistics:");
    print_stats(&gateway.stats());

    Ok(())
}

fn example_config() -> MrbusConfig {
    MrbusConfig {
        log_level: "info".into(),
        stats_interval_secs: 60,
        gateway: GatewayConfig::new(1, "192.168.1.50", 5000),
        devices: vec![
            DeviceConfig {
                kind: DeviceKind::LightControl2,
                address: 3,
                name: Some("kitchen".into()),
            },
            DeviceConfig {
                kind: DeviceKind::Universal4I4O,
                address: 4,
                name: Some("garage".into()),
            },
            DeviceConfig {
                kind: DeviceKind::OvenControl,
                address: 10,
                name: Some("oven".into()),
            },
            DeviceConfig {
                kind: DeviceKind::RollerShutter,
                address: 12,
                name: Some("living-room-shutter".into()),
            },
        ],
        groups: vec![GroupConfig {
            kind: GroupKind::SwitchGroup,
            address: 5,
            name: Some("hallway".into()),
        }],
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&example_config())?;

    let content = format!(
        r#"# MRBus Gateway Configuration
# Generated by mrbus-gateway gen-config
#
# device kinds: lightcontrol2, universal4i4o, ovencontrol, rollershutter
# group kinds: switchgroup

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match MrbusConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "Gateway: bus ID {} via {}:{}",
                config.gateway.bus_id, config.gateway.ip_address, config.gateway.udp_port
            );
            println!("Devices: {}", config.devices.len());
            for device in &config.devices {
                println!(
                    "  [{}] {} ({})",
                    device.address,
                    device.display_name(),
                    device.kind.label()
                );
            }
            println!("Groups: {}", config.groups.len());
            for group in &config.groups {
                println!("  [{}] {}", group.address, group.display_name());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_send(
    config_path: PathBuf,
    receiver: u8,
    command: u8,
    sub_command: u8,
    payload: Vec<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = MrbusConfig::from_file(&config_path)?;
    config.gateway.time_sync_interval_secs = 0;

    let gateway = Gateway::new(config.gateway);
    gateway.start().await?;

    let frame = Frame::request(receiver, command, sub_command, payload);
    let result = gateway.send_get_answer(frame).await;
    gateway.shutdown().await;

    println!(
        "delivered: {} after {} attempt(s)",
        result.delivered, result.attempts
    );
    if let Some(answer) = &result.answer {
        println!("answer: {}", answer);
        println!("payload: {}", mrbus::frame::hex(&answer.payload));
    }

    if result.delivered {
        Ok(())
    } else {
        std::process::exit(2);
    }
}

fn print_stats(stats: &GatewayStatsSnapshot) {
    println!("--- Gateway Statistics ---");
    println!(
        "  sent {} datagrams, received {} frames ({:.1} frames/s)",
        stats.datagrams_sent,
        stats.frames_received,
        stats.frames_per_second()
    );
    println!(
        "  {} ACK, {} NACK, {} timeouts, {} unmatched",
        stats.acks, stats.nacks, stats.ack_timeouts, stats.unmatched_answers
    );
    println!(
        "  {} to devices, {} to groups, {} decode errors, {} checksum mismatches",
        stats.device_dispatches,
        stats.group_dispatches,
        stats.decode_errors,
        stats.checksum_mismatches
    );
}
