// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Octopussy gateway daemon CLI
//!
//! # Usage
//!
//! ```bash
//! # Default listeners
//! octopussy-gw
//!
//! # Custom port and socket, two peers
//! octopussy-gw --port 5000 --socket /run/gw.sock --peer hostb:4808 --peer unix:/tmp/c.sock
//!
//! # Generate and check a configuration file
//! octopussy-gw gen-config --output gw.toml
//! octopussy-gw validate --config gw.toml
//! ```

use clap::{Parser, Subcommand};
use octopussy_gw::{build_node, ConfigError, GwError, NodeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Octopussy gateway daemon
#[derive(Parser, Debug)]
#[command(name = "octopussy-gw")]
#[command(about = "Octopussy gateway daemon - links dispatchers across processes and hosts")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP listen port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Unix socket path (overrides the config file)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Peer to connect to: host:port or unix:<path> (can repeat)
    #[arg(long)]
    peer: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
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
        #[arg(short, long, default_value = "octopussy-gw.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = build_config(&args)?;

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("Octopussy gateway v{} ({})", env!("CARGO_PKG_VERSION"), config.name);
    println!("Press Ctrl+C to stop...");

    let (mut dsp, gateways) = build_node(&config)?;
    tracing::debug!(count = gateways.len(), "gateway work processes attached");
    dsp.poll_loop().map_err(GwError::from)?;

    let stats = dsp.stats();
    tracing::info!(?stats, "dispatcher stopped");
    Ok(())
}

fn build_config(args: &Args) -> Result<NodeConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    if let Some(port) = args.port {
        config.tcp_port = port;
    }
    if let Some(socket) = &args.socket {
        config.socket_path = socket.clone();
    }
    config.peers.extend(args.peer.iter().cloned());
    config.validate()?;
    Ok(config)
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = NodeConfig::example();
    std::fs::write(&output, config.to_toml()?)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match NodeConfig::from_file(&path) {
        Ok(config) => {
            println!("Configuration is valid: {}", config.name);
            println!("  TCP listener: {}", if config.listen_tcp { "on" } else { "off" });
            println!("  Unix listener: {}", if config.listen_unix { "on" } else { "off" });
            for peer in &config.peers {
                println!("  Peer: {}", peer);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
