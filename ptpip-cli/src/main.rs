//! ptpip-cli - Command-line interface for PTP/IP cameras
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use ptpip_client::{Client, Config};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ptpip-cli")]
#[command(about = "Command-line interface for PTP/IP cameras")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "PTPIP_CONFIG")]
    config: Option<PathBuf>,

    /// Responder host
    #[arg(long)]
    host: Option<String>,

    /// Port shared by all sockets
    #[arg(short, long)]
    port: Option<u16>,

    /// Command-data socket port
    #[arg(long)]
    cmd_port: Option<u16>,

    /// Event socket port
    #[arg(long)]
    event_port: Option<u16>,

    /// Streamer socket port
    #[arg(long)]
    stream_port: Option<u16>,

    /// Vendor extension (e.g. fuji)
    #[arg(short, long)]
    vendor: Option<String>,

    /// Friendly name announced to the responder
    #[arg(long)]
    name: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Show device info
    Info,

    /// Show every property in the current-state list (Fuji)
    State,

    /// Read a property value
    Get {
        /// Property code (hex with 0x, or decimal)
        code: String,
    },

    /// Write a property value
    Set {
        /// Property code
        code: String,
        /// New value
        value: String,
    },

    /// Show a property descriptor
    Describe {
        /// Property code
        code: String,
    },

    /// Release the shutter
    Capture {
        /// Write the preview image here (Fuji)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run a raw operation and dump every packet
    Opreq {
        /// Operation code
        code: String,
        /// Up to five parameters
        params: Vec<String>,
    },

    /// Measure a liveness probe round trip
    Probe,

    /// Save live view frames as frame-NNNNN.jpg
    Liveview {
        /// Number of frames to save
        #[arg(short, long, default_value = "10")]
        frames: usize,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Print events as they arrive until Ctrl+C
    Events,
}

fn load_config(cli: &Cli, streaming: bool) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_env_overrides();

    if let Some(host) = &cli.host {
        config.responder.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.responder.port = port;
    }
    if cli.cmd_port.is_some() {
        config.responder.command_data_port = cli.cmd_port;
    }
    if cli.event_port.is_some() {
        config.responder.event_port = cli.event_port;
    }
    if cli.stream_port.is_some() {
        config.responder.streamer_port = cli.stream_port;
    }
    if let Some(vendor) = &cli.vendor {
        config.responder.vendor = vendor.clone();
    }
    if let Some(name) = &cli.name {
        config.initiator.friendly_name = name.clone();
    }
    config.transport.streaming |= streaming;

    config.validate()?;
    Ok(config)
}

async fn connect(client: &Client) -> Result<(), Box<dyn std::error::Error>> {
    client.connect().await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let streaming = matches!(cli.command, Some(Commands::Liveview { .. }));
    let config = load_config(&cli, streaming)?;
    tracing::debug!(
        "Responder {} (vendor {}, streaming {})",
        config.responder.host,
        config.responder.vendor,
        config.transport.streaming
    );
    let client = Client::new(config.connection_config().await?);

    match cli.command.clone() {
        Some(Commands::Repl) | None => {
            repl::run(client, &config, cli.json).await?;
        }
        Some(Commands::Liveview { frames, out }) => {
            connect(&client).await?;
            let result = commands::save_frames(&client, frames, &out).await;
            client.close().await?;
            match result {
                Ok(saved) => println!(
                    "{} {} frames to {}",
                    "Saved".green(),
                    saved,
                    out.display()
                ),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Events) => {
            connect(&client).await?;
            commands::watch_events(&client).await;
            client.close().await?;
        }
        Some(cmd) => {
            connect(&client).await?;

            let result = commands::execute(&client, cmd, cli.json).await;
            match result {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    let _ = client.close().await;
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["ptpip-cli", "--vendor", "fuji", "get", "0xd02a"]);
        assert_eq!(cli.vendor.as_deref(), Some("fuji"));
        assert_eq!(
            cli.command,
            Some(Commands::Get {
                code: "0xd02a".to_string()
            })
        );

        let cli = Cli::parse_from(["ptpip-cli", "liveview", "--frames", "3", "--out", "/tmp"]);
        assert_eq!(
            cli.command,
            Some(Commands::Liveview {
                frames: 3,
                out: PathBuf::from("/tmp")
            })
        );
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "ptpip-cli",
            "--host",
            "10.0.0.2",
            "--stream-port",
            "55742",
            "--name",
            "bench rig",
            "info",
        ]);
        let config = load_config(&cli, true).unwrap();
        assert_eq!(config.responder.host, "10.0.0.2");
        assert_eq!(config.responder.streamer_port(), 55742);
        assert_eq!(config.initiator.friendly_name, "bench rig");
        assert!(config.transport.streaming);
    }

    #[test]
    fn test_ambiguous_ports_rejected() {
        let cli = Cli::parse_from(["ptpip-cli", "--port", "1234", "--event-port", "5678", "info"]);
        assert!(load_config(&cli, false).is_err());
    }
}
