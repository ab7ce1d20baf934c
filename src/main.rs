//! `pace` command-line tool
//!
//! Reads and writes attributes of a PACE pressure controller, sends raw
//! protocol lines and runs the built-in simulator.
//!
//! # Usage
//!
//! ```bash
//! pace get pressure --module 1
//! pace set src_pressure_setpoint 1500 --module 1
//! pace set startup_mode '["MEAS", 0.0]'
//! pace raw '*IDN?'
//! pace dump --module 2
//! pace simulate --port 5025
//! ```
//!
//! Values are printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pace_scpi::config::PaceConfig;
use pace_scpi::device::{attributes, Controller, Pace};
use pace_scpi::engine::FutureEngine;
use pace_scpi::logging::{self, OutputFormat, TracingConfig};
use pace_scpi::simulator::PaceSimulator;
use pace_scpi::value::Value;
use serde_json::json;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pace")]
#[command(about = "GE Druck PACE pressure controller client", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = pace_scpi::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Controller address, overrides the configuration (tcp://host[:port])
    #[arg(long, global = true)]
    address: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Compact)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read one attribute
    Get {
        name: String,
        #[arg(long, short)]
        module: Option<u8>,
    },

    /// Write one attribute. The value is parsed as JSON, falling back to text
    Set {
        name: String,
        value: String,
        #[arg(long, short)]
        module: Option<u8>,
    },

    /// Send a raw line; queries print their reply
    Raw { line: String },

    /// Read every attribute of a module, or of the device without --module
    Dump {
        #[arg(long, short)]
        module: Option<u8>,
    },

    /// List attribute names and their commands
    Attributes {
        #[arg(long, short)]
        module: Option<u8>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Serve the simulator over TCP
    Simulate {
        #[arg(long, default_value_t = pace_scpi::transport::DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = PaceConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(address) = &cli.address {
        config.connection.address = address.clone();
    }
    config.validate()?;

    let level = logging::parse_log_level(&config.application.log_level)?;
    logging::init(TracingConfig::new(level).with_format(cli.log_format))?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Get { name, module } => {
            let pace = connect(&config).await?;
            let value = pace.read_named(&name, module).await?;
            print_json(&serde_json::to_value(&value)?)
        }
        Commands::Set { name, value, module } => {
            let pace = connect(&config).await?;
            let value = parse_value(&value);
            let written = pace.write_named(&name, module, &value).await?;
            print_json(&serde_json::to_value(&written)?)
        }
        Commands::Raw { line } => {
            let pace = connect(&config).await?;
            let reply = pace.raw(&line).await?;
            if !reply.is_empty() {
                println!("{}", reply);
            }
            Ok(())
        }
        Commands::Dump { module } => {
            let pace = connect(&config).await?;
            if let Some(id) = module {
                pace.module(id)?;
            }
            let replies = pace.dump(module).await?;
            let mut object = serde_json::Map::new();
            for (label, result) in replies.iter() {
                let entry = match result {
                    Ok(value) => serde_json::to_value(value)?,
                    Err(error) => json!({ "error": error.to_string() }),
                };
                object.insert(label.to_string(), entry);
            }
            print_json(&serde_json::Value::Object(object))
        }
        Commands::Attributes { module } => {
            let commands = match module {
                Some(id) => attributes::module_commands(id),
                None => attributes::device_commands(),
            };
            for (name, template, request) in commands {
                println!("{:<28} {:<36} {}", name, template, request);
            }
            Ok(())
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::Simulate { port } => {
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            let simulator = PaceSimulator::new(config.simulator.clone());
            tokio::select! {
                result = simulator.serve(listener) => result,
                _ = tokio::signal::ctrl_c() => {
                    info!("simulator shutting down");
                    Ok(())
                }
            }
        }
    }
}

async fn connect(config: &PaceConfig) -> Result<Pace<FutureEngine>> {
    let connection = &config.connection;
    let address = connection.address()?;
    info!(%address, "connecting");
    let pace = Pace::connect(&address, connection.connect_timeout(), connection.timeout())
        .await
        .with_context(|| format!("connecting to {}", address))?;
    Ok(config.device.apply(pace))
}

fn parse_value(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::Text(text.to_string()))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
