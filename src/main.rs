//! Ventilation coordinator - command-line entry point
//!
//! Drives a simulated ventilation unit through the coordinator so polling,
//! derived metrics and command dispatch can be observed from a terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use ventilation_coordinator::{
    logging::init_logging, mock::SimulatedUnit, DeviceInstance, ServerConfig,
};

/// Ventilation coordinator configuration
#[derive(Parser, Debug)]
#[command(name = "ventilation-coordinator")]
#[command(about = "Polling coordinator and command dispatcher for home ventilation units")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Device address, overrides the configuration file
    #[arg(long, global = true)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the unit until interrupted (default)
    Run,
    /// Run a single command, print the refreshed sensors and exit
    Dispatch {
        /// Command name, e.g. set_profile_fan_speed_home
        name: String,

        /// Parameters as a JSON object
        #[arg(default_value = "{}")]
        params: String,
    },
    /// Print the effective configuration and exit
    PrintConfig,
}

impl Cli {
    fn load_config(&self) -> Result<ServerConfig> {
        let mut overrides = Vec::new();
        if let Some(host) = &self.host {
            overrides.push(("device.host", host.as_str()));
        }
        if self.debug {
            overrides.push(("logging.level", "debug"));
        }

        ServerConfig::load_with_overrides(self.config.as_deref(), &overrides)
            .context("loading configuration")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    if let Some(Command::PrintConfig) = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(config.logging.log_config()?)?;

    info!(
        "Starting ventilation coordinator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let unit = Arc::new(SimulatedUnit::new());
    let device = DeviceInstance::setup(
        "simulated",
        config.device.clone(),
        config.polling.coordinator_config(),
        unit,
    )
    .await
    .context("setting up ventilation unit")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Dispatch { name, params } => {
            let params: serde_json::Value =
                serde_json::from_str(&params).context("parsing command parameters")?;
            let outcome = device.dispatch(&name, &params).await?;
            println!("{name}: {} (generation {:?})", outcome.state, outcome.generation);
            print_readings(&device);
        }
        _ => {
            let mut updates = device.coordinator().subscribe();
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received interrupt, shutting down");
                        break;
                    }
                    update = updates.recv() => match update {
                        Ok(update) if update.is_stale() => {
                            warn!(generation = update.generation, "Serving stale data");
                        }
                        Ok(_) => print_readings(&device),
                        Err(e) => warn!("Update stream lagged: {}", e),
                    }
                }
            }
        }
    }

    device.unload().await;
    Ok(())
}

fn print_readings(device: &DeviceInstance) {
    for (key, reading) in device.sensor_readings() {
        match reading.value {
            Some(value) => println!("{key:>26}: {value}"),
            None => println!("{key:>26}: unknown"),
        }
    }
}
