//! Telelink Service - thermostat telemetry over MQTT.
//!
//! Run with: `cargo run -p telelink-service`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use telelink_service::{
    Config, ConfigError, HostLink, LogDisplay, MqttSession, Supervisor, default_config_path,
    sensor,
};

/// Telelink Service - thermostat telemetry over MQTT.
#[derive(Parser, Debug)]
#[command(name = "telelink-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the lifecycle in the foreground (default behavior).
    Run,

    /// Load and validate the configuration.
    CheckConfig,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let path = args.config.clone().unwrap_or_else(default_config_path);

    match args.command {
        Some(Command::CheckConfig) => check_config(&path),
        Some(Command::InitConfig { force }) => init_config(&path, force),
        Some(Command::Run) | None => run(&args, &path).await,
    }
}

fn load(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        Config::load_validated(path)
    } else {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    match load(path) {
        Ok(_) => {
            println!("{} is valid", path.display());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e);
            Err(e.into())
        }
    }
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    println!("Set lifecycle.link.credentials (or interface = \"ethernet\") before running");
    Ok(())
}

async fn run(args: &Args, path: &Path) -> anyhow::Result<()> {
    let level = if args.verbose > 0 { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("telelink_service={}", level).parse()?)
                .add_directive(format!("telelink_core={}", level).parse()?),
        )
        .init();

    let config = load(path).with_context(|| format!("loading {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());

    let broker = &config.lifecycle.session.broker;
    let link = Arc::new(HostLink::new(broker.host.clone(), broker.port));
    let session = Arc::new(MqttSession::default());
    let sensor = sensor::from_config(&config.sensor);
    let display = Arc::new(LogDisplay::new());

    let supervisor = Supervisor::new(config, link, session, sensor, display);
    let shutdown = supervisor.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let report = supervisor.run().await;
    info!("Ran {} lifecycles", report.lifecycles);
    match report.last {
        Ok(reason) if reason.is_shutdown() => Ok(()),
        Ok(reason) => {
            warn!("Stopped after: {}", reason);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
