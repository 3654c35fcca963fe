// src/main.rs - tankctl entry point
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use tankctl::config::{self, Config, ConfigFile};
use tankctl::hardware::{SimulatedValves, ValveBank};
use tankctl::inhibit::InhibitGate;
use tankctl::profile::{ConstantSetpoint, ProfileFile, SetpointSource};
use tankctl::sim::TankPlant;
use tankctl::store::MemoryStore;
use tankctl::{ModeSupervisor, TankMode};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser)]
#[command(name = "tankctl", version, about = "Tank thermostat controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller against the simulated tank until Ctrl-C
    Run {
        #[arg(long, default_value = "tankctl.toml")]
        config: PathBuf,
        /// Initial tank mode
        #[arg(long)]
        mode: Option<TankMode>,
        /// Start with valve control inhibited for warning.inhibit_second
        #[arg(long)]
        inhibit: bool,
        #[arg(long, default_value = "info")]
        log_level: tracing::Level,
    },
    /// Validate the configuration and profile, and print the setpoint
    Check {
        #[arg(long, default_value = "tankctl.toml")]
        config: PathBuf,
        /// Instant to look the setpoint up for (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config, mode, inhibit, log_level } => {
            tracing_subscriber::fmt().with_max_level(log_level).init();
            let run_id = uuid::Uuid::new_v4();
            run(config, mode, inhibit)
                .instrument(tracing::info_span!("run", id = %run_id))
                .await
        }
        Command::Check { config, at } => {
            tracing_subscriber::fmt().with_max_level(tracing::Level::WARN).init();
            check(config, at)
        }
    }
}

fn setpoint_source(config: &Config) -> Result<Arc<dyn SetpointSource>, BoxError> {
    let profile = ProfileFile::from_config(&config.profile)?;
    if profile.path().exists() {
        return Ok(Arc::new(profile));
    }
    match config.simulation.setpoint_celsius {
        Some(sp) => {
            tracing::warn!("no profile at {}; holding {}C", profile.path().display(), sp);
            Ok(Arc::new(ConstantSetpoint(sp)))
        }
        // missing file resolves to NaN every tick, so the tank stays neutral
        None => Ok(Arc::new(profile)),
    }
}

async fn run(config_path: PathBuf, mode: Option<TankMode>, inhibit: bool) -> Result<(), BoxError> {
    tracing::info!("Starting tankctl {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", config_path.display());
    let config = config::load_config(&config_path).map_err(|e| {
        tracing::error!("Please ensure the configuration file exists and is properly formatted");
        Box::new(e) as BoxError
    })?;
    tracing::info!(
        "loop {}s, deadband {}C, alarms [{}, {}]C",
        config.thermostat.loop_period_second,
        config.thermostat.deadband_celsius,
        config.thermostat.low_alarm_celsius,
        config.thermostat.high_alarm_celsius
    );

    // stagger restarts after a power cut so tanks do not all open at once
    let delay = Duration::from_secs_f64(1.0 + 2.0 * rand::random::<f64>());
    tracing::info!("starting in {:.1}s", delay.as_secs_f64());
    tokio::time::sleep(delay).await;

    let store = Arc::new(MemoryStore::new());
    let valves = SimulatedValves::new();
    let bank = ValveBank::new(Arc::new(valves.clone()));
    let mut supervisor = ModeSupervisor::new(
        store.clone(),
        bank.clone(),
        Arc::new(ConfigFile::new(&config_path)),
        setpoint_source(&config)?,
        Arc::new(valves.clone()),
    );

    let bus = supervisor.context().bus;
    if let Some(mode) = mode {
        bus.set_tank_mode(mode).await?;
    }
    if inhibit {
        InhibitGate::new(store.clone()).pause(&config.warning).await?;
    }

    supervisor.start();
    supervisor.spawn_plant(TankPlant::new(config.simulation.clone()), valves.clone());

    let cleanup_store = store.clone();
    let janitor = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_store.cleanup().await;
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("Ctrl-C received");
        }
        _ = supervisor.wait_for_exit() => {}
    }

    supervisor.shutdown().await;
    janitor.abort();
    let stats = bank.get_command_stats().await;
    tracing::info!(
        "{} valve commands ({} failed, avg {:.3}ms); valves at exit: {:?}",
        stats.total_commands,
        stats.failed_commands,
        stats.average_response_time * 1000.0,
        valves.positions()
    );
    Ok(())
}

fn check(config_path: PathBuf, at: Option<DateTime<Utc>>) -> Result<(), BoxError> {
    let config = config::load_config(&config_path)?;
    println!("config {} ok", config_path.display());

    let source = setpoint_source(&config)?;
    let now = at.unwrap_or_else(Utc::now);
    let setpoint = source.lookup_setpoint(now)?;
    if setpoint.is_nan() {
        println!("no setpoint at {}", now.to_rfc3339());
    } else {
        println!("setpoint at {}: {:.2}C", now.to_rfc3339(), setpoint);
    }
    Ok(())
}
