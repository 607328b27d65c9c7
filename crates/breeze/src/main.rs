//! Breeze
//!
//! Ventilation controller: reads humidity, CO2 and occupancy from Home
//! Assistant and drives the fan and zone valves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use breeze::controller::{Controller, CycleOutcome};
use breeze::homeassistant::HomeAssistant;
use breeze::settings::{DEFAULT_CONFIG_PATH, MemorySettings, Settings};
use breeze::{curves, schedule};

/// Demand-controlled ventilation for Home Assistant
#[derive(Parser, Debug)]
#[command(name = "breeze")]
#[command(about = "Demand-controlled ventilation for Home Assistant", long_about = None)]
struct Args {
    /// Path to the settings file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run control cycles (one cycle unless --interval is given)
    Run {
        /// Seconds between cycles
        #[arg(short, long)]
        interval: Option<u64>,

        /// Log intended changes without commanding anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the settings file and print the effective configuration
    Check,

    /// Print each room's humidity demand curve
    Curves {
        /// Humidity step between rows (%)
        #[arg(long, default_value_t = curves::DEFAULT_STEP)]
        step: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start tokio runtime")?
        .block_on(async_main(args))
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("breeze=info,breeze_core=info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

async fn async_main(args: Args) -> Result<()> {
    let settings = Settings::load(&args.config)?;

    match args.command.unwrap_or(Command::Run {
        interval: None,
        dry_run: false,
    }) {
        Command::Run { interval, dry_run } => run(settings, interval, dry_run).await,
        Command::Check => check(&settings),
        Command::Curves { step } => {
            let config = settings.control_config()?;
            print!("{}", curves::render(&config, step));
            Ok(())
        }
    }
}

async fn run(mut settings: Settings, interval: Option<u64>, dry_run: bool) -> Result<()> {
    info!("Starting Breeze v{}", env!("CARGO_PKG_VERSION"));

    if dry_run {
        settings.apply.dry_run = true;
    }
    if interval.is_none() && settings.memory == MemorySettings::Memory {
        warn!("Memory backend with a single cycle: hysteresis state will not carry over");
    }

    let platform = Arc::new(HomeAssistant::from_settings(&settings.homeassistant)?);
    info!("Connected to Home Assistant at {}", platform.base_url());
    let controller = Arc::new(Controller::from_settings(&settings, platform)?);

    let Some(secs) = interval else {
        return run_cycle(controller).await;
    };

    info!("Running a cycle every {}s, Ctrl-C to stop", secs);
    let cycles = schedule::run_every(Duration::from_secs(secs.max(1)), shutdown_signal(), || {
        let controller = controller.clone();
        async move {
            if let Err(e) = run_cycle(controller).await {
                error!("Cycle failed: {:#}", e);
            }
        }
    })
    .await;

    info!("Stopped after {} cycles", cycles);
    Ok(())
}

/// Run one cycle on the blocking pool
async fn run_cycle(controller: Arc<Controller<HomeAssistant>>) -> Result<()> {
    let outcome = tokio::task::spawn_blocking(move || controller.run_cycle())
        .await
        .context("Cycle task panicked")??;

    match outcome {
        CycleOutcome::ManualOverride { .. } => info!("Cycle skipped: manual override"),
        CycleOutcome::Applied(report) => {
            if !report.applied.is_clean() {
                warn!("{} actuator commands failed", report.applied.failures.len());
            }
        }
    }
    Ok(())
}

fn check(settings: &Settings) -> Result<()> {
    let config = settings.control_config()?;
    println!("{}", toml::to_string_pretty(&settings.redacted())?);
    println!("Mode: {:?}, {} rooms", config.mode(), config.rooms().len());
    for (room_id, room) in config.rooms() {
        println!("  {} -> {}", room.label(room_id), room.valve_entity);
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
