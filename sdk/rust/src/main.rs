use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use connwatch::storage::DEFAULT_CAPACITY;
use connwatch::{
    ConnectivityProbe, DeviceConfig, FileStorage, RecoveryType, RelayBank, SystemClock,
};
use connwatch_sdk::probe::DEFAULT_PROBE_PORT;
use connwatch_sdk::{SimulatedProbe, TcpProbe, Watchdog};
use tracing::{info, warn};

/// Internet connectivity watchdog daemon
#[derive(Parser, Debug)]
#[command(name = "connwatchd", version, about, long_about = None)]
struct Args {
    /// Storage image holding configuration and recovery history
    #[arg(long, default_value = "connwatch.img")]
    storage: PathBuf,

    /// Device settings (toml)
    #[arg(long, default_value = "connwatch.toml")]
    device: PathBuf,

    /// TCP port used to probe hosts
    #[arg(long, default_value_t = DEFAULT_PROBE_PORT)]
    probe_port: u16,

    /// Replace network probes with random outages
    #[arg(long)]
    simulate: bool,

    /// Chance per probe that a simulated outage starts
    #[arg(long, default_value_t = 0.02)]
    outage_chance: f64,

    /// Seconds between status log lines
    #[arg(long, default_value_t = 60)]
    status_interval: u64,

    /// Restore the default configuration before starting
    #[arg(long)]
    reset_config: bool,

    /// Run one user-initiated connectivity check right after start
    #[arg(long)]
    check_now: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "connwatchd starting");

    let device = DeviceConfig::load(&args.device)
        .with_context(|| format!("failed to load {}", args.device.display()))?;
    let storage = FileStorage::open(&args.storage, DEFAULT_CAPACITY)
        .with_context(|| format!("failed to open {}", args.storage.display()))?;

    let probe: Box<dyn ConnectivityProbe> = if args.simulate {
        warn!(outage_chance = args.outage_chance, "simulated probes, network is not touched");
        Box::new(SimulatedProbe::new(args.outage_chance))
    } else {
        Box::new(TcpProbe::new(tokio::runtime::Handle::current(), args.probe_port))
    };

    let watchdog = Watchdog::start(
        Arc::new(storage),
        device,
        Arc::new(RelayBank::new()),
        probe,
        Arc::new(SystemClock),
    )
    .context("failed to start watchdog")?;

    if args.reset_config && watchdog.config().reset()? {
        info!("configuration reset to defaults");
    }
    if args.check_now {
        watchdog
            .control()
            .start_recovery_cycles(RecoveryType::ConnectivityCheck);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.status_interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(status = %watchdog.status_json(), "status");
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
        }
    }

    if let Ok(history) = watchdog.history_json() {
        info!(%history, "final history");
    }
    tokio::task::spawn_blocking(move || watchdog.shutdown())
        .await
        .context("shutdown task failed")?;
    Ok(())
}
