//! Daemon-side wiring of the connwatch core.
//!
//! [`Watchdog`] builds the collaborators in dependency order, attaches the
//! history tracker to the engine and runs the engine on its own thread.
use std::sync::Arc;

use connwatch::config::ConfigError;
use connwatch::{
    Clock, ConfigStore, ConnectivityProbe, Device, DeviceConfig, DurableStorage, EngineDeps,
    EngineHandle, HistoryControl, HistoryError, HistoryStorageItem, PowerDriver, PowerState,
    RecoveryControl, RecoveryEngine, RecoveryError, RecoveryType,
};
use serde::Serialize;

pub mod probe;
pub mod simulation;

pub use probe::TcpProbe;
pub use simulation::SimulatedProbe;

#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("history: {0}")]
    History(#[from] HistoryError),
    #[error("recovery: {0}")]
    Recovery(#[from] RecoveryError),
}

/// Snapshot of the watchdog for status pages and logs.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub device_name: String,
    /// Last broadcast recovery type.
    pub recovery_state: RecoveryType,
    pub auto_recovery: bool,
    pub last_recovery: Option<i64>,
    pub router: PowerState,
    pub modem: PowerState,
    pub max_history: u32,
    /// Records visible in the history, the in-flight one included.
    pub history_records: usize,
    pub history_updated: i64,
    pub config_id: String,
}

/// Running watchdog. Dropping it stops the engine thread.
pub struct Watchdog {
    // stopped before the history tracker it feeds
    engine: EngineHandle,
    history: HistoryControl,
    config: Arc<ConfigStore>,
    power: Arc<dyn PowerDriver>,
    device: DeviceConfig,
}

impl Watchdog {
    /// Loads configuration and history from `storage` and starts the engine
    /// thread.
    pub fn start(
        storage: Arc<dyn DurableStorage>,
        device: DeviceConfig,
        power: Arc<dyn PowerDriver>,
        probe: Box<dyn ConnectivityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WatchdogError> {
        let config = Arc::new(ConfigStore::open(storage.clone())?);
        let history = HistoryControl::new(storage, config.clone(), clock.clone())?;
        let engine = RecoveryEngine::new(
            EngineDeps {
                config: config.clone(),
                device: device.clone(),
                power: power.clone(),
                probe,
                clock,
            },
            history.last_recovery(),
        )?;
        history.attach(&engine.control());
        let engine = engine.spawn()?;
        tracing::info!(device = %device.device_name, "watchdog started");
        Ok(Self {
            engine,
            history,
            config,
            power,
            device,
        })
    }

    /// Handle for recovery requests and state queries.
    pub fn control(&self) -> RecoveryControl {
        self.engine.control()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn history(&self) -> &HistoryControl {
        &self.history
    }

    /// Current state of the engine, relays and history.
    pub fn status(&self) -> StatusReport {
        let control = self.control();
        let config = self.config.snapshot();
        StatusReport {
            device_name: self.device.device_name.clone(),
            recovery_state: control.recovery_state(),
            auto_recovery: control.auto_recovery(),
            last_recovery: control.last_recovery(),
            router: self.power.power_state(Device::Router),
            modem: self.power.power_state(Device::Modem),
            max_history: config.max_history,
            history_records: self.history.available(),
            history_updated: self.history.last_update(),
            config_id: config.config_id(),
        }
    }

    pub fn status_json(&self) -> serde_json::Value {
        serde_json::to_value(self.status()).unwrap_or(serde_json::Value::Null)
    }

    /// History records, oldest first, the in-flight one last.
    pub fn history_items(&self) -> Result<Vec<HistoryStorageItem>, WatchdogError> {
        Ok(self.history.items()?)
    }

    pub fn history_json(&self) -> Result<serde_json::Value, WatchdogError> {
        let items = self.history_items()?;
        Ok(serde_json::json!({
            "last_update": self.history.last_update(),
            "max_history": self.history.max_history(),
            "items": items,
        }))
    }

    /// Stops the engine, switching back on any device it left off.
    pub fn shutdown(mut self) {
        self.engine.shutdown();
        tracing::info!("watchdog stopped");
    }
}
