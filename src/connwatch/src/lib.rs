//! Internet connectivity watchdog.
//!
//! Periodically checks reachability of a LAN host and two internet servers
//! and, when connectivity is lost, power-cycles the router and the modem
//! through relays until it comes back. Every recovery is recorded in a
//! fixed-size ring kept in durable storage alongside the configuration.

pub mod clock;
pub mod config;
pub mod device;
pub mod history;
pub mod observers;
pub mod probe;
pub mod recovery;
pub mod relays;
pub mod schedule;
pub mod statemachine;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigChanged, ConfigError, ConfigStore};
pub use device::{DeviceConfig, DeviceConfigError};
pub use history::{HistoryControl, HistoryError, HistoryStorage, HistoryStorageItem, RecoveryStatus};
pub use observers::{Observers, Subscription};
pub use probe::{ConnectivityProbe, ProbeHandle, ProbeStatus, ProbeTarget, ScriptedProbe};
pub use recovery::{
    CycledDevices, EngineDeps, EngineHandle, RecoveryControl, RecoveryEngine, RecoveryError,
    RecoverySource, RecoveryState, RecoveryType,
};
pub use relays::{Device, PowerDriver, PowerState, RelayBank};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, StorageError};
