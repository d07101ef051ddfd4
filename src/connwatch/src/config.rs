//! Durable application configuration.
//!
//! [`AppConfig`] holds the user tunables the recovery engine reads on every
//! decision. [`ConfigStore`] persists them in the config region of the shared
//! [`DurableStorage`] and broadcasts a single [`ConfigChanged`] per applied
//! batch.
//!
//! Region layout at offset [`CONFIG_REGION_START`]:
//! `[marker u8][len u16 LE][CBOR body]`, where a marker of `0xFF` means the
//! region was never written and defaults must be installed.
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::observers::{Observers, Subscription};
use crate::storage::{DurableStorage, StorageError};

pub const CONFIG_REGION_START: usize = 0;
pub const CONFIG_REGION_SIZE: usize = 512;
/// Upper bound for `max_history`, sized to the history region.
pub const MAX_HISTORY_LIMIT: u32 = 100;
pub const MAX_HOSTNAME_LEN: usize = 63;

const MARKER_INITIALIZED: u8 = 1;
const HEADER_LEN: usize = 3;
const SECS_PER_DAY: u32 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
    },
    #[error("{0} is longer than 63 bytes")]
    HostnameTooLong(&'static str),
    #[error("encoded configuration needs {0} bytes, region holds 512")]
    TooLarge(usize),
    #[error("config codec: {0}")]
    Codec(#[from] serde_cbor::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn default_modem_disconnect() -> u32 {
    5
}

fn default_modem_reconnect() -> u32 {
    210
}

fn default_router_disconnect() -> u32 {
    5
}

fn default_router_reconnect() -> u32 {
    180
}

fn default_true() -> bool {
    true
}

fn default_recovery_cycles() -> u32 {
    5
}

fn default_server1() -> String {
    "google.com".to_string()
}

fn default_server2() -> String {
    "yahoo.com".to_string()
}

fn default_test_period() -> u32 {
    300
}

fn default_max_history() -> u32 {
    10
}

fn default_periodic_restart_time() -> u32 {
    4 * 3600
}

/// User tunables persisted in the config region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_modem_disconnect")]
    pub modem_disconnect_secs: u32,
    #[serde(default = "default_modem_reconnect")]
    pub modem_reconnect_secs: u32,
    #[serde(default = "default_router_disconnect")]
    pub router_disconnect_secs: u32,
    #[serde(default = "default_router_reconnect")]
    pub router_reconnect_secs: u32,
    #[serde(default = "default_true")]
    pub limit_cycles: bool,
    #[serde(default = "default_recovery_cycles")]
    pub recovery_cycles: u32,
    #[serde(default = "default_server1")]
    pub server1: String,
    #[serde(default = "default_server2")]
    pub server2: String,
    /// LAN host probed first; `None` skips the LAN stage.
    #[serde(default)]
    pub lan_address: Option<Ipv4Addr>,
    #[serde(default = "default_test_period")]
    pub connection_test_period_secs: u32,
    #[serde(default = "default_true")]
    pub auto_recovery: bool,
    #[serde(default = "default_max_history")]
    pub max_history: u32,
    #[serde(default)]
    pub dst: bool,
    #[serde(default)]
    pub periodically_restart_router: bool,
    #[serde(default)]
    pub periodically_restart_modem: bool,
    /// Seconds after local midnight.
    #[serde(default = "default_periodic_restart_time")]
    pub periodic_restart_time: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            modem_disconnect_secs: default_modem_disconnect(),
            modem_reconnect_secs: default_modem_reconnect(),
            router_disconnect_secs: default_router_disconnect(),
            router_reconnect_secs: default_router_reconnect(),
            limit_cycles: true,
            recovery_cycles: default_recovery_cycles(),
            server1: default_server1(),
            server2: default_server2(),
            lan_address: None,
            connection_test_period_secs: default_test_period(),
            auto_recovery: true,
            max_history: default_max_history(),
            dst: false,
            periodically_restart_router: false,
            periodically_restart_modem: false,
            periodic_restart_time: default_periodic_restart_time(),
        }
    }
}

fn check_range(field: &'static str, value: u32, min: u32, max: u32) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            min: min as u64,
            max: max as u64,
        });
    }
    Ok(())
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("modem_disconnect_secs", self.modem_disconnect_secs, 1, 3600)?;
        check_range("modem_reconnect_secs", self.modem_reconnect_secs, 1, 3600)?;
        check_range("router_disconnect_secs", self.router_disconnect_secs, 1, 3600)?;
        check_range("router_reconnect_secs", self.router_reconnect_secs, 1, 3600)?;
        check_range("recovery_cycles", self.recovery_cycles, 1, 100)?;
        check_range(
            "connection_test_period_secs",
            self.connection_test_period_secs,
            10,
            SECS_PER_DAY,
        )?;
        check_range("max_history", self.max_history, 1, MAX_HISTORY_LIMIT)?;
        check_range(
            "periodic_restart_time",
            self.periodic_restart_time,
            0,
            SECS_PER_DAY - 1,
        )?;
        if self.server1.len() > MAX_HOSTNAME_LEN {
            return Err(ConfigError::HostnameTooLong("server1"));
        }
        if self.server2.len() > MAX_HOSTNAME_LEN {
            return Err(ConfigError::HostnameTooLong("server2"));
        }
        Ok(())
    }

    /// Whether any periodic restart is scheduled.
    pub fn periodic_restart_enabled(&self) -> bool {
        self.periodically_restart_router || self.periodically_restart_modem
    }

    /// Stable fingerprint of every field, hex encoded.
    pub fn config_id(&self) -> String {
        let mut hasher = Sha256::new();
        for value in [
            self.modem_disconnect_secs,
            self.modem_reconnect_secs,
            self.router_disconnect_secs,
            self.router_reconnect_secs,
            self.recovery_cycles,
            self.connection_test_period_secs,
            self.max_history,
            self.periodic_restart_time,
        ] {
            hasher.update(value.to_le_bytes());
        }
        hasher.update([
            self.limit_cycles as u8,
            self.auto_recovery as u8,
            self.dst as u8,
            self.periodically_restart_router as u8,
            self.periodically_restart_modem as u8,
        ]);
        match self.lan_address {
            Some(addr) => {
                hasher.update([1u8]);
                hasher.update(addr.octets());
            }
            None => hasher.update([0u8]),
        }
        for server in [&self.server1, &self.server2] {
            hasher.update((server.len() as u32).to_le_bytes());
            hasher.update(server.as_bytes());
        }
        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{:02x}", byte)).collect()
    }
}

/// Broadcast after a batch of changes has been persisted.
#[derive(Debug, Clone)]
pub struct ConfigChanged {
    pub previous: AppConfig,
    pub current: AppConfig,
}

/// Persistent owner of [`AppConfig`].
pub struct ConfigStore {
    storage: Arc<dyn DurableStorage>,
    current: RwLock<AppConfig>,
    writer: Mutex<()>,
    changed: Observers<ConfigChanged>,
}

impl ConfigStore {
    /// Loads the config region, installing defaults on first boot or when the
    /// stored body cannot be decoded.
    pub fn open(storage: Arc<dyn DurableStorage>) -> Result<Self, ConfigError> {
        let loaded = match read_region(storage.as_ref())? {
            Some(Ok(config)) => match config.validate() {
                Ok(()) => Some(config),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "stored configuration invalid, restoring defaults"
                    );
                    None
                }
            },
            Some(Err(err)) => {
                tracing::warn!(error = %err, "stored configuration unreadable, restoring defaults");
                None
            }
            None => {
                tracing::info!("config region uninitialized, installing defaults");
                None
            }
        };
        let config = match loaded {
            Some(config) => config,
            None => {
                let config = AppConfig::default();
                write_region(storage.as_ref(), &config)?;
                storage.commit()?;
                config
            }
        };
        tracing::debug!(config_id = %config.config_id(), "configuration loaded");
        Ok(Self {
            storage,
            current: RwLock::new(config),
            writer: Mutex::new(()),
            changed: Observers::new(),
        })
    }

    /// Copy of the current configuration.
    pub fn snapshot(&self) -> AppConfig {
        self.current.read().clone()
    }

    /// Applies `edit` to a copy of the configuration, validates, persists and
    /// notifies once. Returns `false` when nothing changed.
    pub fn update<F>(&self, edit: F) -> Result<bool, ConfigError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let _writer = self.writer.lock();
        let previous = self.snapshot();
        let mut next = previous.clone();
        edit(&mut next);
        if next.config_id() == previous.config_id() {
            return Ok(false);
        }
        next.validate()?;
        write_region(self.storage.as_ref(), &next)?;
        self.storage.commit()?;
        *self.current.write() = next.clone();
        tracing::info!(config_id = %next.config_id(), "configuration updated");
        self.changed.notify(&ConfigChanged {
            previous,
            current: next,
        });
        Ok(true)
    }

    /// Restores every tunable to its default value.
    pub fn reset(&self) -> Result<bool, ConfigError> {
        self.update(|config| *config = AppConfig::default())
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConfigChanged) + Send + Sync + 'static,
    {
        self.changed.subscribe(handler)
    }
}

fn read_region(
    storage: &dyn DurableStorage,
) -> Result<Option<Result<AppConfig, serde_cbor::Error>>, StorageError> {
    let mut header = [0u8; HEADER_LEN];
    storage.read(CONFIG_REGION_START, &mut header)?;
    if header[0] != MARKER_INITIALIZED {
        return Ok(None);
    }
    let len = u16::from_le_bytes([header[1], header[2]]) as usize;
    if len > CONFIG_REGION_SIZE - HEADER_LEN {
        return Ok(None);
    }
    let mut body = vec![0u8; len];
    storage.read(CONFIG_REGION_START + HEADER_LEN, &mut body)?;
    Ok(Some(serde_cbor::from_slice(&body)))
}

fn write_region(storage: &dyn DurableStorage, config: &AppConfig) -> Result<(), ConfigError> {
    let body = serde_cbor::to_vec(config)?;
    if body.len() > CONFIG_REGION_SIZE - HEADER_LEN {
        return Err(ConfigError::TooLarge(body.len() + HEADER_LEN));
    }
    let len = (body.len() as u16).to_le_bytes();
    let mut region = Vec::with_capacity(HEADER_LEN + body.len());
    region.push(MARKER_INITIALIZED);
    region.extend_from_slice(&len);
    region.extend_from_slice(&body);
    storage.write(CONFIG_REGION_START, &region)?;
    Ok(())
}
