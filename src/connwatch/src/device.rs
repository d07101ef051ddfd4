//! Static per-device settings loaded from a toml file.
//!
//! These values describe the installation (wiring, gateway, time zone) and do
//! not change at runtime, unlike [`crate::config::AppConfig`].
use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum DeviceConfigError {
    #[error("device config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("device config parse: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("time zone offset {0}s is outside +/-14h")]
    TimeZone(i32),
}

fn default_device_name() -> String {
    "connwatch".to_string()
}

fn default_skip_router_secs() -> u32 {
    3600
}

fn default_router_init_secs() -> u32 {
    60
}

fn default_hw_confirm_secs() -> u32 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Router and modem share one power relay.
    #[serde(default)]
    pub single_device: bool,
    /// After a successful recovery, failures within this window alternate
    /// to the other device instead of starting with the router.
    #[serde(default = "default_skip_router_secs")]
    pub skip_router_secs: u32,
    /// Standard-time offset from UTC, DST is added from the app config.
    #[serde(default)]
    pub time_zone_offset_secs: i32,
    /// Address answering once the router is back; `None` disables hardware
    /// confirmation.
    #[serde(default)]
    pub gateway: Option<IpAddr>,
    #[serde(default = "default_router_init_secs")]
    pub router_init_secs: u32,
    #[serde(default = "default_hw_confirm_secs")]
    pub hw_confirm_secs: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            single_device: false,
            skip_router_secs: default_skip_router_secs(),
            time_zone_offset_secs: 0,
            gateway: None,
            router_init_secs: default_router_init_secs(),
            hw_confirm_secs: default_hw_confirm_secs(),
        }
    }
}

impl DeviceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, DeviceConfigError> {
        let config: DeviceConfig = toml::from_str(raw)?;
        if config.time_zone_offset_secs.abs() > 14 * 3600 {
            return Err(DeviceConfigError::TimeZone(config.time_zone_offset_secs));
        }
        Ok(config)
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeviceConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "device config missing, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = DeviceConfig::from_toml_str("").unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert_eq!(config.skip_router_secs, 3600);
    }

    #[test]
    fn parses_overrides() {
        let config = DeviceConfig::from_toml_str(
            r#"
device_name = "cellar"
single_device = true
gateway = "192.168.0.1"
time_zone_offset_secs = 3600
"#,
        )
        .unwrap();
        assert!(config.single_device);
        assert_eq!(config.gateway, Some("192.168.0.1".parse().unwrap()));
        assert_eq!(config.hw_confirm_secs, 60);
    }

    #[test]
    fn rejects_absurd_time_zone() {
        let err = DeviceConfig::from_toml_str("time_zone_offset_secs = 90000").unwrap_err();
        assert!(matches!(err, DeviceConfigError::TimeZone(90000)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeviceConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, DeviceConfig::default());
    }
}
