//! Power relays for the router and the modem.
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Router,
    Modem,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Router => f.write_str("router"),
            Device::Modem => f.write_str("modem"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
}

/// Relay driver. Only the recovery engine switches power.
pub trait PowerDriver: Send + Sync {
    fn power_state(&self, device: Device) -> PowerState;
    fn set_power_state(&self, device: Device, state: PowerState);
}

/// Relay bank that keeps the switch positions in memory.
///
/// Devices start powered on, matching normally-closed relays.
#[derive(Debug)]
pub struct RelayBank {
    router: Mutex<PowerState>,
    modem: Mutex<PowerState>,
    switches: Mutex<Vec<(Device, PowerState)>>,
}

impl RelayBank {
    pub fn new() -> Self {
        Self {
            router: Mutex::new(PowerState::On),
            modem: Mutex::new(PowerState::On),
            switches: Mutex::new(Vec::new()),
        }
    }

    /// Every switch operation performed, in order.
    pub fn switches(&self) -> Vec<(Device, PowerState)> {
        self.switches.lock().clone()
    }

    fn slot(&self, device: Device) -> &Mutex<PowerState> {
        match device {
            Device::Router => &self.router,
            Device::Modem => &self.modem,
        }
    }
}

impl Default for RelayBank {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerDriver for RelayBank {
    fn power_state(&self, device: Device) -> PowerState {
        *self.slot(device).lock()
    }

    fn set_power_state(&self, device: Device, state: PowerState) {
        *self.slot(device).lock() = state;
        self.switches.lock().push((device, state));
        tracing::info!(%device, ?state, "relay switched");
    }
}
