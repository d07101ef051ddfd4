//! Recovery control: the state machine that power-cycles the router and
//! modem, plus the thread-safe handle other components use to observe and
//! nudge it.
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::config::AppConfig;
use crate::history::RecoveryEvents;
use crate::observers::Observers;
use crate::relays::{Device, PowerState};
use crate::statemachine::TableError;

mod check;
mod engine;

pub use engine::{EngineDeps, EngineHandle, RecoveryEngine, RecoveryState};

/// Publicly observable recovery phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryType {
    /// Connected, nothing in progress.
    NoRecovery,
    /// Router power cycle.
    Router,
    /// Power cycle of the relay feeding a combined router and modem.
    RouterSingleDevice,
    /// Modem power cycle.
    Modem,
    /// User-requested check in progress.
    ConnectivityCheck,
    /// Recovery cycles exhausted without connectivity.
    Failed,
    /// A power-cycled device did not come back.
    HWFailure,
    /// Offline with auto recovery disabled.
    Disconnected,
    /// Scheduled restart.
    Periodic,
}

impl RecoveryType {
    const ALL: [RecoveryType; 9] = [
        RecoveryType::NoRecovery,
        RecoveryType::Router,
        RecoveryType::RouterSingleDevice,
        RecoveryType::Modem,
        RecoveryType::ConnectivityCheck,
        RecoveryType::Failed,
        RecoveryType::HWFailure,
        RecoveryType::Disconnected,
        RecoveryType::Periodic,
    ];

    fn as_u8(self) -> u8 {
        self as u8
    }

    fn from_u8(raw: u8) -> RecoveryType {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(RecoveryType::NoRecovery)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryType::NoRecovery => "no_recovery",
            RecoveryType::Router => "router",
            RecoveryType::RouterSingleDevice => "router_single_device",
            RecoveryType::Modem => "modem",
            RecoveryType::ConnectivityCheck => "connectivity_check",
            RecoveryType::Failed => "failed",
            RecoveryType::HWFailure => "hw_failure",
            RecoveryType::Disconnected => "disconnected",
            RecoveryType::Periodic => "periodic",
        }
    }
}

impl fmt::Display for RecoveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who started the current recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySource {
    UserInitiated,
    Auto,
    Periodic,
}

/// Devices power-cycled by a recovery step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycledDevices {
    pub router: bool,
    pub modem: bool,
}

impl CycledDevices {
    pub const NONE: CycledDevices = CycledDevices {
        router: false,
        modem: false,
    };
    pub const ROUTER: CycledDevices = CycledDevices {
        router: true,
        modem: false,
    };
    pub const MODEM: CycledDevices = CycledDevices {
        router: false,
        modem: true,
    };

    /// Devices a periodic restart cycles. A single-device installation only
    /// has the router relay; with no device flagged the router is restarted.
    pub fn periodic(config: &AppConfig, single_device: bool) -> Self {
        let modem = config.periodically_restart_modem && !single_device;
        let router = config.periodically_restart_router || single_device || !modem;
        Self { router, modem }
    }

    /// Devices implied by a recovery type alone.
    fn implied_by(recovery_type: RecoveryType) -> Self {
        match recovery_type {
            RecoveryType::Router | RecoveryType::RouterSingleDevice => Self::ROUTER,
            RecoveryType::Modem => Self::MODEM,
            _ => Self::NONE,
        }
    }

    pub fn devices(self) -> Vec<Device> {
        let mut devices = Vec::with_capacity(2);
        if self.router {
            devices.push(Device::Router);
        }
        if self.modem {
            devices.push(Device::Modem);
        }
        devices
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStateChanged {
    pub recovery_type: RecoveryType,
    pub source: RecoverySource,
    /// Devices this step power-cycles; empty for non-recovery states.
    pub cycled: CycledDevices,
}

impl RecoveryStateChanged {
    /// Event for `recovery_type`, cycling the devices the type implies.
    pub fn new(recovery_type: RecoveryType, source: RecoverySource) -> Self {
        Self {
            recovery_type,
            source,
            cycled: CycledDevices::implied_by(recovery_type),
        }
    }

    pub fn with_cycled(mut self, cycled: CycledDevices) -> Self {
        self.cycled = cycled;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStateChanged {
    pub device: Device,
    pub state: PowerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRecoveryChanged {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxHistoryChanged {
    pub max_records: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("invalid recovery transition table: {0}")]
    Table(#[from] TableError),
    #[error("failed to spawn recovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Verbs driving the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Message {
    Connected,
    Disconnected,
    Done,
    DisconnectRouter,
    DisconnectModem,
    PeriodicRestart,
    CheckConnectivity,
    Timeout,
    NoTimeout,
    Exceeded,
    NotExceeded,
    HWError,
}

#[derive(Debug, Default)]
struct MailboxState {
    request: Option<Message>,
    woken: bool,
}

/// Single-slot request box plus the condition the engine idles on.
#[derive(Debug, Default)]
pub struct Mailbox {
    state: Mutex<MailboxState>,
    signal: Condvar,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `request` unless one is already pending.
    pub(crate) fn request(&self, request: Message) -> bool {
        let mut state = self.state.lock();
        if state.request.is_some() {
            return false;
        }
        state.request = Some(request);
        state.woken = true;
        self.signal.notify_all();
        true
    }

    pub(crate) fn take(&self) -> Option<Message> {
        self.state.lock().request.take()
    }

    pub fn has_request(&self) -> bool {
        self.state.lock().request.is_some()
    }

    /// Interrupts the current or next wait.
    pub fn wake(&self) {
        self.state.lock().woken = true;
        self.signal.notify_all();
    }

    /// Clears the wake flag, reporting whether work was signalled.
    pub fn consume_wake(&self) -> bool {
        let mut state = self.state.lock();
        let signalled = state.woken || state.request.is_some();
        state.woken = false;
        signalled
    }

    /// Blocks until woken or until `timeout` passes.
    pub fn wait_for(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if !state.woken && state.request.is_none() {
            self.signal.wait_for(&mut state, timeout);
        }
        state.woken = false;
    }
}

const NO_RECOVERY: i64 = i64::MIN;

pub(crate) struct Shared {
    state: AtomicU8,
    last_recovery: AtomicI64,
    auto_recovery: AtomicBool,
    max_history: AtomicU32,
    reschedule: AtomicBool,
    shutdown: AtomicBool,
    mailbox: Mailbox,
    recovery_state_changed: Observers<RecoveryStateChanged>,
    modem_power_changed: Observers<PowerStateChanged>,
    router_power_changed: Observers<PowerStateChanged>,
    auto_recovery_changed: Observers<AutoRecoveryChanged>,
    max_history_changed: Observers<MaxHistoryChanged>,
}

impl Shared {
    pub(crate) fn new(auto_recovery: bool, max_history: u32, last_recovery: Option<i64>) -> Self {
        Self {
            state: AtomicU8::new(RecoveryType::NoRecovery.as_u8()),
            last_recovery: AtomicI64::new(last_recovery.unwrap_or(NO_RECOVERY)),
            auto_recovery: AtomicBool::new(auto_recovery),
            max_history: AtomicU32::new(max_history),
            reschedule: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            mailbox: Mailbox::new(),
            recovery_state_changed: Observers::new(),
            modem_power_changed: Observers::new(),
            router_power_changed: Observers::new(),
            auto_recovery_changed: Observers::new(),
            max_history_changed: Observers::new(),
        }
    }

    pub(crate) fn set_last_recovery(&self, value: Option<i64>) {
        self.last_recovery
            .store(value.unwrap_or(NO_RECOVERY), Ordering::SeqCst);
    }

    pub(crate) fn raise(&self, event: RecoveryStateChanged) {
        self.state.store(event.recovery_type.as_u8(), Ordering::SeqCst);
        tracing::info!(
            state = %event.recovery_type,
            source = ?event.source,
            router = event.cycled.router,
            modem = event.cycled.modem,
            "recovery state changed"
        );
        self.recovery_state_changed.notify(&event);
    }

    pub(crate) fn power_changed(&self, device: Device, state: PowerState) {
        let event = PowerStateChanged { device, state };
        match device {
            Device::Router => self.router_power_changed.notify(&event),
            Device::Modem => self.modem_power_changed.notify(&event),
        }
    }
}

/// Cloneable handle onto a running [`RecoveryEngine`].
#[derive(Clone)]
pub struct RecoveryControl {
    shared: Arc<Shared>,
}

impl RecoveryControl {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Requests a recovery action. Ignored while another request is pending
    /// and for types that cannot be requested.
    pub fn start_recovery_cycles(&self, recovery_type: RecoveryType) {
        let request = match recovery_type {
            RecoveryType::Modem => Message::DisconnectModem,
            RecoveryType::Router | RecoveryType::RouterSingleDevice => Message::DisconnectRouter,
            RecoveryType::ConnectivityCheck => Message::CheckConnectivity,
            other => {
                tracing::warn!(requested = %other, "recovery type cannot be requested");
                return;
            }
        };
        if !self.shared.mailbox.request(request) {
            tracing::debug!(requested = %recovery_type, "recovery request already pending");
        }
    }

    /// Last broadcast recovery type.
    pub fn recovery_state(&self) -> RecoveryType {
        RecoveryType::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Time of the last successful recovery, `None` while none is known or
    /// a recovery is in progress.
    pub fn last_recovery(&self) -> Option<i64> {
        match self.shared.last_recovery.load(Ordering::SeqCst) {
            NO_RECOVERY => None,
            at => Some(at),
        }
    }

    /// Whether failed checks trigger power cycles without a user request.
    pub fn auto_recovery(&self) -> bool {
        self.shared.auto_recovery.load(Ordering::SeqCst)
    }

    /// History capacity the engine last announced.
    pub fn max_history(&self) -> u32 {
        self.shared.max_history.load(Ordering::SeqCst)
    }

    /// A request is waiting for the engine to pick it up.
    pub fn has_pending_request(&self) -> bool {
        self.shared.mailbox.has_request()
    }

    /// Fired on every recovery state broadcast, on the engine thread.
    pub fn recovery_state_changed(&self) -> &Observers<RecoveryStateChanged> {
        &self.shared.recovery_state_changed
    }

    pub fn modem_power_changed(&self) -> &Observers<PowerStateChanged> {
        &self.shared.modem_power_changed
    }

    pub fn router_power_changed(&self) -> &Observers<PowerStateChanged> {
        &self.shared.router_power_changed
    }

    pub fn auto_recovery_changed(&self) -> &Observers<AutoRecoveryChanged> {
        &self.shared.auto_recovery_changed
    }

    pub fn max_history_changed(&self) -> &Observers<MaxHistoryChanged> {
        &self.shared.max_history_changed
    }

    /// Applies an auto-recovery or max-history change coming from the
    /// configuration and reschedules the engine's idle wait.
    pub(crate) fn apply_config(&self, auto_recovery: bool, max_history: u32) {
        let was_auto = self.shared.auto_recovery.swap(auto_recovery, Ordering::SeqCst);
        if auto_recovery && !was_auto {
            self.start_recovery_cycles(RecoveryType::ConnectivityCheck);
        }
        if auto_recovery != was_auto {
            self.shared
                .auto_recovery_changed
                .notify(&AutoRecoveryChanged {
                    enabled: auto_recovery,
                });
        }
        let previous = self.shared.max_history.swap(max_history, Ordering::SeqCst);
        if previous != max_history {
            self.shared.max_history_changed.notify(&MaxHistoryChanged {
                max_records: max_history,
            });
        }
        self.shared.reschedule.store(true, Ordering::SeqCst);
        self.shared.mailbox.wake();
    }
}

impl RecoveryEvents for RecoveryControl {
    fn recovery_state_changed(&self) -> &Observers<RecoveryStateChanged> {
        &self.shared.recovery_state_changed
    }

    fn max_history_changed(&self) -> &Observers<MaxHistoryChanged> {
        &self.shared.max_history_changed
    }
}
