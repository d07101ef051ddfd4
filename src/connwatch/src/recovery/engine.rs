//! The recovery state machine.
//!
//! [`RecoveryEngine`] owns the session and runs on a dedicated thread:
//! [`RecoveryEngine::start`] once, then [`RecoveryEngine::perform_cycle`] until
//! shutdown. Every state is a set of plain functions over [`Session`]; the
//! `(state, verb)` table below is validated when the engine is built.
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::ConfigStore;
use crate::device::DeviceConfig;
use crate::observers::Subscription;
use crate::probe::ConnectivityProbe;
use crate::recovery::check::{CheckStep, ConnectivityCheck, GatewayConfirm};
use crate::recovery::{
    CycledDevices, Message, RecoveryControl, RecoveryError, RecoverySource,
    RecoveryStateChanged, RecoveryType, Shared,
};
use crate::relays::{Device, PowerDriver, PowerState};
use crate::schedule::next_periodic_restart;
use crate::statemachine::{Behavior, ExitFn, StateMachine, TableBuilder};

/// Pause between a power cycle and the first connectivity check.
pub const RECOVERY_SETTLE_SECS: i64 = 5;
/// Back-off before re-checking after the hardware did not come back.
pub const HW_ERROR_BACKOFF_SECS: i64 = 10;
const POLL_TICK: Duration = Duration::from_millis(250);

/// States of the recovery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryState {
    /// Waiting for the router to come up after boot.
    Init,
    /// Checking connectivity while idle; decides the first recovery step.
    CheckConnectivity,
    /// Announces a user-requested check before running it.
    StartCheckConnectivity,
    /// Connected, idling until the next test period or request.
    WaitWhileConnected,
    /// Router powered off, then back on and confirmed.
    DisconnectRouter,
    /// Settle time after a router power cycle.
    WaitAfterRouterRecovery,
    CheckConnectivityAfterRouterRecovery,
    /// Keeps checking until the router reconnect window runs out.
    CheckRouterRecoveryTimeout,
    /// Modem powered off, then back on and confirmed.
    DisconnectModem,
    /// Settle time after a modem power cycle.
    WaitAfterModemRecovery,
    CheckConnectivityAfterModemRecovery,
    /// Keeps checking until the modem reconnect window runs out.
    CheckModemRecoveryTimeout,
    /// Counts a full router and modem attempt against the cycle limit.
    CheckMaxCyclesExceeded,
    CheckConnectivityAfterRecoveryFailure,
    /// Recovery gave up, idling until the next test period or request.
    WaitWhileRecoveryFailure,
    /// Scheduled power cycle of the configured devices.
    PeriodicRestart,
    /// Settle time after a periodic restart.
    WaitAfterPeriodicRestart,
    CheckConnectivityAfterPeriodicRestart,
    /// Keeps checking until the periodic reconnect window runs out.
    CheckPeriodicRestartTimeout,
    /// The gateway never answered after a power cycle; backs off, then
    /// checks again.
    HWError,
}

/// Collaborators injected into the engine.
pub struct EngineDeps {
    pub config: Arc<ConfigStore>,
    pub device: DeviceConfig,
    pub power: Arc<dyn PowerDriver>,
    pub probe: Box<dyn ConnectivityProbe>,
    pub clock: Arc<dyn Clock>,
}

enum CyclePhase {
    PoweredOff { until: i64 },
    Confirming(GatewayConfirm),
}

/// Power cycle in progress for one or both devices.
struct PowerCycle {
    devices: Vec<Device>,
    phase: CyclePhase,
}

/// Engine-thread state shared by all actions.
pub(crate) struct Session {
    shared: Arc<Shared>,
    config: Arc<ConfigStore>,
    device: DeviceConfig,
    power: Arc<dyn PowerDriver>,
    probe: Box<dyn ConnectivityProbe>,
    clock: Arc<dyn Clock>,
    source: RecoverySource,
    last_recovery: Option<i64>,
    last_recovery_type: RecoveryType,
    cycles: u32,
    lan_connected: bool,
    check: Option<ConnectivityCheck>,
    gateway: Option<GatewayConfirm>,
    power_cycle: Option<PowerCycle>,
    wait_start: i64,
    recovery_start: i64,
    reconnect_secs: i64,
    periodic_includes_modem: bool,
    next_periodic: Option<i64>,
}

impl Session {
    fn now(&self) -> i64 {
        self.clock.now()
    }

    fn state(&self) -> RecoveryType {
        RecoveryType::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    fn raise(&mut self, recovery_type: RecoveryType) {
        self.shared
            .raise(RecoveryStateChanged::new(recovery_type, self.source));
    }

    /// Failures are reported as automatic whoever started the cycle.
    fn raise_failure(&mut self, recovery_type: RecoveryType) {
        self.shared
            .raise(RecoveryStateChanged::new(recovery_type, RecoverySource::Auto));
    }

    fn set_last_recovery(&mut self, value: Option<i64>) {
        self.last_recovery = value;
        self.shared.set_last_recovery(value);
    }

    fn reschedule(&mut self) {
        let config = self.config.snapshot();
        self.next_periodic =
            next_periodic_restart(self.now(), &config, self.device.time_zone_offset_secs);
        if let Some(at) = self.next_periodic {
            tracing::info!(at, "periodic restart scheduled");
        }
    }

    fn switch(&mut self, device: Device, state: PowerState) {
        self.power.set_power_state(device, state);
        self.shared.power_changed(device, state);
    }

    fn start_power_cycle(&mut self, devices: Vec<Device>, off_secs: u32) {
        for device in &devices {
            self.switch(*device, PowerState::Off);
        }
        self.power_cycle = Some(PowerCycle {
            devices,
            phase: CyclePhase::PoweredOff {
                until: self.recovery_start + off_secs as i64,
            },
        });
    }

    /// Switches back on whatever a power cycle left off and drops its
    /// pending gateway probe.
    fn restore_power(&mut self) {
        let Some(cycle) = self.power_cycle.take() else {
            return;
        };
        match cycle.phase {
            CyclePhase::PoweredOff { .. } => {
                for device in cycle.devices {
                    self.switch(device, PowerState::On);
                }
            }
            CyclePhase::Confirming(mut confirm) => confirm.abandon(self.probe.as_mut()),
        }
    }

    fn sleep_secs(&self, secs: i64) {
        if secs > 0 {
            self.clock.sleep(Duration::from_secs(secs as u64));
        }
    }
}

// ---- actions ------------------------------------------------------------

fn on_init(s: &mut Session) -> Option<Message> {
    let Some(gateway) = s.device.gateway else {
        return Some(Message::Connected);
    };
    let now = s.now();
    let init_secs = s.device.router_init_secs;
    let confirm = s
        .gateway
        .get_or_insert_with(|| GatewayConfirm::new(gateway, now, init_secs));
    match confirm.poll(s.probe.as_mut(), now) {
        Some(reached) => {
            s.gateway = None;
            tracing::info!(%gateway, reached, "router initialization finished");
            Some(if reached {
                Message::Connected
            } else {
                Message::Disconnected
            })
        }
        None => {
            s.clock.sleep(POLL_TICK);
            None
        }
    }
}

fn enter_check(s: &mut Session) {
    let config = s.config.snapshot();
    let now = s.now();
    let check = s.check.get_or_insert_with(ConnectivityCheck::new);
    if let Some(lan) = check.begin(&config, s.probe.as_mut(), now) {
        s.lan_connected = lan;
    }
}

fn on_check(s: &mut Session) -> Option<Message> {
    let now = s.now();
    let Some(check) = s.check.as_mut() else {
        return Some(Message::Disconnected);
    };
    match check.poll(s.probe.as_mut(), now, &mut s.lan_connected) {
        CheckStep::Pending => {
            s.clock.sleep(POLL_TICK);
            None
        }
        CheckStep::NextStage => Some(Message::Done),
        CheckStep::Finished(verdict) => {
            s.check = None;
            Some(verdict)
        }
    }
}

fn decide_recovery_path(verb: Message, s: &mut Session) -> Message {
    match verb {
        Message::Connected => {
            if s.state() != RecoveryType::NoRecovery {
                s.raise(RecoveryType::NoRecovery);
            }
            verb
        }
        Message::Disconnected => {
            if !s.shared.auto_recovery.load(Ordering::SeqCst)
                && s.source != RecoverySource::UserInitiated
            {
                s.raise(RecoveryType::Disconnected);
                return verb;
            }
            let now = s.now();
            let stale = match s.last_recovery {
                None => true,
                Some(at) => now - at > s.device.skip_router_secs as i64,
            };
            let next = if s.device.single_device || !s.lan_connected || stale {
                Message::DisconnectRouter
            } else if s.last_recovery_type == RecoveryType::Router {
                Message::DisconnectModem
            } else {
                Message::DisconnectRouter
            };
            tracing::info!(
                lan_connected = s.lan_connected,
                last_recovery = ?s.last_recovery,
                next = ?next,
                "connectivity lost"
            );
            next
        }
        other => other,
    }
}

fn update_recovery_state(verb: Message, s: &mut Session) -> Message {
    match verb {
        Message::Connected => {
            if s.last_recovery.is_none() {
                let now = s.now();
                s.set_last_recovery(Some(now));
            }
            s.cycles = 0;
            s.raise(RecoveryType::NoRecovery);
        }
        Message::Disconnected => s.set_last_recovery(None),
        _ => {}
    }
    verb
}

fn after_failure_check(verb: Message, s: &mut Session) -> Message {
    if verb == Message::Connected && s.state() != RecoveryType::NoRecovery {
        s.raise(RecoveryType::NoRecovery);
    }
    verb
}

fn enter_wait_period(s: &mut Session) {
    s.wait_start = s.now();
    s.source = RecoverySource::Auto;
}

fn on_wait_period(s: &mut Session) -> Option<Message> {
    if s.shared.shutdown.load(Ordering::SeqCst) {
        return None;
    }
    if let Some(request) = s.shared.mailbox.take() {
        s.source = RecoverySource::UserInitiated;
        let request = if request == Message::DisconnectModem && s.device.single_device {
            Message::DisconnectRouter
        } else {
            request
        };
        tracing::info!(?request, "recovery requested");
        return Some(request);
    }
    if s.shared.reschedule.swap(false, Ordering::SeqCst) {
        s.reschedule();
    }
    let now = s.now();
    if let Some(at) = s.next_periodic {
        if now >= at {
            s.source = RecoverySource::Periodic;
            return Some(Message::PeriodicRestart);
        }
    }
    let period = s.config.snapshot().connection_test_period_secs as i64;
    let elapsed = now - s.wait_start;
    if elapsed >= period {
        return Some(Message::Done);
    }
    let mut remaining = period - elapsed;
    if let Some(at) = s.next_periodic {
        remaining = remaining.min(at - now);
    }
    s.clock
        .park(&s.shared.mailbox, Duration::from_secs(remaining.max(1) as u64));
    None
}

fn on_start_check(s: &mut Session) -> Option<Message> {
    s.raise(RecoveryType::ConnectivityCheck);
    Some(Message::Done)
}

fn enter_disconnect_router(s: &mut Session) {
    s.last_recovery_type = RecoveryType::Router;
    s.set_last_recovery(None);
    s.raise(if s.device.single_device {
        RecoveryType::RouterSingleDevice
    } else {
        RecoveryType::Router
    });
    s.recovery_start = s.now();
    let config = s.config.snapshot();
    s.reconnect_secs = config.router_reconnect_secs as i64;
    s.start_power_cycle(vec![Device::Router], config.router_disconnect_secs);
}

fn enter_disconnect_modem(s: &mut Session) {
    s.last_recovery_type = RecoveryType::Modem;
    s.set_last_recovery(None);
    s.raise(RecoveryType::Modem);
    s.recovery_start = s.now();
    let config = s.config.snapshot();
    s.reconnect_secs = config.modem_reconnect_secs as i64;
    s.start_power_cycle(vec![Device::Modem], config.modem_disconnect_secs);
}

fn enter_periodic_restart(s: &mut Session) {
    let config = s.config.snapshot();
    let cycled = CycledDevices::periodic(&config, s.device.single_device);
    let mut off_secs = 0;
    let mut reconnect_secs = 0;
    if cycled.router {
        off_secs = off_secs.max(config.router_disconnect_secs);
        reconnect_secs = reconnect_secs.max(config.router_reconnect_secs);
    }
    if cycled.modem {
        off_secs = off_secs.max(config.modem_disconnect_secs);
        reconnect_secs = reconnect_secs.max(config.modem_reconnect_secs);
    }
    s.periodic_includes_modem = cycled.modem;
    s.last_recovery_type = if cycled.modem {
        RecoveryType::Modem
    } else {
        RecoveryType::Router
    };
    s.set_last_recovery(None);
    s.source = RecoverySource::Periodic;
    s.shared.raise(
        RecoveryStateChanged::new(RecoveryType::Periodic, s.source).with_cycled(cycled),
    );
    s.recovery_start = s.now();
    s.reconnect_secs = reconnect_secs as i64;
    s.start_power_cycle(cycled.devices(), off_secs);
    s.reschedule();
}

fn on_power_cycle(s: &mut Session) -> Option<Message> {
    let now = s.now();
    let Some(cycle) = s.power_cycle.as_mut() else {
        return Some(Message::Done);
    };
    match &mut cycle.phase {
        CyclePhase::PoweredOff { until } => {
            if now < *until {
                let remaining = (*until - now).min(1);
                s.sleep_secs(remaining);
                return None;
            }
            let devices = cycle.devices.clone();
            for device in devices {
                s.switch(device, PowerState::On);
            }
            match s.device.gateway {
                Some(gateway) => {
                    let confirm = GatewayConfirm::new(gateway, now, s.device.hw_confirm_secs);
                    if let Some(cycle) = s.power_cycle.as_mut() {
                        cycle.phase = CyclePhase::Confirming(confirm);
                    }
                    None
                }
                None => {
                    s.power_cycle = None;
                    Some(Message::Done)
                }
            }
        }
        CyclePhase::Confirming(confirm) => match confirm.poll(s.probe.as_mut(), now) {
            Some(true) => {
                s.power_cycle = None;
                Some(Message::Done)
            }
            Some(false) => {
                tracing::warn!("gateway did not answer after power cycle");
                s.power_cycle = None;
                Some(Message::HWError)
            }
            None => {
                s.clock.sleep(POLL_TICK);
                None
            }
        },
    }
}

fn enter_settle(s: &mut Session) {
    s.wait_start = s.now();
}

fn on_settle(s: &mut Session) -> Option<Message> {
    let remaining = RECOVERY_SETTLE_SECS - (s.now() - s.wait_start);
    s.sleep_secs(remaining);
    Some(Message::Done)
}

fn on_recovery_timeout(s: &mut Session) -> Option<Message> {
    if s.now() - s.recovery_start > s.reconnect_secs {
        Some(Message::Timeout)
    } else {
        Some(Message::NoTimeout)
    }
}

fn router_timeout(verb: Message, s: &mut Session) -> Message {
    if verb == Message::Timeout && !s.device.single_device {
        return Message::DisconnectModem;
    }
    verb
}

fn periodic_timeout(verb: Message, s: &mut Session) -> Message {
    if verb == Message::Timeout && !s.device.single_device && !s.periodic_includes_modem {
        return Message::DisconnectModem;
    }
    verb
}

fn on_check_max_cycles(s: &mut Session) -> Option<Message> {
    let config = s.config.snapshot();
    s.cycles += 1;
    if config.limit_cycles && s.cycles >= config.recovery_cycles {
        tracing::warn!(cycles = s.cycles, "recovery cycles exhausted");
        s.raise_failure(RecoveryType::Failed);
        s.cycles = 0;
        return Some(Message::Exceeded);
    }
    Some(Message::NotExceeded)
}

fn enter_hw_error(s: &mut Session) {
    s.raise_failure(RecoveryType::HWFailure);
    s.wait_start = s.now();
}

fn on_hw_error(s: &mut Session) -> Option<Message> {
    let remaining = HW_ERROR_BACKOFF_SECS - (s.now() - s.wait_start);
    s.sleep_secs(remaining);
    Some(Message::Done)
}

type Machine = StateMachine<RecoveryState, Message, Session>;

fn build_machine() -> Result<Machine, RecoveryError> {
    use Message as M;
    use RecoveryState as S;

    let wait_period = || Behavior::new(on_wait_period).entry(enter_wait_period);
    let check = |exit: ExitFn<Session, Message>| {
        Behavior::new(on_check).entry(enter_check).exit(exit)
    };
    let machine = TableBuilder::new(S::Init)
        .state(
            S::Init,
            Behavior::new(on_init),
            &[(M::Connected, S::CheckConnectivity), (M::Disconnected, S::CheckConnectivity)],
        )
        .state(
            S::CheckConnectivity,
            check(decide_recovery_path),
            &[
                (M::Disconnected, S::WaitWhileRecoveryFailure),
                (M::Done, S::CheckConnectivity),
                (M::Connected, S::WaitWhileConnected),
                (M::DisconnectRouter, S::DisconnectRouter),
                (M::DisconnectModem, S::DisconnectModem),
            ],
        )
        .state(
            S::StartCheckConnectivity,
            Behavior::new(on_start_check),
            &[(M::Done, S::CheckConnectivity)],
        )
        .state(
            S::WaitWhileConnected,
            wait_period(),
            &[
                (M::Done, S::CheckConnectivity),
                (M::DisconnectRouter, S::DisconnectRouter),
                (M::DisconnectModem, S::DisconnectModem),
                (M::CheckConnectivity, S::StartCheckConnectivity),
                (M::PeriodicRestart, S::PeriodicRestart),
            ],
        )
        .state(
            S::DisconnectRouter,
            Behavior::new(on_power_cycle).entry(enter_disconnect_router),
            &[(M::Done, S::WaitAfterRouterRecovery), (M::HWError, S::HWError)],
        )
        .state(
            S::WaitAfterRouterRecovery,
            Behavior::new(on_settle).entry(enter_settle),
            &[(M::Done, S::CheckConnectivityAfterRouterRecovery)],
        )
        .state(
            S::CheckConnectivityAfterRouterRecovery,
            check(update_recovery_state),
            &[
                (M::Done, S::CheckConnectivityAfterRouterRecovery),
                (M::Connected, S::WaitWhileConnected),
                (M::Disconnected, S::CheckRouterRecoveryTimeout),
            ],
        )
        .state(
            S::CheckRouterRecoveryTimeout,
            Behavior::new(on_recovery_timeout).exit(router_timeout),
            &[
                (M::Timeout, S::CheckMaxCyclesExceeded),
                (M::DisconnectModem, S::DisconnectModem),
                (M::NoTimeout, S::WaitAfterRouterRecovery),
            ],
        )
        .state(
            S::DisconnectModem,
            Behavior::new(on_power_cycle).entry(enter_disconnect_modem),
            &[(M::Done, S::WaitAfterModemRecovery), (M::HWError, S::HWError)],
        )
        .state(
            S::WaitAfterModemRecovery,
            Behavior::new(on_settle).entry(enter_settle),
            &[(M::Done, S::CheckConnectivityAfterModemRecovery)],
        )
        .state(
            S::CheckConnectivityAfterModemRecovery,
            check(update_recovery_state),
            &[
                (M::Done, S::CheckConnectivityAfterModemRecovery),
                (M::Connected, S::WaitWhileConnected),
                (M::Disconnected, S::CheckModemRecoveryTimeout),
            ],
        )
        .state(
            S::CheckModemRecoveryTimeout,
            Behavior::new(on_recovery_timeout),
            &[
                (M::Timeout, S::CheckMaxCyclesExceeded),
                (M::NoTimeout, S::WaitAfterModemRecovery),
            ],
        )
        .state(
            S::CheckMaxCyclesExceeded,
            Behavior::new(on_check_max_cycles),
            &[
                (M::Exceeded, S::CheckConnectivityAfterRecoveryFailure),
                (M::NotExceeded, S::DisconnectRouter),
            ],
        )
        .state(
            S::CheckConnectivityAfterRecoveryFailure,
            check(after_failure_check),
            &[
                (M::Done, S::CheckConnectivityAfterRecoveryFailure),
                (M::Connected, S::WaitWhileConnected),
                (M::Disconnected, S::WaitWhileRecoveryFailure),
            ],
        )
        .state(
            S::WaitWhileRecoveryFailure,
            wait_period(),
            &[
                (M::Done, S::CheckConnectivityAfterRecoveryFailure),
                (M::DisconnectRouter, S::DisconnectRouter),
                (M::DisconnectModem, S::DisconnectModem),
                (M::CheckConnectivity, S::StartCheckConnectivity),
                (M::PeriodicRestart, S::PeriodicRestart),
            ],
        )
        .state(
            S::PeriodicRestart,
            Behavior::new(on_power_cycle).entry(enter_periodic_restart),
            &[(M::Done, S::WaitAfterPeriodicRestart), (M::HWError, S::HWError)],
        )
        .state(
            S::WaitAfterPeriodicRestart,
            Behavior::new(on_settle).entry(enter_settle),
            &[(M::Done, S::CheckConnectivityAfterPeriodicRestart)],
        )
        .state(
            S::CheckConnectivityAfterPeriodicRestart,
            check(update_recovery_state),
            &[
                (M::Done, S::CheckConnectivityAfterPeriodicRestart),
                (M::Connected, S::WaitWhileConnected),
                (M::Disconnected, S::CheckPeriodicRestartTimeout),
            ],
        )
        .state(
            S::CheckPeriodicRestartTimeout,
            Behavior::new(on_recovery_timeout).exit(periodic_timeout),
            &[
                (M::Timeout, S::CheckMaxCyclesExceeded),
                (M::DisconnectModem, S::DisconnectModem),
                (M::NoTimeout, S::WaitAfterPeriodicRestart),
            ],
        )
        .state(
            S::HWError,
            Behavior::new(on_hw_error).entry(enter_hw_error),
            &[(M::Done, S::StartCheckConnectivity)],
        )
        .build()?;
    Ok(machine)
}

/// Recovery state machine plus its session.
pub struct RecoveryEngine {
    machine: Machine,
    session: Session,
    _config_subscription: Subscription,
}

impl RecoveryEngine {
    /// Builds the engine. `last_recovery` seeds the escalation rule, usually
    /// from the stored history.
    pub fn new(deps: EngineDeps, last_recovery: Option<i64>) -> Result<Self, RecoveryError> {
        let machine = build_machine()?;
        let config = deps.config.snapshot();
        let shared = Arc::new(Shared::new(
            config.auto_recovery,
            config.max_history,
            last_recovery,
        ));
        let control = RecoveryControl::new(shared.clone());
        let subscription = deps.config.subscribe(move |change| {
            control.apply_config(change.current.auto_recovery, change.current.max_history);
        });
        let session = Session {
            shared,
            config: deps.config,
            device: deps.device,
            power: deps.power,
            probe: deps.probe,
            clock: deps.clock,
            source: RecoverySource::Auto,
            last_recovery,
            last_recovery_type: RecoveryType::NoRecovery,
            cycles: 0,
            lan_connected: false,
            check: None,
            gateway: None,
            power_cycle: None,
            wait_start: 0,
            recovery_start: 0,
            reconnect_secs: 0,
            periodic_includes_modem: false,
            next_periodic: None,
        };
        Ok(Self {
            machine,
            session,
            _config_subscription: subscription,
        })
    }

    /// Handle for requests and state queries; it outlives [`Self::spawn`].
    pub fn control(&self) -> RecoveryControl {
        RecoveryControl::new(self.session.shared.clone())
    }

    /// Current internal state.
    pub fn state(&self) -> RecoveryState {
        self.machine.current()
    }

    /// Completed recovery attempts since the last success or failure.
    pub fn cycles(&self) -> u32 {
        self.session.cycles
    }

    /// Enters the initial state. Call once before [`Self::perform_cycle`].
    pub fn start(&mut self) {
        self.session.reschedule();
        tracing::info!(
            device = %self.session.device.device_name,
            single_device = self.session.device.single_device,
            last_recovery = ?self.session.last_recovery,
            "recovery control started"
        );
    }

    /// Runs one do-action and the transition it asks for.
    pub fn perform_cycle(&mut self) {
        if let Some(transition) = self.machine.cycle(&mut self.session) {
            tracing::debug!(
                from = ?transition.from,
                verb = ?transition.verb,
                to = ?transition.to,
                "recovery transition"
            );
        }
    }

    /// Runs the engine on its own thread until the handle is shut down.
    pub fn spawn(mut self) -> Result<EngineHandle, RecoveryError> {
        let shared = self.session.shared.clone();
        let thread = std::thread::Builder::new()
            .name("recovery-control".into())
            .spawn(move || {
                self.start();
                while !self.session.shared.shutdown.load(Ordering::SeqCst) {
                    self.perform_cycle();
                }
                self.session.restore_power();
                tracing::info!("recovery control stopped");
            })
            .map_err(RecoveryError::Spawn)?;
        Ok(EngineHandle {
            shared,
            thread: Some(thread),
        })
    }
}

/// Owner of the engine thread; stops and joins it on drop.
pub struct EngineHandle {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Handle onto the running engine.
    pub fn control(&self) -> RecoveryControl {
        RecoveryControl::new(self.shared.clone())
    }

    /// Stops the engine thread and waits for it. Later calls do nothing.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.mailbox.wake();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("recovery thread panicked");
            }
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
