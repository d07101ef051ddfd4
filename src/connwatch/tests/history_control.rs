use std::sync::Arc;
use std::time::Duration;

use connwatch::history::{HistoryControl, RecoveryEvents};
use connwatch::observers::Observers;
use connwatch::recovery::{MaxHistoryChanged, RecoveryStateChanged};
use connwatch::{
    ConfigStore, CycledDevices, HistoryStorageItem, ManualClock, MemoryStorage, RecoverySource,
    RecoveryStatus, RecoveryType,
};

/// Stand-in for the recovery engine's broadcast surface.
#[derive(Default)]
struct FakeRecovery {
    state: Observers<RecoveryStateChanged>,
    max_history: Observers<MaxHistoryChanged>,
}

impl RecoveryEvents for FakeRecovery {
    fn recovery_state_changed(&self) -> &Observers<RecoveryStateChanged> {
        &self.state
    }

    fn max_history_changed(&self) -> &Observers<MaxHistoryChanged> {
        &self.max_history
    }
}

struct Harness {
    recovery: FakeRecovery,
    clock: Arc<ManualClock>,
    config: Arc<ConfigStore>,
    history: HistoryControl,
}

impl Harness {
    fn new() -> Self {
        let storage = Arc::new(MemoryStorage::default());
        let config = Arc::new(ConfigStore::open(storage.clone()).unwrap());
        let clock = Arc::new(ManualClock::default());
        let history = HistoryControl::new(storage, config.clone(), clock.clone()).unwrap();
        let recovery = FakeRecovery::default();
        history.attach(&recovery);
        Self {
            recovery,
            clock,
            config,
            history,
        }
    }

    /// Moves the clock one second forward and returns the new time.
    fn tick(&self) -> i64 {
        self.clock.advance(Duration::from_secs(1));
        self.now()
    }

    fn now(&self) -> i64 {
        connwatch::Clock::now(self.clock.as_ref())
    }

    fn signal(&self, recovery_type: RecoveryType, source: RecoverySource) {
        self.recovery
            .state
            .notify(&RecoveryStateChanged::new(recovery_type, source));
    }

    /// Periodic restart of the devices the engine picks for this wiring.
    fn signal_periodic(&self, single_device: bool, source: RecoverySource) {
        let cycled = CycledDevices::periodic(&self.config.snapshot(), single_device);
        self.recovery.state.notify(
            &RecoveryStateChanged::new(RecoveryType::Periodic, source).with_cycled(cycled),
        );
    }

    fn resize(&self, max_records: u32) {
        self.recovery
            .max_history
            .notify(&MaxHistoryChanged { max_records });
    }

    fn item(&self, index: usize) -> HistoryStorageItem {
        self.history.history_item(index).unwrap().unwrap()
    }

    #[allow(clippy::too_many_arguments)]
    fn verify(
        &self,
        index: usize,
        source: RecoverySource,
        status: RecoveryStatus,
        modem: u16,
        router: u16,
        start: i64,
        end: Option<i64>,
        message: &str,
    ) {
        let item = self.item(index);
        assert_eq!(item.recovery_source, source, "{message}");
        assert_eq!(item.recovery_status, status, "{message}");
        assert_eq!(item.modem_recoveries, modem, "{message}");
        assert_eq!(item.router_recoveries, router, "{message}");
        assert_eq!(item.start_time, start, "{message}");
        assert_eq!(item.end_time, end, "{message}");
    }

    fn fill_successes(&self, count: usize, source: RecoverySource) {
        for _ in 0..count {
            self.signal(RecoveryType::ConnectivityCheck, source);
            self.signal(RecoveryType::Modem, source);
            self.tick();
            self.signal(RecoveryType::NoRecovery, source);
        }
    }

    fn verify_successes(&self, count: usize, source: RecoverySource, message: &str) {
        assert_eq!(self.history.available(), count, "{message}");
        let now = self.now();
        for i in 0..count {
            let start = now - count as i64 + i as i64;
            self.verify(
                i,
                source,
                RecoveryStatus::RecoverySuccess,
                1,
                0,
                start,
                Some(start + 1),
                message,
            );
        }
    }
}

use RecoverySource::{Auto, UserInitiated};
use RecoveryStatus::{OnGoingRecovery, RecoveryFailure, RecoverySuccess};

#[test]
fn check_then_failure_then_recovered() {
    let h = Harness::new();
    assert_eq!(h.history.last_update(), h.now());
    assert_eq!(h.history.available(), 0);

    let t_last = h.tick();
    h.signal(RecoveryType::ConnectivityCheck, UserInitiated);
    assert_eq!(h.history.last_update(), t_last);
    assert_eq!(h.history.available(), 1);
    h.verify(0, UserInitiated, OnGoingRecovery, 0, 0, t_last, None, "user check");

    h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.available(), 0);
    assert_eq!(h.history.last_update(), t_last);

    let t_start = h.tick();
    h.signal(RecoveryType::ConnectivityCheck, UserInitiated);
    assert_eq!(h.history.last_update(), t_start);
    let now = h.tick();
    h.signal(RecoveryType::Modem, Auto);
    assert_eq!(h.history.last_update(), now);
    let now = h.tick();
    h.signal(RecoveryType::Router, Auto);
    assert_eq!(h.history.last_update(), now);
    let now = h.tick();
    h.signal(RecoveryType::Failed, Auto);
    assert_eq!(h.history.last_update(), now);
    assert_eq!(h.history.available(), 1);
    h.verify(0, UserInitiated, RecoveryFailure, 1, 1, t_start, Some(now), "failure");

    let t_start = h.tick();
    h.signal(RecoveryType::ConnectivityCheck, Auto);
    assert_eq!(h.history.last_update(), t_start);
    assert_eq!(h.history.available(), 2);
    h.verify(1, Auto, OnGoingRecovery, 0, 0, t_start, None, "auto check");

    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.last_update(), now);
    assert_eq!(h.history.available(), 2);
    h.verify(1, Auto, RecoverySuccess, 0, 0, t_start, None, "resumed after failure");
    assert_eq!(h.history.last_recovery(), Some(t_start));
}

#[test]
fn max_history_changes_resize_storage() {
    let h = Harness::new();
    assert_eq!(h.config.snapshot().max_history, 10);
    h.resize(5);
    assert_eq!(h.history.available(), 0);
    assert_eq!(h.history.max_history(), 5);

    h.fill_successes(6, UserInitiated);
    h.verify_successes(5, UserInitiated, "history size 5");

    h.resize(3);
    h.verify_successes(3, UserInitiated, "history size 3");

    h.resize(4);
    assert_eq!(h.history.available(), 3);
    h.fill_successes(2, UserInitiated);
    h.verify_successes(4, UserInitiated, "history size 4");
}

#[test]
fn router_recoveries_accumulate() {
    let h = Harness::new();
    let t0 = h.now();
    h.signal(RecoveryType::Router, UserInitiated);
    assert_eq!(h.history.available(), 1);
    h.verify(0, UserInitiated, OnGoingRecovery, 0, 1, t0, None, "router ongoing");
    assert_eq!(h.history.last_update(), t0);

    let now = h.tick();
    h.signal(RecoveryType::Router, UserInitiated);
    h.verify(0, UserInitiated, OnGoingRecovery, 0, 2, t0, None, "router ongoing 2");
    assert_eq!(h.history.last_update(), now);

    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.available(), 1);
    h.verify(0, UserInitiated, RecoverySuccess, 0, 2, t0, Some(now), "router success");

    let t0 = h.tick();
    h.signal(RecoveryType::Router, UserInitiated);
    assert_eq!(h.history.available(), 2);
    h.verify(1, UserInitiated, OnGoingRecovery, 0, 1, t0, None, "router ongoing 3");

    let now = h.tick();
    h.signal(RecoveryType::Failed, UserInitiated);
    assert_eq!(h.history.available(), 2);
    h.verify(1, UserInitiated, RecoveryFailure, 0, 1, t0, Some(now), "router failure");

    let t0 = h.tick();
    h.signal(RecoveryType::RouterSingleDevice, UserInitiated);
    assert_eq!(h.history.available(), 3);
    h.verify(2, UserInitiated, OnGoingRecovery, 0, 1, t0, None, "single device ongoing");

    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.available(), 3);
    h.verify(2, UserInitiated, RecoverySuccess, 0, 1, t0, Some(now), "single device success");
    assert_eq!(h.history.last_update(), now);
}

#[test]
fn modem_recoveries_accumulate() {
    let h = Harness::new();
    let t0 = h.now();
    h.signal(RecoveryType::Modem, UserInitiated);
    h.verify(0, UserInitiated, OnGoingRecovery, 1, 0, t0, None, "modem ongoing");

    h.tick();
    h.signal(RecoveryType::Modem, UserInitiated);
    h.verify(0, UserInitiated, OnGoingRecovery, 2, 0, t0, None, "modem ongoing 2");

    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    h.verify(0, UserInitiated, RecoverySuccess, 2, 0, t0, Some(now), "modem success");

    let t0 = h.tick();
    h.signal(RecoveryType::Modem, UserInitiated);
    assert_eq!(h.history.available(), 2);
    let now = h.tick();
    h.signal(RecoveryType::Failed, UserInitiated);
    h.verify(1, UserInitiated, RecoveryFailure, 1, 0, t0, Some(now), "modem failure");
    assert_eq!(h.history.last_update(), now);
}

#[test]
fn periodic_restart_counts_configured_devices() {
    let h = Harness::new();
    // (modem flag, router flag, single device) -> (modem, router) counted
    let cases = [
        ((true, true, false), (1, 1)),
        ((false, true, false), (0, 1)),
        ((true, false, false), (1, 0)),
        ((false, false, false), (0, 1)),
        ((true, false, true), (0, 1)),
        ((true, true, true), (0, 1)),
    ];
    for (n, ((modem_flag, router_flag, single), (modem, router))) in
        cases.into_iter().enumerate()
    {
        h.config
            .update(|config| {
                config.periodically_restart_modem = modem_flag;
                config.periodically_restart_router = router_flag;
            })
            .unwrap();
        let t0 = h.now();
        h.signal_periodic(single, Auto);
        assert_eq!(h.history.available(), n + 1);
        h.verify(n, Auto, OnGoingRecovery, modem, router, t0, None, "periodic ongoing");
        assert_eq!(h.history.last_update(), t0);

        let now = h.tick();
        h.signal(RecoveryType::NoRecovery, Auto);
        h.verify(n, Auto, RecoverySuccess, modem, router, t0, Some(now), "periodic success");
        assert_eq!(h.history.last_update(), now);
    }
}

fn fail_then_check(h: &Harness, n: usize) -> i64 {
    let t0 = h.tick();
    h.signal(RecoveryType::ConnectivityCheck, UserInitiated);
    h.tick();
    h.signal(RecoveryType::Router, UserInitiated);
    h.tick();
    h.signal(RecoveryType::Modem, UserInitiated);
    let now = h.tick();
    h.signal(RecoveryType::Failed, UserInitiated);
    assert_eq!(h.history.available(), n);
    h.verify(n - 1, UserInitiated, RecoveryFailure, 1, 1, t0, Some(now), "failure");

    let t0 = h.tick();
    h.signal(RecoveryType::ConnectivityCheck, UserInitiated);
    assert_eq!(h.history.available(), n + 1);
    h.verify(n, UserInitiated, OnGoingRecovery, 0, 0, t0, None, "check after failure");
    assert_eq!(h.history.last_update(), t0);
    t0
}

#[test]
fn check_while_in_failure() {
    let h = Harness::new();
    let t0 = fail_then_check(&h, 1);
    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.available(), 2);
    h.verify(1, UserInitiated, RecoverySuccess, 0, 0, t0, None, "resumed after failure");
    assert_eq!(h.history.last_update(), now);

    let t0 = fail_then_check(&h, 3);
    let now = h.tick();
    h.signal(RecoveryType::Router, UserInitiated);
    assert_eq!(h.history.available(), 4);
    h.verify(3, UserInitiated, OnGoingRecovery, 0, 1, t0, None, "router after failure");
    assert_eq!(h.history.last_update(), now);

    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, UserInitiated);
    assert_eq!(h.history.available(), 4);
    h.verify(3, UserInitiated, RecoverySuccess, 0, 1, t0, Some(now), "success after failure");
    assert_eq!(h.history.last_update(), now);
}

#[test]
fn failure_then_spontaneous_recovery_leaves_marker() {
    let h = Harness::new();
    h.signal(RecoveryType::Router, Auto);
    h.tick();
    h.signal(RecoveryType::Failed, Auto);
    let now = h.tick();
    h.signal(RecoveryType::NoRecovery, Auto);
    assert_eq!(h.history.available(), 2);
    h.verify(1, Auto, RecoverySuccess, 0, 0, now, None, "regained");
    assert_eq!(h.history.last_recovery(), Some(now));
}

#[test]
fn history_survives_restart() {
    let storage = Arc::new(MemoryStorage::default());
    let config = Arc::new(ConfigStore::open(storage.clone()).unwrap());
    let clock = Arc::new(ManualClock::default());
    let recovery = FakeRecovery::default();
    {
        let history = HistoryControl::new(storage.clone(), config.clone(), clock.clone()).unwrap();
        history.attach(&recovery);
        recovery
            .state
            .notify(&RecoveryStateChanged::new(RecoveryType::Modem, Auto));
        clock.advance(Duration::from_secs(30));
        recovery
            .state
            .notify(&RecoveryStateChanged::new(RecoveryType::NoRecovery, Auto));
    }
    assert!(recovery.state.is_empty());

    let history = HistoryControl::new(storage, config, clock.clone()).unwrap();
    assert_eq!(history.available(), 1);
    assert_eq!(history.items().unwrap()[0].modem_recoveries, 1);
    assert_eq!(history.last_recovery(), Some(connwatch::Clock::now(clock.as_ref())));
}
