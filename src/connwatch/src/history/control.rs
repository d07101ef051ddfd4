//! Turns recovery state broadcasts into history records.
//!
//! At most one record is in flight at a time. It is opened by a connectivity
//! check or the first power cycle, accumulates router and modem counts, and
//! is either stored (success or failure) or silently dropped when a check
//! ends without any device having been restarted.
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::ConfigStore;
use crate::history::item::{HistoryStorageItem, RecoveryStatus};
use crate::history::storage::{HistoryError, HistoryStorage};
use crate::observers::{Observers, Subscription};
use crate::recovery::{MaxHistoryChanged, RecoverySource, RecoveryStateChanged, RecoveryType};
use crate::storage::DurableStorage;

/// Broadcast surface History Control listens to.
pub trait RecoveryEvents {
    fn recovery_state_changed(&self) -> &Observers<RecoveryStateChanged>;
    fn max_history_changed(&self) -> &Observers<MaxHistoryChanged>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Checking,
    Recovering,
    Failed,
    CheckingAfterFailure,
    HwFailure,
}

struct Tracker {
    storage: HistoryStorage,
    phase: Phase,
    current: Option<HistoryStorageItem>,
    last_update: i64,
}

impl Tracker {
    fn open(&mut self, source: RecoverySource, now: i64) -> &mut HistoryStorageItem {
        if self.current.is_none() {
            self.last_update = now;
        }
        self.current
            .get_or_insert_with(|| HistoryStorageItem::started(source, now))
    }

    fn store(
        &mut self,
        mut item: HistoryStorageItem,
        status: RecoveryStatus,
        end_time: Option<i64>,
        now: i64,
    ) -> Result<(), HistoryError> {
        item.recovery_status = status;
        item.end_time = end_time;
        self.storage.add_history(&item)?;
        self.last_update = now;
        tracing::info!(
            source = ?item.recovery_source,
            status = ?status,
            router = item.router_recoveries,
            modem = item.modem_recoveries,
            "history record stored"
        );
        Ok(())
    }

    fn react(&mut self, event: &RecoveryStateChanged, now: i64) -> Result<(), HistoryError> {
        let source = event.source;
        match event.recovery_type {
            RecoveryType::ConnectivityCheck => match self.phase {
                Phase::Idle | Phase::HwFailure => {
                    self.open(source, now);
                    self.phase = Phase::Checking;
                }
                Phase::Failed => {
                    self.open(source, now);
                    self.phase = Phase::CheckingAfterFailure;
                }
                Phase::Checking | Phase::Recovering | Phase::CheckingAfterFailure => {}
            },
            RecoveryType::Router
            | RecoveryType::RouterSingleDevice
            | RecoveryType::Modem
            | RecoveryType::Periodic => {
                let cycled = event.cycled;
                let item = self.open(source, now);
                if cycled.router {
                    item.router_recoveries = item.router_recoveries.saturating_add(1);
                }
                if cycled.modem {
                    item.modem_recoveries = item.modem_recoveries.saturating_add(1);
                }
                self.last_update = now;
                self.phase = Phase::Recovering;
            }
            RecoveryType::NoRecovery => {
                match self.phase {
                    Phase::Idle => {}
                    Phase::Failed => {
                        // connectivity came back on its own
                        let marker = HistoryStorageItem::started(source, now);
                        self.store(marker, RecoveryStatus::RecoverySuccess, None, now)?;
                    }
                    Phase::CheckingAfterFailure => {
                        if let Some(item) = self.current.take() {
                            self.store(item, RecoveryStatus::RecoverySuccess, None, now)?;
                        }
                    }
                    Phase::Checking | Phase::Recovering | Phase::HwFailure => {
                        if let Some(item) = self.current.take() {
                            if item.has_device_recoveries() {
                                self.store(item, RecoveryStatus::RecoverySuccess, Some(now), now)?;
                            }
                        }
                    }
                }
                self.phase = Phase::Idle;
            }
            RecoveryType::Failed | RecoveryType::HWFailure => {
                if let Some(item) = self.current.take() {
                    self.store(item, RecoveryStatus::RecoveryFailure, Some(now), now)?;
                }
                self.phase = if event.recovery_type == RecoveryType::Failed {
                    Phase::Failed
                } else {
                    Phase::HwFailure
                };
            }
            RecoveryType::Disconnected => {
                if self
                    .current
                    .as_ref()
                    .is_some_and(|item| !item.has_device_recoveries())
                {
                    self.current = None;
                }
                if self.phase == Phase::Checking {
                    self.phase = Phase::Idle;
                }
            }
        }
        Ok(())
    }

    fn available(&self) -> usize {
        let stored = self.storage.available();
        if self.current.is_some() && !self.storage.is_full() {
            stored + 1
        } else {
            stored
        }
    }

    fn item(&self, index: usize) -> Result<Option<HistoryStorageItem>, HistoryError> {
        let Some(current) = self.current else {
            return self.storage.item(index);
        };
        let available = self.available();
        if index >= available {
            return Ok(None);
        }
        if index == available - 1 {
            return Ok(Some(current));
        }
        // a full ring hides its oldest record behind the in-flight one
        let shift = usize::from(self.storage.is_full());
        self.storage.item(index + shift)
    }
}

struct Shared {
    tracker: Mutex<Tracker>,
    clock: Arc<dyn Clock>,
}

/// Recovery history tracker and read API.
pub struct HistoryControl {
    shared: Arc<Shared>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl HistoryControl {
    /// Loads the stored history sized to the configured `max_history`.
    pub fn new(
        storage: Arc<dyn DurableStorage>,
        config: Arc<ConfigStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HistoryError> {
        let max_history = config.snapshot().max_history as usize;
        let storage = HistoryStorage::init(storage, max_history)?;
        let tracker = Tracker {
            storage,
            phase: Phase::Idle,
            current: None,
            last_update: clock.now(),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                tracker: Mutex::new(tracker),
                clock,
            }),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// Subscribes to state and max-history broadcasts of `events`.
    pub fn attach(&self, events: &dyn RecoveryEvents) {
        let shared = self.shared.clone();
        let state = events.recovery_state_changed().subscribe(move |event| {
            let now = shared.clock.now();
            let mut tracker = shared.tracker.lock();
            if let Err(err) = tracker.react(event, now) {
                tracing::error!(
                    error = %err,
                    event = ?event.recovery_type,
                    "failed to record history"
                );
            }
        });
        let shared = self.shared.clone();
        let resize = events.max_history_changed().subscribe(move |event| {
            let mut tracker = shared.tracker.lock();
            if let Err(err) = tracker.storage.resize(event.max_records as usize) {
                tracing::error!(
                    error = %err,
                    max_records = event.max_records,
                    "failed to resize history"
                );
            }
        });
        self.subscriptions.lock().extend([state, resize]);
    }

    /// Number of records visible through [`HistoryControl::history_item`].
    pub fn available(&self) -> usize {
        self.shared.tracker.lock().available()
    }

    /// Record `index`, oldest first; the in-flight record, if any, is last.
    pub fn history_item(&self, index: usize) -> Result<Option<HistoryStorageItem>, HistoryError> {
        self.shared.tracker.lock().item(index)
    }

    pub fn items(&self) -> Result<Vec<HistoryStorageItem>, HistoryError> {
        let tracker = self.shared.tracker.lock();
        let mut items = Vec::with_capacity(tracker.available());
        for index in 0..tracker.available() {
            if let Some(item) = tracker.item(index)? {
                items.push(item);
            }
        }
        Ok(items)
    }

    pub fn last_recovery(&self) -> Option<i64> {
        self.shared.tracker.lock().storage.last_recovery()
    }

    /// Time of the last change to the visible history.
    pub fn last_update(&self) -> i64 {
        self.shared.tracker.lock().last_update
    }

    pub fn max_history(&self) -> usize {
        self.shared.tracker.lock().storage.capacity()
    }
}
