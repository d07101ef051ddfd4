//! Time source used by the engine and the history tracker.
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::recovery::Mailbox;

/// Wall clock plus the blocking primitives the engine suspends on.
pub trait Clock: Send + Sync {
    /// Current time in unix seconds.
    fn now(&self) -> i64;

    fn sleep(&self, duration: Duration);

    /// Blocks until `mailbox` is signalled or `timeout` elapses.
    fn park(&self, mailbox: &Mailbox, timeout: Duration) {
        mailbox.wait_for(timeout);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        }
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock: sleeping and parking advance time instantly.
///
/// Parking returns at once when the mailbox already holds work, otherwise the
/// whole timeout elapses.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_secs: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_secs * 1000),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, secs: i64) {
        self.now_ms.store(secs * 1000, Ordering::SeqCst);
    }

    pub fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        // 2024-01-01T00:00:00Z
        Self::new(1_704_067_200)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }

    fn park(&self, mailbox: &Mailbox, timeout: Duration) {
        if mailbox.consume_wake() {
            return;
        }
        self.advance(timeout);
    }
}
