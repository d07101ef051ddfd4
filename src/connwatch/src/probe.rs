//! Connectivity probe contract.
//!
//! A probe is started once and polled without blocking until it settles. The
//! engine owns the deadline: a probe still pending after the engine's timeout
//! is cancelled and counted as a failure.
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProbeTarget {
    Ip(IpAddr),
    Host(String),
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeTarget::Ip(addr) => write!(f, "{addr}"),
            ProbeTarget::Host(host) => f.write_str(host),
        }
    }
}

impl From<IpAddr> for ProbeTarget {
    fn from(addr: IpAddr) -> Self {
        ProbeTarget::Ip(addr)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Pending,
    Success,
    Failure,
}

pub trait ConnectivityProbe: Send {
    /// Starts a reachability probe with up to `max_attempts` tries.
    fn start(&mut self, target: &ProbeTarget, max_attempts: u32) -> ProbeHandle;

    /// Non-blocking poll; settled handles may be forgotten by the probe.
    fn poll(&mut self, handle: ProbeHandle) -> ProbeStatus;

    /// Drops a probe the caller stopped waiting for. Unknown handles are
    /// ignored.
    fn cancel(&mut self, handle: ProbeHandle);
}

/// A probe shared between the engine and whoever scripts or inspects it.
impl<P: ConnectivityProbe> ConnectivityProbe for Arc<Mutex<P>> {
    fn start(&mut self, target: &ProbeTarget, max_attempts: u32) -> ProbeHandle {
        self.lock().start(target, max_attempts)
    }

    fn poll(&mut self, handle: ProbeHandle) -> ProbeStatus {
        self.lock().poll(handle)
    }

    fn cancel(&mut self, handle: ProbeHandle) {
        self.lock().cancel(handle)
    }
}

/// Probe whose answers are scripted per target.
///
/// Each target has a queue of outcomes consumed one per probe; when the queue
/// is empty the target's fallback answer is used. Useful for tests and dry
/// runs.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    scripts: HashMap<ProbeTarget, VecDeque<ProbeStatus>>,
    fallback: HashMap<ProbeTarget, ProbeStatus>,
    default_status: Option<ProbeStatus>,
    inflight: HashMap<ProbeHandle, ProbeStatus>,
    started: Vec<ProbeTarget>,
    next: u64,
}

impl ScriptedProbe {
    /// Creates a probe answering `default_status` for unknown targets.
    pub fn new(default_status: ProbeStatus) -> Self {
        Self {
            default_status: Some(default_status),
            ..Self::default()
        }
    }

    pub fn push(&mut self, target: ProbeTarget, status: ProbeStatus) -> &mut Self {
        self.scripts.entry(target).or_default().push_back(status);
        self
    }

    pub fn set(&mut self, target: ProbeTarget, status: ProbeStatus) -> &mut Self {
        self.scripts.remove(&target);
        self.fallback.insert(target, status);
        self
    }

    /// Targets probed so far, in order.
    pub fn started(&self) -> &[ProbeTarget] {
        &self.started
    }

    /// Probes started but neither settled nor cancelled.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

impl ConnectivityProbe for ScriptedProbe {
    fn start(&mut self, target: &ProbeTarget, _max_attempts: u32) -> ProbeHandle {
        let status = self
            .scripts
            .get_mut(target)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.fallback.get(target).copied())
            .or(self.default_status)
            .unwrap_or(ProbeStatus::Failure);
        let handle = ProbeHandle(self.next);
        self.next += 1;
        self.inflight.insert(handle, status);
        self.started.push(target.clone());
        handle
    }

    fn poll(&mut self, handle: ProbeHandle) -> ProbeStatus {
        match self.inflight.get(&handle).copied() {
            Some(ProbeStatus::Pending) => ProbeStatus::Pending,
            Some(status) => {
                self.inflight.remove(&handle);
                status
            }
            None => ProbeStatus::Failure,
        }
    }

    fn cancel(&mut self, handle: ProbeHandle) {
        self.inflight.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_outcomes_then_fallback() {
        let host = ProbeTarget::Host("example.com".into());
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        probe.push(host.clone(), ProbeStatus::Failure);
        let first = probe.start(&host, 3);
        let second = probe.start(&host, 3);
        assert_eq!(probe.poll(first), ProbeStatus::Failure);
        assert_eq!(probe.poll(second), ProbeStatus::Success);
        assert_eq!(probe.started().len(), 2);
    }

    #[test]
    fn cancelled_handle_is_forgotten() {
        let host = ProbeTarget::Host("example.com".into());
        let mut probe = ScriptedProbe::new(ProbeStatus::Pending);
        let handle = probe.start(&host, 3);
        assert_eq!(probe.poll(handle), ProbeStatus::Pending);
        probe.cancel(handle);
        assert_eq!(probe.in_flight(), 0);
        assert_eq!(probe.poll(handle), ProbeStatus::Failure);
    }

    #[test]
    fn unknown_handle_fails() {
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        assert_eq!(probe.poll(ProbeHandle(42)), ProbeStatus::Failure);
    }
}
