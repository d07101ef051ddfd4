//! TCP reachability probe running on a tokio runtime.
//!
//! A target counts as reachable when a TCP connection to the probe port is
//! accepted or actively refused; both mean the host answered.
use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;

use connwatch::{ConnectivityProbe, ProbeHandle, ProbeStatus, ProbeTarget};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::AbortHandle;

/// Port probed when none is configured.
pub const DEFAULT_PROBE_PORT: u16 = 80;
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(4);

struct Inflight {
    result: oneshot::Receiver<bool>,
    task: AbortHandle,
}

/// Probes hosts by opening TCP connections on a tokio runtime.
///
/// The engine thread polls results without blocking; the connects run as
/// tasks on `runtime`.
pub struct TcpProbe {
    runtime: Handle,
    port: u16,
    attempt_timeout: Duration,
    next: u64,
    inflight: HashMap<ProbeHandle, Inflight>,
}

impl TcpProbe {
    /// Probe connecting to `port`, spawning its tasks on `runtime`.
    pub fn new(runtime: Handle, port: u16) -> Self {
        Self {
            runtime,
            port,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            next: 0,
            inflight: HashMap::new(),
        }
    }

    /// Limit for a single connect attempt.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }
}

impl ConnectivityProbe for TcpProbe {
    fn start(&mut self, target: &ProbeTarget, max_attempts: u32) -> ProbeHandle {
        let handle = ProbeHandle(self.next);
        self.next += 1;
        let (tx, rx) = oneshot::channel();
        let host = match target {
            ProbeTarget::Ip(addr) => addr.to_string(),
            ProbeTarget::Host(host) => host.clone(),
        };
        let port = self.port;
        let timeout = self.attempt_timeout;
        let task = self.runtime.spawn(async move {
            let reachable = reach(&host, port, max_attempts, timeout).await;
            let _ = tx.send(reachable);
        });
        self.inflight.insert(
            handle,
            Inflight {
                result: rx,
                task: task.abort_handle(),
            },
        );
        handle
    }

    fn poll(&mut self, handle: ProbeHandle) -> ProbeStatus {
        let Some(inflight) = self.inflight.get_mut(&handle) else {
            return ProbeStatus::Failure;
        };
        let status = match inflight.result.try_recv() {
            Err(TryRecvError::Empty) => return ProbeStatus::Pending,
            Ok(true) => ProbeStatus::Success,
            Ok(false) | Err(TryRecvError::Closed) => ProbeStatus::Failure,
        };
        self.inflight.remove(&handle);
        status
    }

    fn cancel(&mut self, handle: ProbeHandle) {
        if let Some(inflight) = self.inflight.remove(&handle) {
            inflight.task.abort();
        }
    }
}

async fn reach(host: &str, port: u16, max_attempts: u32, timeout: Duration) -> bool {
    for attempt in 1..=max_attempts.max(1) {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => return true,
            Ok(Err(err)) if err.kind() == ErrorKind::ConnectionRefused => return true,
            Ok(Err(err)) => {
                tracing::debug!(host, port, attempt, error = %err, "probe attempt failed")
            }
            Err(_) => tracing::debug!(host, port, attempt, "probe attempt timed out"),
        }
    }
    false
}
