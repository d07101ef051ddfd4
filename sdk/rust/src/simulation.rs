//! Randomized probe for dry runs without touching the network.
//!
//! Outages start at random and last a random number of probes, which is
//! enough to walk the engine through router and modem recoveries.
use std::collections::HashMap;

use connwatch::{ConnectivityProbe, ProbeHandle, ProbeStatus, ProbeTarget};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const MAX_OUTAGE_PROBES: u32 = 12;

/// Probe answering from a random outage model instead of the network.
pub struct SimulatedProbe {
    rng: StdRng,
    outage_chance: f64,
    outage_left: u32,
    next: u64,
    results: HashMap<ProbeHandle, ProbeStatus>,
}

impl SimulatedProbe {
    /// `outage_chance` is the probability that a probe starts an outage.
    pub fn new(outage_chance: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), outage_chance)
    }

    /// Reproducible variant of [`SimulatedProbe::new`].
    pub fn seeded(seed: u64, outage_chance: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), outage_chance)
    }

    fn with_rng(rng: StdRng, outage_chance: f64) -> Self {
        Self {
            rng,
            outage_chance: outage_chance.clamp(0.0, 1.0),
            outage_left: 0,
            next: 0,
            results: HashMap::new(),
        }
    }

    pub fn in_outage(&self) -> bool {
        self.outage_left > 0
    }
}

impl ConnectivityProbe for SimulatedProbe {
    fn start(&mut self, target: &ProbeTarget, _max_attempts: u32) -> ProbeHandle {
        if self.outage_left == 0 && self.rng.gen_bool(self.outage_chance) {
            self.outage_left = self.rng.gen_range(1..=MAX_OUTAGE_PROBES);
            tracing::info!(probes = self.outage_left, "simulated outage started");
        }
        let status = if self.outage_left > 0 {
            self.outage_left -= 1;
            ProbeStatus::Failure
        } else {
            ProbeStatus::Success
        };
        tracing::trace!(%target, ?status, "simulated probe");
        let handle = ProbeHandle(self.next);
        self.next += 1;
        self.results.insert(handle, status);
        handle
    }

    fn poll(&mut self, handle: ProbeHandle) -> ProbeStatus {
        self.results.remove(&handle).unwrap_or(ProbeStatus::Failure)
    }

    fn cancel(&mut self, handle: ProbeHandle) {
        self.results.remove(&handle);
    }
}
