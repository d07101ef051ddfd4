//! Multi-stage connectivity check and gateway confirmation.
//!
//! A check walks LAN, server 1 and server 2, one probe per stage. The check
//! states of the engine loop on themselves with `Done` between stages, so the
//! scratch below outlives a single cycle.
use std::net::IpAddr;

use crate::config::AppConfig;
use crate::probe::{ConnectivityProbe, ProbeHandle, ProbeStatus, ProbeTarget};
use crate::recovery::Message;

/// Tries per probe.
pub(crate) const PROBE_ATTEMPTS: u32 = 3;
/// A probe still pending after this many seconds counts as a failure.
pub(crate) const PROBE_TIMEOUT_SECS: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Lan,
    Server1,
    Server2,
    Completed,
}

#[derive(Debug, Clone, Copy)]
struct Inflight {
    handle: ProbeHandle,
    deadline: i64,
}

/// What a poll of the check produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckStep {
    /// Probe still running.
    Pending,
    /// Stage finished, move on to the next one.
    NextStage,
    /// Check finished with the given verdict.
    Finished(Message),
}

#[derive(Debug)]
pub(crate) struct ConnectivityCheck {
    stage: Stage,
    inflight: Option<Inflight>,
}

impl ConnectivityCheck {
    pub(crate) fn new() -> Self {
        Self {
            stage: Stage::Lan,
            inflight: None,
        }
    }

    pub(crate) fn stage(&self) -> Stage {
        self.stage
    }

    /// Skips stages without a target and starts the probe for the current
    /// one. Returns `Some(true)` when the LAN stage was skipped because no
    /// LAN address is configured.
    pub(crate) fn begin(
        &mut self,
        config: &AppConfig,
        probe: &mut dyn ConnectivityProbe,
        now: i64,
    ) -> Option<bool> {
        let mut lan_skipped = None;
        let mut target = None;
        if self.stage == Stage::Lan {
            match config.lan_address {
                Some(addr) => target = Some(ProbeTarget::Ip(IpAddr::V4(addr))),
                None => {
                    self.stage = Stage::Server1;
                    lan_skipped = Some(true);
                }
            }
        }
        if self.stage == Stage::Server1 {
            target = host_target(&config.server1);
            if target.is_none() {
                self.stage = Stage::Server2;
            }
        }
        if self.stage == Stage::Server2 {
            target = host_target(&config.server2);
            if target.is_none() {
                self.stage = Stage::Completed;
            }
        }
        if let Some(target) = target {
            tracing::debug!(stage = ?self.stage, %target, "probing");
            self.inflight = Some(Inflight {
                handle: probe.start(&target, PROBE_ATTEMPTS),
                deadline: now + PROBE_TIMEOUT_SECS,
            });
        }
        lan_skipped
    }

    /// Polls the running probe. `lan_connected` is updated when the LAN
    /// stage settles.
    pub(crate) fn poll(
        &mut self,
        probe: &mut dyn ConnectivityProbe,
        now: i64,
        lan_connected: &mut bool,
    ) -> CheckStep {
        let reachable = match self.inflight {
            Some(inflight) => match probe.poll(inflight.handle) {
                ProbeStatus::Pending if now < inflight.deadline => return CheckStep::Pending,
                ProbeStatus::Pending => {
                    tracing::debug!(stage = ?self.stage, "probe timed out");
                    probe.cancel(inflight.handle);
                    false
                }
                ProbeStatus::Success => true,
                ProbeStatus::Failure => false,
            },
            None => false,
        };
        self.inflight = None;
        tracing::debug!(stage = ?self.stage, reachable, "probe settled");

        let verdict = if reachable {
            Message::Connected
        } else {
            Message::Disconnected
        };
        match self.stage {
            Stage::Lan => {
                *lan_connected = reachable;
                if reachable {
                    self.stage = Stage::Server1;
                    return CheckStep::NextStage;
                }
                self.stage = Stage::Completed;
            }
            Stage::Server1 => {
                if !reachable {
                    self.stage = Stage::Server2;
                    return CheckStep::NextStage;
                }
                self.stage = Stage::Completed;
            }
            Stage::Server2 | Stage::Completed => self.stage = Stage::Completed,
        }
        CheckStep::Finished(verdict)
    }
}

fn host_target(host: &str) -> Option<ProbeTarget> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    match host.parse::<IpAddr>() {
        Ok(addr) => Some(ProbeTarget::Ip(addr)),
        Err(_) => Some(ProbeTarget::Host(host.to_string())),
    }
}

/// Waits for the gateway to answer within a deadline, re-probing after each
/// failed attempt.
#[derive(Debug)]
pub(crate) struct GatewayConfirm {
    target: ProbeTarget,
    deadline: i64,
    inflight: Option<Inflight>,
}

impl GatewayConfirm {
    pub(crate) fn new(gateway: IpAddr, now: i64, within_secs: u32) -> Self {
        Self {
            target: ProbeTarget::Ip(gateway),
            deadline: now + within_secs as i64,
            inflight: None,
        }
    }

    /// `Some(true)` once the gateway answered, `Some(false)` when the
    /// deadline passed, `None` while still trying.
    pub(crate) fn poll(&mut self, probe: &mut dyn ConnectivityProbe, now: i64) -> Option<bool> {
        if let Some(inflight) = self.inflight {
            match probe.poll(inflight.handle) {
                ProbeStatus::Success => {
                    self.inflight = None;
                    return Some(true);
                }
                ProbeStatus::Pending if now < inflight.deadline.min(self.deadline) => return None,
                ProbeStatus::Pending => {
                    probe.cancel(inflight.handle);
                    self.inflight = None;
                }
                ProbeStatus::Failure => self.inflight = None,
            }
        }
        if now >= self.deadline {
            return Some(false);
        }
        self.inflight = Some(Inflight {
            handle: probe.start(&self.target, PROBE_ATTEMPTS),
            deadline: now + PROBE_TIMEOUT_SECS,
        });
        None
    }

    /// Cancels the probe still running, if any.
    pub(crate) fn abandon(&mut self, probe: &mut dyn ConnectivityProbe) {
        if let Some(inflight) = self.inflight.take() {
            probe.cancel(inflight.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ScriptedProbe;
    use std::net::Ipv4Addr;

    fn run(
        check: &mut ConnectivityCheck,
        config: &AppConfig,
        probe: &mut ScriptedProbe,
    ) -> (Message, bool) {
        let mut lan_connected = false;
        loop {
            if let Some(skipped) = check.begin(config, probe, 0) {
                lan_connected = skipped;
            }
            match check.poll(probe, 0, &mut lan_connected) {
                CheckStep::Pending => panic!("scripted probes settle immediately"),
                CheckStep::NextStage => continue,
                CheckStep::Finished(verdict) => return (verdict, lan_connected),
            }
        }
    }

    #[test]
    fn unset_lan_counts_as_connected() {
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        let (verdict, lan) = run(&mut ConnectivityCheck::new(), &AppConfig::default(), &mut probe);
        assert_eq!(verdict, Message::Connected);
        assert!(lan);
        assert_eq!(probe.started(), &[ProbeTarget::Host("google.com".into())]);
    }

    #[test]
    fn lan_failure_ends_check() {
        let lan = Ipv4Addr::new(192, 168, 1, 1);
        let config = AppConfig {
            lan_address: Some(lan),
            ..AppConfig::default()
        };
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        probe.set(ProbeTarget::Ip(IpAddr::V4(lan)), ProbeStatus::Failure);
        let (verdict, lan_connected) = run(&mut ConnectivityCheck::new(), &config, &mut probe);
        assert_eq!(verdict, Message::Disconnected);
        assert!(!lan_connected);
        assert_eq!(probe.started().len(), 1);
    }

    #[test]
    fn falls_back_to_second_server() {
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        probe.set(ProbeTarget::Host("google.com".into()), ProbeStatus::Failure);
        let (verdict, _) = run(&mut ConnectivityCheck::new(), &AppConfig::default(), &mut probe);
        assert_eq!(verdict, Message::Connected);
        assert_eq!(probe.started().len(), 2);
    }

    #[test]
    fn empty_hostnames_are_skipped() {
        let config = AppConfig {
            server1: String::new(),
            server2: String::new(),
            ..AppConfig::default()
        };
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        let (verdict, _) = run(&mut ConnectivityCheck::new(), &config, &mut probe);
        assert_eq!(verdict, Message::Disconnected);
        assert!(probe.started().is_empty());
    }

    #[test]
    fn pending_probe_times_out() {
        let mut probe = ScriptedProbe::new(ProbeStatus::Pending);
        let mut check = ConnectivityCheck::new();
        let mut lan = false;
        check.begin(&AppConfig::default(), &mut probe, 0);
        assert_eq!(check.poll(&mut probe, 1, &mut lan), CheckStep::Pending);
        assert_eq!(
            check.poll(&mut probe, PROBE_TIMEOUT_SECS, &mut lan),
            CheckStep::NextStage
        );
        assert_eq!(check.stage(), Stage::Server2);
        assert_eq!(probe.in_flight(), 0);
    }

    #[test]
    fn gateway_confirm_gives_up_after_deadline() {
        let gateway: IpAddr = "10.0.0.1".parse().unwrap();
        let mut probe = ScriptedProbe::new(ProbeStatus::Failure);
        let mut confirm = GatewayConfirm::new(gateway, 0, 30);
        assert_eq!(confirm.poll(&mut probe, 0), None);
        assert_eq!(confirm.poll(&mut probe, 10), None);
        assert_eq!(confirm.poll(&mut probe, 30), Some(false));
    }

    #[test]
    fn gateway_confirm_cancels_unanswered_attempts() {
        let gateway: IpAddr = "10.0.0.1".parse().unwrap();
        let mut probe = ScriptedProbe::new(ProbeStatus::Pending);
        let mut confirm = GatewayConfirm::new(gateway, 0, 60);
        assert_eq!(confirm.poll(&mut probe, 0), None);
        assert_eq!(confirm.poll(&mut probe, 5), None);
        assert_eq!(probe.in_flight(), 1);
        // probe deadline passed, a fresh one replaces it
        assert_eq!(confirm.poll(&mut probe, PROBE_TIMEOUT_SECS), None);
        assert_eq!(probe.in_flight(), 1);
        assert_eq!(confirm.poll(&mut probe, 60), Some(false));
        assert_eq!(probe.in_flight(), 0);

        let mut confirm = GatewayConfirm::new(gateway, 0, 60);
        confirm.poll(&mut probe, 0);
        confirm.abandon(&mut probe);
        assert_eq!(probe.in_flight(), 0);
    }

    #[test]
    fn gateway_confirm_succeeds() {
        let gateway: IpAddr = "10.0.0.1".parse().unwrap();
        let mut probe = ScriptedProbe::new(ProbeStatus::Success);
        let mut confirm = GatewayConfirm::new(gateway, 0, 30);
        assert_eq!(confirm.poll(&mut probe, 0), None);
        assert_eq!(confirm.poll(&mut probe, 0), Some(true));
    }
}
