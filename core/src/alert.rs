//! Two-tier alert state machine: a fast rate-only trigger, a deferred
//! detail follow-up with full top-N context, and independent per-host
//! triggers. Pure decision logic — no IO. The caller (coordinator) is
//! responsible for actually sending whatever `Alert`s come back.

use crate::metadata::{HostAddr, HostMetadata};
use crate::report::{HostAgg, TopFlowEntry, TopHostEntry};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Fast,
    Detail,
    Host,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub subject: String,
    pub message: String,
    pub host: Option<HostAddr>,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub bps: f64,
    pub pps: f64,
    pub host_bps: f64,
    pub host_pps: f64,
    pub cooldown_sec: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            bps: 1e9,
            pps: 1e6,
            host_bps: 0.0,
            host_pps: 0.0,
            cooldown_sec: 300.0,
        }
    }
}

/// Owns the mutable alert state. Single-writer, held exclusively by the
/// coordinator.
pub struct AlertEngine {
    thresholds: Thresholds,
    last_global_alert_ts: f64,
    pending_detail_flag: bool,
    per_host_last_ts: HashMap<HostAddr, f64>,
}

impl AlertEngine {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            last_global_alert_ts: f64::NEG_INFINITY,
            pending_detail_flag: false,
            per_host_last_ts: HashMap::new(),
        }
    }

    fn breached(&self, bps: f64, pps: f64) -> bool {
        bps > self.thresholds.bps || pps > self.thresholds.pps
    }

    fn cooldown_elapsed(&self, now: f64) -> bool {
        now - self.last_global_alert_ts >= self.thresholds.cooldown_sec
    }

    /// Sub-second rate check. Fires a `[FAST]` alert at most once per
    /// cooldown window and arms `pending_detail_flag` so the next detail
    /// check, if it also breaches, can bypass the cooldown.
    pub fn check_fast(&mut self, bytes: u64, pkts: u64, interval: f64, now: f64) -> Option<Alert> {
        if interval <= 0.0 {
            return None;
        }
        let bps = bytes as f64 / interval;
        let pps = pkts as f64 / interval;
        if !self.breached(bps, pps) {
            return None;
        }
        if !self.cooldown_elapsed(now) {
            return None;
        }
        self.last_global_alert_ts = now;
        self.pending_detail_flag = true;
        Some(Alert {
            kind: AlertKind::Fast,
            subject: "Traffic spike detected".to_string(),
            message: format!(
                "[FAST] rate spike: {} ({})",
                bps_to_human(bps),
                pps_to_human(pps)
            ),
            host: None,
        })
    }

    /// Full-context check, run once per report window. If a fast alert is
    /// pending and the breach persists, emits `[DETAIL]` and bypasses the
    /// cooldown (a fast alert is always followed by its context). If no
    /// fast alert is pending, behaves as a standalone alert gated by the
    /// normal cooldown. If the breach cleared, silently resets the flag.
    pub fn check_detail(
        &mut self,
        bytes: u64,
        pkts: u64,
        interval: f64,
        top_sources: &[TopHostEntry],
        top_dests: &[TopHostEntry],
        top_flows: &[TopFlowEntry],
        now: f64,
    ) -> Option<Alert> {
        if interval <= 0.0 {
            self.pending_detail_flag = false;
            return None;
        }
        let bps = bytes as f64 / interval;
        let pps = pkts as f64 / interval;
        let breached = self.breached(bps, pps);

        if self.pending_detail_flag && breached {
            self.pending_detail_flag = false;
            return Some(self.format_detail(bps, pps, top_sources, top_dests, top_flows));
        }
        if self.pending_detail_flag && !breached {
            self.pending_detail_flag = false;
            return None;
        }
        if breached && self.cooldown_elapsed(now) {
            self.last_global_alert_ts = now;
            return Some(self.format_detail(bps, pps, top_sources, top_dests, top_flows));
        }
        None
    }

    fn format_detail(
        &self,
        bps: f64,
        pps: f64,
        top_sources: &[TopHostEntry],
        top_dests: &[TopHostEntry],
        top_flows: &[TopFlowEntry],
    ) -> Alert {
        let mut message = format!(
            "[DETAIL] sustained rate: {} ({})\n\n",
            bps_to_human(bps),
            pps_to_human(pps)
        );
        message.push_str("Top Sources:\n");
        for entry in top_sources.iter().take(5) {
            message.push_str(&format!(
                "  {} - {}\n",
                entry.display_label(),
                bytes_to_human(entry.counters.bytes)
            ));
        }
        message.push_str("\nTop Destinations:\n");
        for entry in top_dests.iter().take(5) {
            message.push_str(&format!(
                "  {} - {}\n",
                entry.display_label(),
                bytes_to_human(entry.counters.bytes)
            ));
        }
        message.push_str("\nTop Flows:\n");
        for entry in top_flows.iter().take(5) {
            message.push_str(&format!(
                "  {}:{} -> {}:{} ({}) - {}\n",
                crate::flow::ip_to_string(entry.key.src_ip),
                entry.key.src_port,
                crate::flow::ip_to_string(entry.key.dst_ip),
                entry.key.dst_port,
                entry.key.proto,
                bytes_to_human(entry.counters.bytes)
            ));
        }
        Alert {
            kind: AlertKind::Detail,
            subject: "Traffic spike detail".to_string(),
            message,
            host: None,
        }
    }

    /// Independent per-host threshold check. Disabled entirely when both
    /// host thresholds are zero. For each address, uses whichever
    /// direction (as source or as destination) carries more bytes.
    pub fn check_host(
        &mut self,
        src_agg: &HostAgg,
        dst_agg: &HostAgg,
        interval: f64,
        enriched: &HashMap<HostAddr, HostMetadata>,
        now: f64,
    ) -> Vec<Alert> {
        if (self.thresholds.host_bps <= 0.0 && self.thresholds.host_pps <= 0.0) || interval <= 0.0
        {
            return Vec::new();
        }

        let mut addrs: std::collections::HashSet<HostAddr> = src_agg.keys().copied().collect();
        addrs.extend(dst_agg.keys().copied());

        let mut alerts = Vec::new();
        for addr in addrs {
            let src_counters = src_agg.get(&addr).copied().unwrap_or_default();
            let dst_counters = dst_agg.get(&addr).copied().unwrap_or_default();
            let (direction, counters) = if dst_counters.bytes > src_counters.bytes {
                ("dst", dst_counters)
            } else {
                ("src", src_counters)
            };

            let bps = counters.bytes as f64 / interval;
            let pps = counters.packets as f64 / interval;
            let breach_bps = self.thresholds.host_bps > 0.0 && bps > self.thresholds.host_bps;
            let breach_pps = self.thresholds.host_pps > 0.0 && pps > self.thresholds.host_pps;
            if !breach_bps && !breach_pps {
                continue;
            }

            let last = self.per_host_last_ts.get(&addr).copied().unwrap_or(f64::NEG_INFINITY);
            if now - last < self.thresholds.cooldown_sec {
                continue;
            }
            self.per_host_last_ts.insert(addr, now);

            let label = enriched
                .get(&addr)
                .and_then(|m| m.label().map(str::to_string))
                .unwrap_or_else(|| crate::flow::ip_to_string(addr));
            alerts.push(Alert {
                kind: AlertKind::Host,
                subject: format!("Host traffic spike: {label}"),
                message: format!(
                    "[HOST] {label} ({direction}): {} ({})",
                    bps_to_human(bps),
                    pps_to_human(pps)
                ),
                host: Some(addr),
            });
        }
        alerts
    }
}

/// Step through units dividing by `step` until the magnitude drops below
/// the next unit, formatted to one decimal place.
fn humanize(mut value: f64, step: f64, units: &[&str]) -> String {
    let mut idx = 0;
    while value >= step && idx < units.len() - 1 {
        value /= step;
        idx += 1;
    }
    format!("{value:.1} {}", units[idx])
}

pub fn bytes_to_human(bytes: u64) -> String {
    humanize(bytes as f64, 1024.0, &["B", "KB", "MB", "GB", "TB"])
}

pub fn bps_to_human(bps: f64) -> String {
    humanize(bps, 1000.0, &["bps", "Kbps", "Mbps", "Gbps", "Tbps"])
}

pub fn pps_to_human(pps: f64) -> String {
    humanize(pps, 1000.0, &["pps", "Kpps", "Mpps", "Gpps"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> Thresholds {
        Thresholds {
            bps: 1000.0,
            pps: 100.0,
            host_bps: 0.0,
            host_pps: 0.0,
            cooldown_sec: 300.0,
        }
    }

    #[test]
    fn fast_alert_respects_cooldown() {
        let mut engine = AlertEngine::new(thresholds());
        let first = engine.check_fast(2000, 500, 1.5, 1.5);
        assert!(first.is_some());
        let second = engine.check_fast(2000, 500, 1.0, 2.0);
        assert!(second.is_none(), "should be suppressed by cooldown");
    }

    #[test]
    fn fast_then_detail_pairing() {
        let mut engine = AlertEngine::new(thresholds());
        let fast = engine.check_fast(2000, 500, 1.5, 1.5);
        assert!(fast.is_some());

        let detail = engine.check_detail(6000, 500, 5.0, &[], &[], &[], 5.0);
        assert!(detail.is_some());
        assert!(matches!(detail.unwrap().kind, AlertKind::Detail));

        // Cooldown still active, no further alert until it elapses.
        let quiet = engine.check_fast(2000, 500, 1.0, 10.0);
        assert!(quiet.is_none());
    }

    #[test]
    fn pending_detail_clears_silently_if_breach_ends() {
        let mut engine = AlertEngine::new(thresholds());
        engine.check_fast(2000, 500, 1.5, 1.5);
        let detail = engine.check_detail(10, 1, 5.0, &[], &[], &[], 5.0);
        assert!(detail.is_none());
    }

    #[test]
    fn per_host_cooldowns_are_independent() {
        let mut engine = AlertEngine::new(Thresholds {
            host_bps: 1000.0,
            ..thresholds()
        });
        let mut src_agg = HostAgg::new();
        src_agg.insert(1, crate::flow::FlowCounters { packets: 10, bytes: 2000 });
        src_agg.insert(2, crate::flow::FlowCounters { packets: 5, bytes: 500 });
        let dst_agg = HostAgg::new();

        let alerts = engine.check_host(&src_agg, &dst_agg, 1.0, &HashMap::new(), 1.0);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].host, Some(1));

        // Host 1 is cooling down, host 2 independently breaches now.
        let mut src_agg2 = HostAgg::new();
        src_agg2.insert(1, crate::flow::FlowCounters { packets: 10, bytes: 2000 });
        src_agg2.insert(2, crate::flow::FlowCounters { packets: 10, bytes: 2000 });
        let alerts2 = engine.check_host(&src_agg2, &dst_agg, 1.0, &HashMap::new(), 2.0);
        assert_eq!(alerts2.len(), 1);
        assert_eq!(alerts2[0].host, Some(2));
    }

    #[test]
    fn host_checks_disabled_when_thresholds_zero() {
        let mut engine = AlertEngine::new(thresholds());
        let mut src_agg = HostAgg::new();
        src_agg.insert(1, crate::flow::FlowCounters { packets: 1000, bytes: 100_000_000 });
        let alerts = engine.check_host(&src_agg, &HostAgg::new(), 1.0, &HashMap::new(), 1.0);
        assert!(alerts.is_empty());
    }

    #[test]
    fn humanizers_step_units() {
        assert_eq!(bytes_to_human(512), "512.0 B");
        assert_eq!(bytes_to_human(2048), "2.0 KB");
        assert_eq!(bps_to_human(1_500_000.0), "1.5 Mbps");
    }
}
