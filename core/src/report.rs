//! Turns an accumulated report window into top-N summaries.

use crate::accumulator::Accumulator;
use crate::flow::{ip_to_string, FlowCounters, FlowKey};
use crate::metadata::{HostAddr, HostMetadata};
use std::collections::HashMap;

const TOP_N: usize = 10;

/// Per-address traffic total, used for both top-source/top-dest reporting
/// and per-host alert evaluation.
pub type HostAgg = HashMap<HostAddr, FlowCounters>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopFlowEntry {
    pub key: FlowKey,
    pub counters: FlowCounters,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopHostEntry {
    pub addr: HostAddr,
    pub counters: FlowCounters,
    pub metadata: HostMetadata,
}

impl TopHostEntry {
    /// Display label: enrichment name/instance id, else the bare IP.
    pub fn display_label(&self) -> String {
        self.metadata
            .label()
            .map(str::to_string)
            .unwrap_or_else(|| ip_to_string(self.addr))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub window_secs: f64,
    pub flow_count: usize,
    pub totals: FlowCounters,
    pub top_flows: Vec<TopFlowEntry>,
    pub top_sources: Vec<TopHostEntry>,
    pub top_dests: Vec<TopHostEntry>,
}

/// Scale factor applied to counters when flows were sampled in at `rate`.
pub fn inverse_scale(rate: f64) -> f64 {
    if rate <= 0.0 || rate >= 1.0 {
        1.0
    } else {
        1.0 / rate
    }
}

fn scale_counters(counters: FlowCounters, scale: f64) -> FlowCounters {
    if scale == 1.0 {
        return counters;
    }
    FlowCounters {
        packets: (counters.packets as f64 * scale).round() as u64,
        bytes: (counters.bytes as f64 * scale).round() as u64,
    }
}

/// Aggregate accumulated flows by source and destination address, applying
/// inverse sampling scale. Returns `(src_agg, dst_agg)`.
pub fn aggregate_by_host(acc: &Accumulator, sample_rate: f64) -> (HostAgg, HostAgg) {
    let scale = inverse_scale(sample_rate);
    let mut src_agg: HostAgg = HashMap::new();
    let mut dst_agg: HostAgg = HashMap::new();
    for (key, counters) in acc.iter() {
        let scaled = scale_counters(*counters, scale);
        src_agg.entry(key.src_ip).or_default().merge(&scaled);
        dst_agg.entry(key.dst_ip).or_default().merge(&scaled);
    }
    (src_agg, dst_agg)
}

fn top_n_flows(acc: &Accumulator, scale: f64) -> Vec<TopFlowEntry> {
    let mut flows: Vec<TopFlowEntry> = acc
        .iter()
        .map(|(key, counters)| TopFlowEntry {
            key: *key,
            counters: scale_counters(*counters, scale),
        })
        .collect();
    flows.sort_by(|a, b| {
        b.counters
            .bytes
            .cmp(&a.counters.bytes)
            .then_with(|| flow_key_order(&a.key).cmp(&flow_key_order(&b.key)))
    });
    flows.truncate(TOP_N);
    flows
}

fn flow_key_order(key: &FlowKey) -> (u32, u32, u8, u16, u16) {
    (key.src_ip, key.dst_ip, key.proto, key.src_port, key.dst_port)
}

fn top_n_hosts(agg: &HostAgg, enriched: &HashMap<HostAddr, HostMetadata>) -> Vec<TopHostEntry> {
    let mut hosts: Vec<TopHostEntry> = agg
        .iter()
        .map(|(addr, counters)| TopHostEntry {
            addr: *addr,
            counters: *counters,
            metadata: enriched.get(addr).cloned().unwrap_or_default(),
        })
        .collect();
    hosts.sort_by(|a, b| b.counters.bytes.cmp(&a.counters.bytes).then_with(|| a.addr.cmp(&b.addr)));
    hosts.truncate(TOP_N);
    hosts
}

/// Build the full report for one window. `enriched` must already contain
/// metadata for (at least) every address appearing in `src_agg`/`dst_agg` —
/// the caller is expected to have batch-enriched their union beforehand, so
/// the whole report reads from a single cache generation.
pub fn build_report(
    acc: &Accumulator,
    sample_rate: f64,
    window_secs: f64,
    src_agg: &HostAgg,
    dst_agg: &HostAgg,
    enriched: &HashMap<HostAddr, HostMetadata>,
) -> Report {
    let scale = inverse_scale(sample_rate);
    let totals = scale_counters(acc.totals(), scale);
    Report {
        window_secs,
        flow_count: acc.flow_count(),
        totals,
        top_flows: top_n_flows(acc, scale),
        top_sources: top_n_hosts(src_agg, enriched),
        top_dests: top_n_hosts(dst_agg, enriched),
    }
}

/// Addresses that should be looked up together as one enrichment batch.
pub fn union_addresses(src_agg: &HostAgg, dst_agg: &HostAgg) -> Vec<HostAddr> {
    let mut set: std::collections::HashSet<HostAddr> = src_agg.keys().copied().collect();
    set.extend(dst_agg.keys().copied());
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(src: u32, dst: u32) -> FlowKey {
        FlowKey::new(src, dst, 6, 1000, 443)
    }

    #[test]
    fn tcp_round_trip_single_flow() {
        let mut acc = Accumulator::new();
        let src = u32::from_be_bytes([10, 0, 1, 100]);
        let dst = u32::from_be_bytes([10, 0, 2, 200]);
        acc.merge_snapshot(&[(
            FlowKey::new(src, dst, 6, 55555, 443),
            FlowCounters { packets: 1, bytes: 60 },
        )]);

        let (src_agg, dst_agg) = aggregate_by_host(&acc, 1.0);
        let report = build_report(&acc, 1.0, 5.0, &src_agg, &dst_agg, &HashMap::new());
        assert_eq!(report.flow_count, 1);
        assert_eq!(report.totals, FlowCounters { packets: 1, bytes: 60 });
        assert_eq!(report.top_flows[0].counters.bytes, 60);
    }

    #[test]
    fn sampling_scale_is_applied_to_totals() {
        let mut acc = Accumulator::new();
        for i in 0..1000u32 {
            acc.merge_snapshot(&[(key(i, i + 1), FlowCounters { packets: 1, bytes: 1000 })]);
        }
        let (src_agg, dst_agg) = aggregate_by_host(&acc, 0.5);
        let report = build_report(&acc, 0.5, 5.0, &src_agg, &dst_agg, &HashMap::new());
        assert_eq!(report.totals.packets, 2000);
        assert_eq!(report.totals.bytes, 2_000_000);
    }

    #[test]
    fn top_flows_sorted_descending_by_bytes() {
        let mut acc = Accumulator::new();
        acc.merge_snapshot(&[
            (key(1, 2), FlowCounters { packets: 1, bytes: 50 }),
            (key(3, 4), FlowCounters { packets: 1, bytes: 500 }),
            (key(5, 6), FlowCounters { packets: 1, bytes: 200 }),
        ]);
        let top = top_n_flows(&acc, 1.0);
        assert_eq!(top[0].counters.bytes, 500);
        assert_eq!(top[1].counters.bytes, 200);
        assert_eq!(top[2].counters.bytes, 50);
    }

    #[test]
    fn display_label_falls_back_to_ip() {
        let entry = TopHostEntry {
            addr: u32::from_be_bytes([10, 0, 0, 1]),
            counters: FlowCounters::default(),
            metadata: HostMetadata::default(),
        };
        assert_eq!(entry.display_label(), "10.0.0.1");
    }
}
