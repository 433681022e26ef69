//! Coordinator-side merge of worker flow snapshots over one report window.

use crate::flow::{FlowCounters, FlowKey};
use std::collections::HashMap;

/// Accumulates flow counters across snapshots delivered during a report
/// window. Merging is associative and commutative, so snapshot arrival
/// order across workers never affects the result.
#[derive(Debug, Default)]
pub struct Accumulator {
    flows: HashMap<FlowKey, FlowCounters>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one worker's flushed snapshot into the accumulator.
    pub fn merge_snapshot(&mut self, snapshot: &[(FlowKey, FlowCounters)]) {
        for (key, counters) in snapshot {
            self.flows.entry(*key).or_default().merge(counters);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlowKey, &FlowCounters)> {
        self.flows.iter()
    }

    pub fn totals(&self) -> FlowCounters {
        let mut total = FlowCounters::default();
        for counters in self.flows.values() {
            total.merge(counters);
        }
        total
    }

    /// Reset for the next report window.
    pub fn reset(&mut self) {
        self.flows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> FlowKey {
        FlowKey::new(n, n + 1, 6, 1, 2)
    }

    #[test]
    fn merge_is_associative_and_commutative() {
        let snap_a = vec![(key(1), FlowCounters { packets: 1, bytes: 100 })];
        let snap_b = vec![(key(1), FlowCounters { packets: 2, bytes: 200 })];
        let snap_c = vec![(key(2), FlowCounters { packets: 3, bytes: 300 })];

        let mut acc1 = Accumulator::new();
        acc1.merge_snapshot(&snap_a);
        acc1.merge_snapshot(&snap_b);
        acc1.merge_snapshot(&snap_c);

        let mut acc2 = Accumulator::new();
        acc2.merge_snapshot(&snap_c);
        acc2.merge_snapshot(&snap_b);
        acc2.merge_snapshot(&snap_a);

        assert_eq!(acc1.totals(), acc2.totals());
        assert_eq!(acc1.flow_count(), acc2.flow_count());
    }

    #[test]
    fn reset_clears_all_flows() {
        let mut acc = Accumulator::new();
        acc.merge_snapshot(&[(key(1), FlowCounters { packets: 1, bytes: 1 })]);
        acc.reset();
        assert!(acc.is_empty());
    }
}
