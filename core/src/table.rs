//! Bounded, fixed-capacity flow table with open addressing.
//!
//! One table per worker. Capacity is fixed at construction so a worker's
//! memory footprint is bounded regardless of how many distinct flows a
//! hostile or misconfigured sender throws at it; once full, new flows are
//! dropped and counted rather than evicting existing ones.

use crate::flow::{FlowCounters, FlowKey};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Suggested default capacity (2^16 entries) for a single worker's table.
pub const DEFAULT_CAPACITY: usize = 1 << 16;

/// Maximum linear-probe chain length before giving up on an insert and
/// counting it as a probe failure (distinct from a full-table drop).
const MAX_PROBE_LEN: usize = 64;

#[derive(Clone, Copy)]
enum Slot {
    Empty,
    Occupied(FlowKey, FlowCounters),
}

/// A single worker's open-addressed flow table.
pub struct FlowTable {
    slots: Vec<Slot>,
    capacity: usize,
    len: usize,
    pub table_full_drops: u64,
    pub probe_failures: u64,
}

impl FlowTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![Slot::Empty; capacity.next_power_of_two()],
            capacity,
            len: 0,
            table_full_drops: 0,
            probe_failures: 0,
        }
    }

    fn index_for(&self, key: &FlowKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) & (self.slots.len() - 1)
    }

    /// Record one packet of `len` bytes for `key`. Drops silently (counted)
    /// if the table is full and `key` is not already present.
    pub fn record(&mut self, key: FlowKey, len: u32) {
        let start = self.index_for(&key);
        let mask = self.slots.len() - 1;
        let probe_limit = MAX_PROBE_LEN.min(self.slots.len());

        for step in 0..probe_limit {
            let idx = (start + step) & mask;
            match &mut self.slots[idx] {
                Slot::Occupied(existing, counters) if *existing == key => {
                    counters.record(len);
                    return;
                }
                Slot::Empty => {
                    if self.len >= self.capacity {
                        self.table_full_drops += 1;
                        return;
                    }
                    let mut counters = FlowCounters::default();
                    counters.record(len);
                    self.slots[idx] = Slot::Occupied(key, counters);
                    self.len += 1;
                    return;
                }
                Slot::Occupied(_, _) => continue,
            }
        }
        self.probe_failures += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshot all live entries and reset the table for the next epoch.
    /// Drop counters are preserved across flushes (they're lifetime totals).
    pub fn flush(&mut self) -> Vec<(FlowKey, FlowCounters)> {
        let mut out = Vec::with_capacity(self.len);
        for slot in self.slots.iter_mut() {
            if let Slot::Occupied(key, counters) = *slot {
                out.push((key, counters));
            }
            *slot = Slot::Empty;
        }
        self.len = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> FlowKey {
        FlowKey::new(n, n.wrapping_add(1), 6, 1000, 2000)
    }

    #[test]
    fn records_and_flushes_single_flow() {
        let mut table = FlowTable::new(16);
        table.record(key(1), 100);
        table.record(key(1), 50);
        assert_eq!(table.len(), 1);
        let snap = table.flush();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].1.packets, 2);
        assert_eq!(snap[0].1.bytes, 150);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn table_full_drops_beyond_capacity() {
        let mut table = FlowTable::new(4);
        for i in 0..4 {
            table.record(key(i), 10);
        }
        assert_eq!(table.table_full_drops, 0);
        table.record(key(999), 10);
        assert_eq!(table.table_full_drops, 1);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn flush_is_reusable_immediately() {
        let mut table = FlowTable::new(4);
        table.record(key(1), 10);
        table.flush();
        table.record(key(2), 20);
        let snap = table.flush();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].0, key(2));
    }
}
