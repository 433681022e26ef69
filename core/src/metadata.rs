//! Address-to-inventory-metadata cache.
//!
//! The cache is refreshed by a background task (owned by the binary crate,
//! which knows how to talk to the inventory source) and read on every
//! report from the hot-ish coordinator path. Refresh publishes a whole new
//! snapshot; readers never observe a partially updated map, and a batch of
//! reads always comes from a single generation.

use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

pub type HostAddr = u32;

/// Labels attached to an address by the inventory source. All fields are
/// optional; an address with no known metadata still gets a record with all
/// fields empty (the report then falls back to the bare IP for display).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostMetadata {
    pub instance_id: String,
    pub name: String,
    pub asg: String,
    pub owner: String,
}

impl HostMetadata {
    /// Best available label: name, else instance id, else empty (caller
    /// falls back to the dotted-quad IP).
    pub fn label(&self) -> Option<&str> {
        if !self.name.is_empty() {
            Some(&self.name)
        } else if !self.instance_id.is_empty() {
            Some(&self.instance_id)
        } else {
            None
        }
    }
}

type Snapshot = HashMap<HostAddr, HostMetadata>;

/// Snapshot-swapped cache: refresh publishes a new immutable map, readers
/// hold a cheap `Arc` clone of whichever generation was current when they
/// asked. No lock is ever taken on the read path.
pub struct MetadataCache {
    current: ArcSwap<Snapshot>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Publish a freshly built map as the new current generation.
    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Look up a single address against whichever generation is current.
    pub fn enrich(&self, addr: HostAddr) -> HostMetadata {
        self.current
            .load()
            .get(&addr)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up many addresses against a single generation snapshot — the
    /// `Arc` is loaded once, so every entry in the batch sees the same
    /// refresh generation even if a refresh completes mid-call.
    pub fn enrich_many(&self, addrs: &[HostAddr]) -> Vec<(HostAddr, HostMetadata)> {
        let snapshot = self.current.load();
        addrs
            .iter()
            .map(|addr| (*addr, snapshot.get(addr).cloned().unwrap_or_default()))
            .collect()
    }
}
