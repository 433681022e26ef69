//! Stable, flow-key-based sampling.
//!
//! Sampling decisions must be a pure function of the flow key so the same
//! flow is always sampled in or out for the life of the process — this is
//! what makes inverse scaling of sampled counters unbiased.

use crate::flow::FlowKey;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Returns true if this key should be sampled in, at the given rate.
///
/// `rate` is clamped to `[0.0001, 1.0]` by the caller (see `config`); this
/// function treats it as already-valid.
pub fn should_sample(key: &FlowKey, rate: f64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let bucket = hasher.finish() % 10_000;
    let cutoff = (rate * 10_000.0) as u64;
    bucket < cutoff
}
