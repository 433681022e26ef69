//! Drop counters shared between worker threads and the coordinator, plus
//! the kernel-level UDP drop reading used to detect socket-buffer overrun.

use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One set of counters per worker, aggregated by the coordinator each
/// report window. `Relaxed` ordering is sufficient — these are independent
/// monotonic tallies, not synchronization points.
#[derive(Default)]
pub struct WorkerCounters {
    pub table_full_drops: AtomicU64,
    pub probe_failures: AtomicU64,
    pub queue_full_drops: AtomicU64,
}

impl WorkerCounters {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_table_full(&self, n: u64) {
        self.table_full_drops.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_probe_failures(&self, n: u64) {
        self.probe_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_queue_full(&self) {
        self.queue_full_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.table_full_drops.load(Ordering::Relaxed),
            self.probe_failures.load(Ordering::Relaxed),
            self.queue_full_drops.load(Ordering::Relaxed),
        )
    }
}

/// Sum of the 12th column (`drops`) across every row of `/proc/net/udp`.
/// Returns 0 on non-Linux or if the file can't be read — this is a
/// best-effort telemetry signal, never a hard dependency.
pub fn read_kernel_udp_drops() -> u64 {
    let contents = match fs::read_to_string("/proc/net/udp") {
        Ok(c) => c,
        Err(_) => return 0,
    };
    parse_udp_drops(&contents)
}

fn parse_udp_drops(contents: &str) -> u64 {
    contents
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(12))
        .filter_map(|v| v.parse::<u64>().ok())
        .sum()
}
