//! One worker per logical core: owns a REUSEPORT socket and a bounded flow
//! table, flushes periodically onto its private channel to the
//! coordinator. Runs as a plain OS thread — see the module docs on
//! process architecture in `main` for why threads, not processes.

use crate::socket::{bind_reuseport, VXLAN_PORT};
use crate::telemetry::WorkerCounters;
use crossbeam_channel::Sender;
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use vxprobe_core::flow::{FlowCounters, FlowKey};
use vxprobe_core::parser::parse_vxlan_packet;
use vxprobe_core::sampling::should_sample;
use vxprobe_core::table::{FlowTable, DEFAULT_CAPACITY};

const CAP_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const QUEUE_PUT_TIMEOUT: Duration = Duration::from_millis(500);
const RECV_BUF_LEN: usize = 65536;

pub type Snapshot = Vec<(FlowKey, FlowCounters)>;

pub struct WorkerConfig {
    pub id: usize,
    pub sample_rate: f64,
}

/// Blocking worker loop. Exits when `stop` is observed set, after a final
/// flush so in-flight accounting isn't lost on shutdown.
pub fn run(
    config: WorkerConfig,
    tx: Sender<Snapshot>,
    counters: Arc<WorkerCounters>,
    stop: Arc<AtomicBool>,
) {
    let socket = match bind_reuseport(&format!("0.0.0.0:{VXLAN_PORT}")) {
        Ok(s) => s,
        Err(e) => {
            error!(worker = config.id, error = %e, "failed to bind worker socket");
            return;
        }
    };

    let mut table = FlowTable::new(DEFAULT_CAPACITY);
    let mut buf = [0u8; RECV_BUF_LEN];
    let mut last_flush = Instant::now();

    info!(worker = config.id, "worker started");

    while !stop.load(Ordering::Relaxed) {
        match recv_one(&socket, &mut buf) {
            Some(len) => handle_datagram(&buf[..len], config.sample_rate, &mut table),
            None => {}
        }

        if last_flush.elapsed() >= CAP_FLUSH_INTERVAL {
            flush_and_send(&mut table, &tx, &counters, config.id);
            last_flush = Instant::now();
        }
    }

    flush_and_send(&mut table, &tx, &counters, config.id);
    info!(worker = config.id, "worker stopped");
}

fn recv_one(socket: &UdpSocket, buf: &mut [u8]) -> Option<usize> {
    match socket.recv_from(buf) {
        Ok((len, _)) => Some(len),
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => None,
        Err(e) => {
            debug!(error = %e, "worker recv error");
            None
        }
    }
}

fn handle_datagram(data: &[u8], sample_rate: f64, table: &mut FlowTable) {
    let Some(parsed) = parse_vxlan_packet(data) else {
        return;
    };
    if sample_rate < 1.0 && !should_sample(&parsed.key, sample_rate) {
        return;
    }
    table.record(parsed.key, parsed.len);
}

fn flush_and_send(
    table: &mut FlowTable,
    tx: &Sender<Snapshot>,
    counters: &Arc<WorkerCounters>,
    worker_id: usize,
) {
    if table.table_full_drops > 0 || table.probe_failures > 0 {
        counters.add_table_full(table.table_full_drops);
        counters.add_probe_failures(table.probe_failures);
        table.table_full_drops = 0;
        table.probe_failures = 0;
    }

    let snapshot = table.flush();
    if snapshot.is_empty() {
        return;
    }
    if tx.send_timeout(snapshot, QUEUE_PUT_TIMEOUT).is_err() {
        counters.add_queue_full();
        debug!(worker = worker_id, "snapshot queue full, dropping flush");
    }
}
