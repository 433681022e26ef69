//! The single coordinator: drains worker snapshot queues, accumulates over
//! a report window, emits periodic top-N reports, and drives the alert
//! engine. Owns all mutable state exclusively — no locks needed.

use crate::notify;
use crate::telemetry::{read_kernel_udp_drops, WorkerCounters};
use crate::worker::Snapshot;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use vxprobe_core::accumulator::Accumulator;
use vxprobe_core::alert::{Alert, AlertEngine, Thresholds};
use vxprobe_core::metadata::MetadataCache;
use vxprobe_core::report::{aggregate_by_host, build_report, union_addresses};

const COORDINATOR_POLL: Duration = Duration::from_millis(500);
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

pub struct NotifySinks {
    pub sns_client: Option<aws_sdk_sns::Client>,
    pub sns_topic_arn: Option<String>,
    pub slack_webhook_url: Option<String>,
}

impl NotifySinks {
    async fn dispatch(&self, alert: &Alert) {
        if let (Some(client), Some(topic)) = (&self.sns_client, &self.sns_topic_arn) {
            notify::send_sns(client, topic, &alert.subject, &alert.message).await;
        }
        if let Some(url) = &self.slack_webhook_url {
            notify::send_slack(url, &alert.message).await;
        }
    }
}

pub struct CoordinatorConfig {
    pub sample_rate: f64,
    pub thresholds: Thresholds,
}

/// Runs until `stop` is set, draining queues one final time before return.
pub async fn run(
    config: CoordinatorConfig,
    receivers: Vec<Receiver<Snapshot>>,
    worker_counters: Vec<Arc<WorkerCounters>>,
    cache: Arc<MetadataCache>,
    sinks: NotifySinks,
    stop: Arc<AtomicBool>,
) {
    let mut accumulator = Accumulator::new();
    let mut engine = AlertEngine::new(config.thresholds);
    let start = Instant::now();
    let mut window_start = start;
    let mut last_kernel_drops = read_kernel_udp_drops();
    let mut last_drop_log: (u64, u64, u64) = (0, 0, 0);

    loop {
        tokio::time::sleep(COORDINATOR_POLL).await;

        let drained = drain_all(&receivers, &mut accumulator);
        let now = Instant::now();
        let elapsed_since_window = now.duration_since(window_start).as_secs_f64();

        if drained {
            let totals = accumulator.totals();
            if let Some(alert) = engine.check_fast(
                totals.bytes,
                totals.packets,
                elapsed_since_window,
                now_secs(start, now),
            ) {
                warn!(message = %alert.message, "fast alert");
                sinks.dispatch(&alert).await;
            }
        }

        if elapsed_since_window >= REPORT_INTERVAL.as_secs_f64() || stop.load(Ordering::Relaxed) {
            emit_report_and_alerts(
                &mut accumulator,
                &mut engine,
                config.sample_rate,
                elapsed_since_window,
                &cache,
                &sinks,
                now_secs(start, now),
            )
            .await;
            accumulator.reset();
            window_start = now;

            let current_drops = read_kernel_udp_drops();
            let delta = current_drops.saturating_sub(last_kernel_drops);
            if delta > 0 {
                warn!(delta, "kernel UDP socket drops this window");
            }
            last_kernel_drops = current_drops;

            let aggregated = aggregate_worker_counters(&worker_counters);
            if aggregated != last_drop_log && (aggregated.0 + aggregated.1 + aggregated.2) > 0 {
                warn!(
                    table_full_drops = aggregated.0,
                    probe_failures = aggregated.1,
                    queue_full_drops = aggregated.2,
                    "cumulative worker drop counters"
                );
            }
            last_drop_log = aggregated;
        }

        if stop.load(Ordering::Relaxed) {
            info!("coordinator stopping");
            return;
        }
    }
}

fn now_secs(start: Instant, now: Instant) -> f64 {
    now.duration_since(start).as_secs_f64()
}

fn drain_all(receivers: &[Receiver<Snapshot>], accumulator: &mut Accumulator) -> bool {
    let mut drained_any = false;
    for rx in receivers {
        while let Ok(snapshot) = rx.try_recv() {
            accumulator.merge_snapshot(&snapshot);
            drained_any = true;
        }
    }
    drained_any
}

fn aggregate_worker_counters(counters: &[Arc<WorkerCounters>]) -> (u64, u64, u64) {
    counters.iter().fold((0, 0, 0), |acc, c| {
        let (a, b, q) = c.snapshot();
        (acc.0 + a, acc.1 + b, acc.2 + q)
    })
}

async fn emit_report_and_alerts(
    accumulator: &mut Accumulator,
    engine: &mut AlertEngine,
    sample_rate: f64,
    window_secs: f64,
    cache: &MetadataCache,
    sinks: &NotifySinks,
    now: f64,
) {
    if accumulator.is_empty() {
        return;
    }
    let (src_agg, dst_agg) = aggregate_by_host(accumulator, sample_rate);
    let addrs = union_addresses(&src_agg, &dst_agg);
    let enriched: std::collections::HashMap<_, _> = cache.enrich_many(&addrs).into_iter().collect();

    let report = build_report(accumulator, sample_rate, window_secs, &src_agg, &dst_agg, &enriched);
    info!(
        flow_count = report.flow_count,
        total_packets = report.totals.packets,
        total_bytes = report.totals.bytes,
        top_sources = ?report.top_sources.iter().take(3).map(|h| (h.display_label(), h.counters.bytes)).collect::<Vec<_>>(),
        top_dests = ?report.top_dests.iter().take(3).map(|h| (h.display_label(), h.counters.bytes)).collect::<Vec<_>>(),
        "traffic report"
    );

    if let Some(alert) = engine.check_detail(
        report.totals.bytes,
        report.totals.packets,
        window_secs,
        &report.top_sources,
        &report.top_dests,
        &report.top_flows,
        now,
    ) {
        warn!(message = %alert.message, "detail alert");
        sinks.dispatch(&alert).await;
    }

    for alert in engine.check_host(&src_agg, &dst_agg, window_secs, &enriched, now) {
        warn!(message = %alert.message, "host alert");
        sinks.dispatch(&alert).await;
    }
}
