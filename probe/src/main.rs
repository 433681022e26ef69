use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod config;
mod coordinator;
mod inventory;
mod notify;
mod socket;
mod telemetry;
mod worker;

use config::Config;
use coordinator::{CoordinatorConfig, NotifySinks};
use telemetry::WorkerCounters;
use vxprobe_core::metadata::MetadataCache;

const BANNER: &str = r#"
  __   ___  ____  ____  ___  ____  ____
 ( (` / __)( ___)(  _ \/ __)(_  _)(  __)
  )  )\__ \ )__)  )___/\__ \  )(   )__)
 (__/ (___/(____)(__)  (___/ (__) (____)
"#;

/// How long to wait for worker threads to observe `stop` and exit before
/// giving up on a clean join. OS threads can't be force-terminated, so a
/// worker that hangs past this just keeps running detached; we log it
/// rather than block shutdown forever.
const WORKER_JOIN_GRACE: Duration = Duration::from_secs(3);

/// VXLAN-mirrored traffic probe: per-flow capture, top-N reporting, tiered alerting.
#[derive(Parser, Debug)]
#[command(name = "vxprobe", version, about)]
struct Cli {
    /// Override PROBE_WORKERS.
    #[arg(long)]
    workers: Option<usize>,

    /// Override PROBE_SAMPLE_RATE.
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Override LOG_LEVEL.
    #[arg(long)]
    log_level: Option<String>,

    /// Print the resolved configuration (secrets redacted) and exit.
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env();
    cfg.apply_overrides(cli.workers, cli.sample_rate, cli.log_level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vxprobe={}", cfg.log_level).into()),
        )
        .init();

    if cli.print_config {
        println!("{}", cfg.redacted_json());
        return Ok(());
    }

    println!("{BANNER}");
    info!(version = env!("CARGO_PKG_VERSION"), workers = cfg.workers, "starting vxprobe");

    let cache = Arc::new(MetadataCache::new());
    let (inventory_stop_tx, inventory_stop_rx) = tokio::sync::watch::channel(false);

    if cfg.vpc_id.is_some() || cfg.aws_region.is_some() {
        let aws_cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let ec2_client = aws_sdk_ec2::Client::new(&aws_cfg);
        info!("performing initial inventory refresh");
        inventory::initial_refresh(&ec2_client, cfg.vpc_id.as_deref(), &cache).await;

        let vpc_id = cfg.vpc_id.clone();
        let cache_for_loop = cache.clone();
        tokio::spawn(inventory::run_loop(ec2_client, vpc_id, cache_for_loop, inventory_stop_rx));
    } else {
        info!("no VPC_ID/AWS_REGION configured, metadata enrichment disabled");
    }

    let sns_client = if cfg.sns_topic_arn.is_some() {
        let aws_cfg = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Some(aws_sdk_sns::Client::new(&aws_cfg))
    } else {
        None
    };
    let sinks = NotifySinks {
        sns_client,
        sns_topic_arn: cfg.sns_topic_arn.clone(),
        slack_webhook_url: cfg.slack_webhook_url.clone(),
    };

    let stop = Arc::new(AtomicBool::new(false));
    let mut receivers = Vec::with_capacity(cfg.workers);
    let mut worker_counters = Vec::with_capacity(cfg.workers);
    let mut handles = Vec::with_capacity(cfg.workers);

    for id in 0..cfg.workers {
        let (tx, rx) = crossbeam_channel::bounded(64);
        let counters = WorkerCounters::shared();
        receivers.push(rx);
        worker_counters.push(counters.clone());

        let worker_stop = stop.clone();
        let sample_rate = cfg.sample_rate;
        handles.push(std::thread::spawn(move || {
            worker::run(
                worker::WorkerConfig { id, sample_rate },
                tx,
                counters,
                worker_stop,
            );
        }));
    }

    let coordinator_stop = stop.clone();
    let coordinator_config = CoordinatorConfig {
        sample_rate: cfg.sample_rate,
        thresholds: cfg.into_alert_thresholds(),
    };
    let coordinator_handle = tokio::spawn(coordinator::run(
        coordinator_config,
        receivers,
        worker_counters,
        cache,
        sinks,
        coordinator_stop,
    ));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping workers");
    stop.store(true, Ordering::Relaxed);
    let _ = inventory_stop_tx.send(true);

    join_workers_with_grace(handles, WORKER_JOIN_GRACE).await;
    let _ = coordinator_handle.await;

    info!("vxprobe stopped");
    Ok(())
}

/// Joins worker threads with a hard deadline. Each `JoinHandle::join` is
/// blocking, so it's driven on a blocking-pool task; any thread still
/// outstanding when `grace` elapses is left running detached and logged,
/// since a plain OS thread has no safe way to be force-terminated.
async fn join_workers_with_grace(
    handles: Vec<std::thread::JoinHandle<()>>,
    grace: Duration,
) {
    let mut joins = tokio::task::JoinSet::new();
    for handle in handles {
        joins.spawn_blocking(move || handle.join());
    }

    let deadline = tokio::time::sleep(grace);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                if !joins.is_empty() {
                    tracing::warn!(
                        remaining = joins.len(),
                        "worker threads still running past shutdown grace period, leaving them detached"
                    );
                }
                break;
            }
            result = joins.join_next() => {
                match result {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(_))) => tracing::error!("a worker thread panicked during shutdown"),
                    Some(Err(e)) => tracing::error!(error = %e, "failed to join worker thread task"),
                    None => break,
                }
            }
        }
    }
}

/// Only the coordinator (this task) installs signal handlers; worker
/// threads never see OS signals directly and only observe the shared
/// `stop` flag. See the process-architecture note on why this crate uses
/// threads rather than one OS process per worker.
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
