mod probe;
mod sinks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use spotwash_sync::{
    ActionReplayQueue, ArbiterWorker, CacheArbiter, ConnectivityMonitor, PageLocation,
    RefreshAction, RefreshSchedule, RequestGateway, ReqwestTransport, SyncConfig,
    SyncCoordinator, TracingNotifier,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::probe::HealthProbe;
use crate::sinks::{LogOrderSink, LogStatsSink, QueueReloader};

/// Flags override the SPOTWASH_* environment.
#[derive(Parser, Debug)]
#[command(name = "spotwash-agent", about = "Keep a dashboard view of the car wash in sync")]
struct Args {
    /// API host, e.g. https://wash.example.com
    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    cache_version: Option<String>,

    #[arg(long)]
    refresh_interval_ms: Option<u64>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Page the agent presents; `/queue` switches to whole-page reloads.
    #[arg(long, default_value = "/dashboard")]
    page: String,

    /// Poll this order's detail alongside the page refresh.
    #[arg(long)]
    watch_order: Option<u64>,

    #[arg(long, default_value_t = 5_000)]
    probe_interval_ms: u64,
}

impl Args {
    fn apply(&self, config: &mut SyncConfig) -> Result<()> {
        if let Some(raw) = &self.api_base_url {
            config.api_base_url =
                Url::parse(raw).with_context(|| format!("parse --api-base-url {raw}"))?;
        }
        if let Some(version) = &self.cache_version {
            config.cache_version = version.clone();
        }
        if let Some(interval) = self.refresh_interval_ms {
            config.refresh_interval = Duration::from_millis(interval.max(1));
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SyncConfig::from_env().context("load SPOTWASH_* configuration")?;
    args.apply(&mut config)?;
    info!(api = %config.api_base_url, cache_version = %config.cache_version, "starting agent");

    let transport = Arc::new(ReqwestTransport::new(config.request_timeout));
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let worker = ArbiterWorker::spawn(
        CacheArbiter::new(config.arbiter_config(), Arc::clone(&transport)),
        control_tx,
    );
    match worker.install().await {
        Ok(report) => info!(precached = report.precached, "static shell cached"),
        Err(error) => warn!(error = %error, "starting without a cached shell"),
    }
    let activated = worker.activate().await.context("activate cache worker")?;
    if !activated.deleted.is_empty() {
        info!(deleted = ?activated.deleted, "retired old caches");
    }

    let monitor = ConnectivityMonitor::default();
    let gateway = Arc::new(
        RequestGateway::new(config.gateway_config(), worker.clone(), monitor.subscribe())
            .context("build request gateway")?,
    );
    let coordinator = SyncCoordinator::new(
        monitor,
        Arc::clone(&gateway),
        Arc::new(ActionReplayQueue::new(config.poison_threshold)),
        PageLocation::new(args.page.clone()),
        Arc::new(TracingNotifier),
    );

    if args.page.starts_with("/queue") {
        coordinator.start_live_refresh(
            RefreshSchedule::queue_page(config.queue_reload_interval),
            RefreshAction::Reload(Arc::new(QueueReloader::new(Arc::clone(&gateway)))),
        );
    } else {
        coordinator.start_live_refresh(
            RefreshSchedule::dashboard(config.refresh_interval),
            RefreshAction::FetchStats {
                source: gateway.clone(),
                sink: Arc::new(LogStatsSink),
            },
        );
    }
    let _order_poller = args
        .watch_order
        .map(|order_id| coordinator.watch_order(order_id, config.order_poll_delay, Arc::new(LogOrderSink)));

    let health_url = config
        .api_base_url
        .join("/api/health")
        .context("build health probe url")?;
    let (signal_tx, signal_rx) = mpsc::channel(16);
    let probe = HealthProbe::spawn(
        transport,
        health_url,
        Duration::from_millis(args.probe_interval_ms),
        signal_tx,
    );

    tokio::select! {
        () = coordinator.run(signal_rx, control_rx) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("listen for ctrl-c")?;
            info!("shutting down");
        }
    }
    probe.abort();

    let pending = coordinator.queue().len();
    if pending > 0 {
        warn!(pending, "exiting with unsent actions; they are not persisted");
    }
    Ok(())
}
