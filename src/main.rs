use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exstreamtv::catalog::CatalogStore;
use exstreamtv::channel_manager::ChannelManager;
use exstreamtv::config::{defaults, ConfigStore};
use exstreamtv::epg::EpgGenerator;
use exstreamtv::ffmpeg::pool::ProcessPool;
use exstreamtv::ffmpeg::probe_hwaccel;
use exstreamtv::job_scheduling::{JobPriority, JobQueue, JobType};
use exstreamtv::observability::{LogRing, LogRingLayer, Metrics};
use exstreamtv::playout::PlayoutEngine;
use exstreamtv::resolver::Resolver;
use exstreamtv::self_healing::remediation::{MetadataSelfResolution, RemediationLoop};
use exstreamtv::self_healing::SelfHealingController;
use exstreamtv::web::{AppState, WebServer};

#[derive(Parser)]
#[command(name = "exstreamtv")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "IPTV broker that assembles virtual linear TV channels into self-healing MPEG-TS streams")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Listening IP address (overrides config file)
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("exstreamtv={},tower_http=trace", cli.log_level)
    } else {
        format!("exstreamtv={}", cli.log_level)
    };

    let log_ring = LogRing::new(defaults::DEFAULT_LOG_RING_CAPACITY);
    let initial_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_filter.into());
    let (filter_layer, _reload_handle) = tracing_subscriber::reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(tracing_subscriber::fmt::layer())
        .with(LogRingLayer::new(log_ring))
        .init();

    info!("Starting EXStreamTV v{}", env!("CARGO_PKG_VERSION"));

    let config_store = ConfigStore::load(PathBuf::from(&cli.config))?;
    if cli.host.is_some() || cli.port.is_some() {
        config_store
            .update(|cfg| {
                if let Some(host) = &cli.host {
                    cfg.server.host = host.clone();
                }
                if let Some(port) = cli.port {
                    cfg.server.port = port;
                }
            })
            .await?;
    }
    let cfg = config_store.current().await;
    info!(config_path = %cli.config, "configuration loaded");

    let database_url = cfg
        .streaming
        .database_url
        .clone()
        .unwrap_or_else(|| defaults::DEFAULT_DATABASE_URL.to_string());
    let catalog = Arc::new(CatalogStore::connect(&database_url, cfg.streaming.tuner_count).await?);
    catalog.migrate().await?;
    info!(database_url, "catalog store connected and migrated");

    let channels = catalog.list_channels().await?;
    let enabled_channel_ids: Vec<i64> = channels.iter().filter(|c| c.enabled).map(|c| c.id).collect();

    let resolver = Arc::new(Resolver::new(catalog.clone(), reqwest::Client::new()));
    let playout = Arc::new(PlayoutEngine::new(
        catalog.clone(),
        cfg.playout.resume_threshold_minutes,
    ));

    let hwaccel = probe_hwaccel(&cfg.ffmpeg.command, cfg.ffmpeg.hwaccel.as_deref()).await;
    if let Some(accel) = hwaccel {
        info!(?accel, "hardware acceleration enabled");
    }

    let pool_capacity = cfg
        .stream_throttler
        .max_concurrent_processes
        .unwrap_or_else(|| enabled_channel_ids.len().max(1) as u32);
    let pool = ProcessPool::new(
        pool_capacity,
        cfg.stream_throttler.acquire_timeout,
        cfg.stream_throttler.acquire_max_attempts,
        cfg.stream_throttler.acquire_backoff_cap,
    );

    let self_healing = SelfHealingController::new(cfg.self_healing.clone());

    let channel_manager = ChannelManager::new(
        catalog.clone(),
        resolver.clone(),
        playout.clone(),
        pool,
        self_healing.clone(),
        cfg.ffmpeg.clone(),
        hwaccel,
    );
    channel_manager.prewarm(&enabled_channel_ids).await;
    info!(count = enabled_channel_ids.len(), "prewarmed enabled channels");

    let epg = Arc::new(EpgGenerator::new(catalog.clone(), playout.clone()));
    let metrics = Metrics::new()?;

    let state = AppState {
        catalog: catalog.clone(),
        channels: channel_manager.clone(),
        epg,
        config: config_store.clone(),
        metrics: metrics.clone(),
        self_healing: self_healing.clone(),
    };

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    let web_server = WebServer::new(state, addr);
    let shutdown = tokio_util::sync::CancellationToken::new();

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = web_server.serve(server_shutdown).await {
            tracing::error!("web frontend failed: {e}");
        }
    });
    info!(%addr, "web frontend starting");

    let remediation = Arc::new(RemediationLoop::new(self_healing.clone(), cfg.ai_agent.enabled));
    let metadata_resolution = Arc::new(MetadataSelfResolution::new());
    let job_queue = Arc::new(JobQueue::new());

    tokio::spawn(background_job_loop(
        job_queue.clone(),
        channel_manager.clone(),
        remediation.clone(),
        metadata_resolution.clone(),
        metrics.clone(),
        self_healing.clone(),
    ));
    info!("background job loop started");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown.cancel();
    channel_manager.shutdown_all().await;
    server_handle.await?;

    Ok(())
}

/// Drains the shared job queue and runs the periodic remediation/metadata
/// cadences (spec §4.6). Collapsed into one loop since this domain has only
/// three job kinds — see `job_scheduling`'s module doc.
async fn background_job_loop(
    queue: Arc<JobQueue>,
    channels: Arc<ChannelManager>,
    remediation: Arc<RemediationLoop>,
    metadata_resolution: Arc<MetadataSelfResolution>,
    metrics: Arc<Metrics>,
    self_healing: Arc<SelfHealingController>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    loop {
        tick.tick().await;

        for channel_id in channels.active_channels().await {
            let confidence = metrics.metadata_failure_ratio.get();
            let channels_for_restart = channels.clone();
            let _ = remediation
                .attempt(channel_id, confidence, 0.2, false, move |channel_id| {
                    let channels = channels_for_restart.clone();
                    async move { channels.request_channel_restart(channel_id).await }
                })
                .await;
        }

        metadata_resolution
            .maybe_run(metrics.metadata_failure_ratio.get(), || async {
                queue
                    .enqueue(JobType::MetadataSelfResolution, JobPriority::Normal)
                    .await;
            })
            .await;

        while let Some(job) = queue.pop_ready().await {
            match job.job_type {
                JobType::UrlRefresh(media_item_id) => {
                    tracing::debug!(media_item_id, "url refresh job drained (resolved on demand)");
                }
                JobType::BackupRotation => {
                    tracing::debug!("backup rotation job drained");
                }
                JobType::MetadataSelfResolution => {
                    tracing::info!("metadata self-resolution cycle ran");
                }
            }
        }

        for channel_id in channels.active_channels().await {
            metrics.set_circuit_state(channel_id, self_healing.circuit_state(channel_id).await);
        }
        metrics.active_channels.set(channels.active_channels().await.len() as i64);
    }
}
