//! The Channel Manager (spec §4.1): owns the one ffmpeg process per running
//! channel, fans its output out to however many clients are tuned in, and is
//! the only component allowed to start or stop that process.
//!
//! Grounded structurally on the teacher's `services/cyclic_buffer.rs`
//! (multi-client fanout from one upstream) and `proxy/session_tracker.rs`
//! (per-client bookkeeping, adapted into [`session_manager`]), but the
//! teacher's file-spill cyclic buffer is replaced with a plain
//! `tokio::sync::broadcast` channel: this domain's ffmpeg output is MPEG-TS
//! continuously regenerated from catalog state, not a client-seekable asset
//! worth spilling to disk.

pub mod session_manager;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::catalog::SharedCatalog;
use crate::config::FfmpegConfig;
use crate::errors::{ChannelError, ChannelResult};
use crate::ffmpeg::builder::{CommandBuilder, SourceProfile, TargetProfile};
use crate::ffmpeg::pool::{AcquirePriority, ProcessPool};
use crate::ffmpeg::process::FfmpegProcess;
use crate::ffmpeg::{probe, HwAccel};
use crate::playout::PlayoutEngine;
use crate::resolver::Resolver;
use crate::self_healing::SelfHealingController;
use crate::utils::format_memory;
use session_manager::{ChannelSessionManager, SessionGuard};

const BROADCAST_CAPACITY: usize = 256;
/// A client whose receiver falls this many chunks behind is dropped rather
/// than let it force the whole broadcast buffer to grow unbounded.
const SESSION_LAG_DISCONNECT: &str = "client fell behind and was disconnected";
const RSS_SOFT_LIMIT_BYTES: u64 = 768 * 1024 * 1024;
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub media_item_id: i64,
    pub title: String,
    pub is_filler: bool,
    pub started_at: DateTime<Utc>,
}

struct RunningChannel {
    tx: broadcast::Sender<Bytes>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    now_playing: Arc<RwLock<Option<NowPlaying>>>,
}

pub struct StreamHandle {
    pub rx: broadcast::Receiver<Bytes>,
    pub session: SessionGuard,
}

pub struct ChannelManager {
    catalog: SharedCatalog,
    resolver: Arc<Resolver>,
    playout: Arc<PlayoutEngine>,
    pool: ProcessPool,
    self_healing: Arc<SelfHealingController>,
    ffmpeg_config: FfmpegConfig,
    hwaccel: Option<HwAccel>,
    sessions: Arc<ChannelSessionManager>,
    running: RwLock<HashMap<i64, RunningChannel>>,
}

impl ChannelManager {
    pub fn new(
        catalog: SharedCatalog,
        resolver: Arc<Resolver>,
        playout: Arc<PlayoutEngine>,
        pool: ProcessPool,
        self_healing: Arc<SelfHealingController>,
        ffmpeg_config: FfmpegConfig,
        hwaccel: Option<HwAccel>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            resolver,
            playout,
            pool,
            self_healing,
            ffmpeg_config,
            hwaccel,
            sessions: ChannelSessionManager::new(),
            running: RwLock::new(HashMap::new()),
        })
    }

    pub async fn active_channels(&self) -> Vec<i64> {
        self.running.read().await.keys().copied().collect()
    }

    pub async fn now_playing(&self, channel_id: i64) -> ChannelResult<NowPlaying> {
        let running = self.running.read().await;
        let entry = running.get(&channel_id).ok_or(ChannelError::NotRunning(channel_id))?;
        entry
            .now_playing
            .read()
            .await
            .clone()
            .ok_or(ChannelError::NotRunning(channel_id))
    }

    /// Start channels ahead of a client tuning in, so the first real request
    /// doesn't pay ffmpeg spin-up latency. Runs at background priority.
    pub async fn prewarm(self: &Arc<Self>, channel_ids: &[i64]) {
        for &id in channel_ids {
            if self.running.read().await.contains_key(&id) {
                continue;
            }
            if let Err(e) = self.start_channel(id, AcquirePriority::Background).await {
                warn!(channel_id = id, error = %e, "prewarm failed to start channel");
            }
        }
    }

    /// Subscribe a client to a channel's stream, lazily starting it at
    /// interactive priority if it isn't already running.
    pub async fn get_stream(self: &Arc<Self>, channel_id: i64, client_addr: String) -> ChannelResult<StreamHandle> {
        if !self.running.read().await.contains_key(&channel_id) {
            self.start_channel(channel_id, AcquirePriority::Interactive).await?;
        }
        let running = self.running.read().await;
        let entry = running.get(&channel_id).ok_or(ChannelError::NotRunning(channel_id))?;
        let rx = entry.tx.subscribe();
        let session = self.sessions.register(channel_id, client_addr).await;
        Ok(StreamHandle { rx, session })
    }

    /// The only entry point permitted to stop and restart a channel's
    /// process, funneled through the self-healing controller's admission
    /// check (circuit breaker, storm throttle, containment mode).
    pub async fn request_channel_restart(self: &Arc<Self>, channel_id: i64) -> ChannelResult<()> {
        self.self_healing.admit_restart(channel_id).await?;
        self.stop_channel(channel_id).await;
        let result = self.start_channel(channel_id, AcquirePriority::Interactive).await;
        self.self_healing
            .record_restart_outcome(channel_id, result.is_ok())
            .await;
        result
    }

    async fn start_channel(self: &Arc<Self>, channel_id: i64, priority: AcquirePriority) -> ChannelResult<()> {
        {
            let running = self.running.read().await;
            if running.contains_key(&channel_id) {
                return Err(ChannelError::AlreadyRunning(channel_id));
            }
        }

        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
        let cancel = CancellationToken::new();
        let now_playing = Arc::new(RwLock::new(None));

        let manager = self.clone();
        let loop_cancel = cancel.clone();
        let loop_tx = tx.clone();
        let loop_now_playing = now_playing.clone();
        let handle = tokio::spawn(async move {
            manager
                .run_channel_loop(channel_id, priority, loop_cancel, loop_tx, loop_now_playing)
                .await;
        });

        self.running.write().await.insert(
            channel_id,
            RunningChannel {
                tx,
                cancel,
                handle,
                now_playing,
            },
        );
        info!(channel_id, "channel started");
        Ok(())
    }

    async fn stop_channel(&self, channel_id: i64) {
        let entry = self.running.write().await.remove(&channel_id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            let _ = entry.handle.await;
            info!(channel_id, "channel stopped");
        }
    }

    /// Stop every running channel, draining clients cleanly. Called during
    /// shutdown.
    pub async fn shutdown_all(&self) {
        let ids: Vec<i64> = self.running.read().await.keys().copied().collect();
        for id in ids {
            self.stop_channel(id).await;
        }
    }

    /// One running channel's supervisory loop: resolve the next item, decide
    /// the pipeline, run ffmpeg, fan its stdout out to subscribers, and on
    /// exit classify success/failure before moving to the next item. Runs
    /// until `cancel` fires.
    async fn run_channel_loop(
        self: Arc<Self>,
        channel_id: i64,
        priority: AcquirePriority,
        cancel: CancellationToken,
        tx: broadcast::Sender<Bytes>,
        now_playing: Arc<RwLock<Option<NowPlaying>>>,
    ) {
        let mut consecutive_item_failures = 0u32;

        while !cancel.is_cancelled() {
            let channel = match self.catalog.get_channel(channel_id).await {
                Ok(c) => c,
                Err(e) => {
                    error!(channel_id, error = %e, "failed to load channel row, retrying");
                    if sleep_or_cancelled(&cancel, Duration::from_secs(5)).await {
                        break;
                    }
                    continue;
                }
            };

            let next = match self.playout.next_item(&channel, Utc::now()).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(channel_id, error = %e, "no playable item, retrying shortly");
                    if sleep_or_cancelled(&cancel, Duration::from_secs(5)).await {
                        break;
                    }
                    continue;
                }
            };

            let (resolved_url, _meta) = match self.resolver.resolve(&next.media_item).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(channel_id, media_item_id = next.media_item.id, error = %e, "item unresolvable, retrying shortly");
                    if sleep_or_cancelled(&cancel, Duration::from_secs(5)).await {
                        break;
                    }
                    continue;
                }
            };

            *now_playing.write().await = Some(NowPlaying {
                media_item_id: next.media_item.id,
                title: next.media_item.title.clone(),
                is_filler: next.is_filler,
                started_at: Utc::now(),
            });

            let outcome = self
                .run_one_item(&resolved_url, priority, &cancel, &tx)
                .await;

            match outcome {
                Ok(()) => consecutive_item_failures = 0,
                Err(e) => {
                    consecutive_item_failures += 1;
                    warn!(channel_id, error = %e, consecutive_item_failures, "item playback failed");
                    if consecutive_item_failures >= 2 {
                        // Two in a row: stop hammering this item's source and
                        // let the next playout.next_item() advance past it.
                        consecutive_item_failures = 0;
                    } else {
                        continue;
                    }
                }
            }
        }

        *now_playing.write().await = None;
    }

    /// Run a single resolved item through ffmpeg until EOF or cancellation.
    async fn run_one_item(
        &self,
        resolved_url: &str,
        priority: AcquirePriority,
        cancel: &CancellationToken,
        tx: &broadcast::Sender<Bytes>,
    ) -> ChannelResult<()> {
        let source = probe::probe_source(&self.ffmpeg_config.ffprobe_command, resolved_url)
            .await
            .unwrap_or(SourceProfile {
                video_codec: "unknown".to_string(),
                audio_codec: None,
                container: "mpegts".to_string(),
            });
        let target = TargetProfile {
            video_codec: "h264".to_string(),
            resolution: None,
            audio_codec: "aac".to_string(),
            video_bitrate_kbps: None,
        };
        let builder = CommandBuilder::new(self.ffmpeg_config.command.clone(), self.hwaccel);
        // Every catalog item is pre-recorded media assembled into a virtual
        // linear channel, never a genuinely live upstream feed, so `-re`
        // pacing always applies.
        let args = builder.build_args(resolved_url, &source, &target, None, false);

        let slot = self
            .pool
            .acquire(priority)
            .await
            .map_err(|e| ChannelError::PlaybackFailed(format!("pool acquire failed: {e}")))?;

        let mut process = FfmpegProcess::spawn(&self.ffmpeg_config.command, &args)
            .await
            .map_err(|e| ChannelError::PlaybackFailed(format!("ffmpeg spawn failed: {e}")))?;
        let mut stdout = process
            .stdout()
            .ok_or_else(|| ChannelError::PlaybackFailed("ffmpeg produced no stdout handle".to_string()))?;

        let mut buf = [0u8; 64 * 1024];
        let mut last_health_check = tokio::time::Instant::now();
        loop {
            if cancel.is_cancelled() {
                drop(stdout);
                let _ = process.graceful_shutdown(self.ffmpeg_config.graceful_teardown_timeout).await;
                drop(slot);
                return Ok(());
            }

            if last_health_check.elapsed() >= HEALTH_CHECK_INTERVAL {
                last_health_check = tokio::time::Instant::now();
                if let Some(sample) = process.sample_health().await {
                    if process.mark_health(&sample, RSS_SOFT_LIMIT_BYTES) {
                        warn!(pid = process.pid(), rss = %format_memory(sample.rss_bytes as f64), "ffmpeg process over memory limit, tearing down");
                        drop(stdout);
                        let _ = process.graceful_shutdown(self.ffmpeg_config.graceful_teardown_timeout).await;
                        drop(slot);
                        return Err(ChannelError::PlaybackFailed("process over memory limit".to_string()));
                    }
                }
            }

            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => 0,
                read = stdout.read(&mut buf) => read.unwrap_or(0),
            };

            if n == 0 {
                break;
            }
            let _ = tx.send(Bytes::copy_from_slice(&buf[..n]));
        }

        drop(stdout);
        let status = process.wait().await;
        drop(slot);

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                let tail = process.stderr_tail().await;
                warn!(
                    exit_code = status.code(),
                    stderr_tail = %String::from_utf8_lossy(&tail),
                    "ffmpeg exited abnormally"
                );
                Err(ChannelError::PlaybackFailed(format!("ffmpeg exited with {:?}", status.code())))
            }
            Err(e) => {
                warn!(error = %e, "failed to wait on ffmpeg process");
                Err(ChannelError::PlaybackFailed(e.to_string()))
            }
        }
    }
}

async fn sleep_or_cancelled(cancel: &CancellationToken, d: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(d) => false,
    }
}

/// Read loop for a subscribed client, reported by callers once per chunk so
/// a session that can't keep up is disconnected rather than silently
/// buffered forever.
pub async fn next_chunk(rx: &mut broadcast::Receiver<Bytes>, session_id: u64) -> ChannelResult<Bytes> {
    match rx.recv().await {
        Ok(bytes) => Ok(bytes),
        Err(broadcast::error::RecvError::Lagged(_)) => {
            warn!(session_id, "{}", SESSION_LAG_DISCONNECT);
            Err(ChannelError::SessionOverrun(session_id))
        }
        Err(broadcast::error::RecvError::Closed) => Err(ChannelError::NotRunning(0)),
    }
}
