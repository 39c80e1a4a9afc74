//! Application configuration.
//!
//! Initial load uses `figment` (Yaml + Env), matching the teacher's layering
//! approach. Runtime writes (the config `PUT` endpoint, spec §6) go through
//! [`ConfigStore::update`], which takes an OS-level exclusive lock on the
//! YAML file via `fs2` before doing a read-modify-validate-write cycle, so
//! concurrent writers never interleave and an invalid merged document never
//! reaches disk.

pub mod defaults;
pub mod duration_serde;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::errors::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults_host")]
    pub host: String,
    #[serde(default = "defaults_port")]
    pub port: u16,
    pub base_url: Option<String>,
}

fn defaults_host() -> String {
    defaults::DEFAULT_HOST.to_string()
}
fn defaults_port() -> u16 {
    defaults::DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults_host(),
            port: defaults_port(),
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlexConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "defaults_device_id")]
    pub device_id: String,
    #[serde(default = "defaults_friendly_name")]
    pub friendly_name: String,
    #[serde(default = "defaults_tuner_count")]
    pub tuner_count: u32,
    pub database_url: Option<String>,
}

fn defaults_device_id() -> String {
    defaults::DEFAULT_DEVICE_ID.to_string()
}
fn defaults_friendly_name() -> String {
    defaults::DEFAULT_FRIENDLY_NAME.to_string()
}
fn defaults_tuner_count() -> u32 {
    defaults::DEFAULT_TUNER_COUNT
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            device_id: defaults_device_id(),
            friendly_name: defaults_friendly_name(),
            tuner_count: defaults_tuner_count(),
            database_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamThrottlerConfig {
    #[serde(with = "duration_serde::duration", default = "acquire_timeout")]
    pub acquire_timeout: Duration,
    #[serde(default = "acquire_max_attempts")]
    pub acquire_max_attempts: u32,
    #[serde(with = "duration_serde::duration", default = "acquire_backoff_cap")]
    pub acquire_backoff_cap: Duration,
    #[serde(with = "duration_serde::duration", default = "health_sample_interval")]
    pub health_sample_interval: Duration,
    /// Upper bound on concurrently-running ffmpeg processes. `None` means
    /// size the pool from the channel count at startup instead.
    pub max_concurrent_processes: Option<u32>,
}

fn acquire_timeout() -> Duration {
    Duration::from_secs(defaults::DEFAULT_ACQUIRE_TIMEOUT_SECS)
}
fn acquire_max_attempts() -> u32 {
    defaults::DEFAULT_ACQUIRE_MAX_ATTEMPTS
}
fn acquire_backoff_cap() -> Duration {
    Duration::from_secs(defaults::DEFAULT_ACQUIRE_BACKOFF_CAP_SECS)
}
fn health_sample_interval() -> Duration {
    Duration::from_secs(defaults::DEFAULT_HEALTH_SAMPLE_INTERVAL_SECS)
}

impl Default for StreamThrottlerConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: acquire_timeout(),
            acquire_max_attempts: acquire_max_attempts(),
            acquire_backoff_cap: acquire_backoff_cap(),
            health_sample_interval: health_sample_interval(),
            max_concurrent_processes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    #[serde(default = "ffmpeg_command")]
    pub command: String,
    #[serde(default = "ffprobe_command")]
    pub ffprobe_command: String,
    #[serde(with = "duration_serde::duration", default = "graceful_teardown")]
    pub graceful_teardown_timeout: Duration,
    /// Hardware accelerator name (`videotoolbox`, `nvenc`, `qsv`, `vaapi`,
    /// `amf`) to prefer, probed at startup; `None` disables hw accel.
    pub hwaccel: Option<String>,
}

fn ffmpeg_command() -> String {
    defaults::DEFAULT_FFMPEG_COMMAND.to_string()
}
fn ffprobe_command() -> String {
    defaults::DEFAULT_FFPROBE_COMMAND.to_string()
}
fn graceful_teardown() -> Duration {
    Duration::from_secs(defaults::DEFAULT_GRACEFUL_TEARDOWN_SECS)
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            command: ffmpeg_command(),
            ffprobe_command: ffprobe_command(),
            graceful_teardown_timeout: graceful_teardown(),
            hwaccel: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutConfig {
    #[serde(default = "resume_threshold")]
    pub resume_threshold_minutes: i64,
}

fn resume_threshold() -> i64 {
    defaults::DEFAULT_RESUME_THRESHOLD_MINS
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            resume_threshold_minutes: resume_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealingConfig {
    #[serde(default = "breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(with = "duration_serde::duration", default = "breaker_window")]
    pub breaker_window: Duration,
    #[serde(with = "duration_serde::duration", default = "breaker_cooldown")]
    pub breaker_cooldown: Duration,
    #[serde(default = "restart_storm_limit")]
    pub restart_storm_limit: u32,
    #[serde(with = "duration_serde::duration", default = "restart_storm_window")]
    pub restart_storm_window: Duration,
    #[serde(
        with = "duration_serde::duration",
        default = "per_channel_restart_cooldown"
    )]
    pub per_channel_restart_cooldown: Duration,
}

fn breaker_failure_threshold() -> u32 {
    defaults::DEFAULT_BREAKER_FAILURE_THRESHOLD
}
fn breaker_window() -> Duration {
    Duration::from_secs(defaults::DEFAULT_BREAKER_WINDOW_SECS)
}
fn breaker_cooldown() -> Duration {
    Duration::from_secs(defaults::DEFAULT_BREAKER_COOLDOWN_SECS)
}
fn restart_storm_limit() -> u32 {
    defaults::DEFAULT_RESTART_STORM_LIMIT
}
fn restart_storm_window() -> Duration {
    Duration::from_secs(defaults::DEFAULT_RESTART_STORM_WINDOW_SECS)
}
fn per_channel_restart_cooldown() -> Duration {
    Duration::from_secs(defaults::DEFAULT_PER_CHANNEL_RESTART_COOLDOWN_SECS)
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            breaker_failure_threshold: breaker_failure_threshold(),
            breaker_window: breaker_window(),
            breaker_cooldown: breaker_cooldown(),
            restart_storm_limit: restart_storm_limit(),
            restart_storm_window: restart_storm_window(),
            per_channel_restart_cooldown: per_channel_restart_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AiAgentConfig {
    #[serde(default)]
    pub enabled: bool,
    pub endpoint: Option<String>,
}

/// Top-level configuration document, matching spec §6's YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub plex: PlexConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub stream_throttler: StreamThrottlerConfig,
    #[serde(default)]
    pub ffmpeg: FfmpegConfig,
    #[serde(default)]
    pub playout: PlayoutConfig,
    #[serde(default)]
    pub self_healing: SelfHealingConfig,
    #[serde(default)]
    pub ai_agent: AiAgentConfig,
}

impl Config {
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let figment = Figment::new()
            .merge(figment::providers::Yaml::file(path))
            .merge(figment::providers::Env::prefixed("EXSTREAMTV_").split("__"));
        figment.extract().map_err(ConfigError::from)
    }

    /// Validation applied to every document before it's accepted, whether
    /// loaded at startup or written via the config `PUT` endpoint.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.streaming.tuner_count == 0 {
            return Err(ConfigError::invalid("streaming.tuner_count must be >= 1"));
        }
        if self.stream_throttler.acquire_max_attempts == 0 {
            return Err(ConfigError::invalid(
                "stream_throttler.acquire_max_attempts must be >= 1",
            ));
        }
        if self.playout.resume_threshold_minutes < 0 {
            return Err(ConfigError::invalid(
                "playout.resume_threshold_minutes must be >= 0",
            ));
        }
        Ok(())
    }
}

use figment::{providers::Format, Figment};

/// Shared, hot-reloadable handle to the running configuration plus the file
/// it was loaded from, so writes can be persisted back under an exclusive
/// lock.
///
/// Grounded on the teacher's pattern of pushing config changes out through a
/// broadcast/watch channel (`main.rs`'s `cache_invalidation_tx`) rather than
/// requiring a restart.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Config>,
    changed_tx: watch::Sender<()>,
}

impl ConfigStore {
    pub fn load(path: PathBuf) -> ConfigResult<Arc<Self>> {
        let config = Config::load_from_file(&path)?;
        config.validate()?;
        let (changed_tx, _rx) = watch::channel(());
        Ok(Arc::new(Self {
            path,
            current: RwLock::new(config),
            changed_tx,
        }))
    }

    pub async fn current(&self) -> Config {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.changed_tx.subscribe()
    }

    /// Read-modify-validate-write under an exclusive OS file lock. `mutate`
    /// receives a clone of the current document; if it returns an invalid
    /// document the lock is released and nothing is written, matching
    /// spec §6's 422-on-invalid-PUT contract.
    ///
    /// The whole cycle runs under `current`'s write guard (held for the
    /// duration of the `spawn_blocking` write) so two concurrent `update`
    /// calls can't both build their candidate from the same pre-write
    /// snapshot and have one silently clobber the other's change.
    pub async fn update(
        &self,
        mutate: impl FnOnce(&mut Config) + Send,
    ) -> ConfigResult<Config> {
        let mut guard = self.current.write().await;
        let mut candidate = guard.clone();
        mutate(&mut candidate);
        candidate.validate()?;

        let serialized = serde_yaml::to_string(&candidate)?;
        let path_for_lock = self.path.clone();
        tokio::task::spawn_blocking(move || -> ConfigResult<()> {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path_for_lock)
                .map_err(|e| ConfigError::Read {
                    path: path_for_lock.display().to_string(),
                    source: e,
                })?;
            file.lock_exclusive().map_err(ConfigError::Lock)?;
            std::fs::write(&path_for_lock, serialized).map_err(|e| ConfigError::Read {
                path: path_for_lock.display().to_string(),
                source: e,
            })?;
            fs2::FileExt::unlock(&file).map_err(ConfigError::Lock)?;
            Ok(())
        })
        .await
        .map_err(|e| ConfigError::invalid(format!("config write task panicked: {e}")))??;

        *guard = candidate.clone();
        let _ = self.changed_tx.send(());
        Ok(candidate)
    }
}
