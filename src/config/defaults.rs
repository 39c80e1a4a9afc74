//! Configuration default values, kept centralized so they're easy to audit
//! against spec.md §6.

// Server
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8181;

// Database
pub const DEFAULT_DATABASE_URL: &str = "sqlite://./exstreamtv.db";
pub const DEFAULT_POOL_BASE_CONNECTIONS: u32 = 5;
pub const DEFAULT_POOL_PER_CHANNEL_CONNECTIONS: f64 = 2.5;

// Streaming / HDHomeRun frontend
pub const DEFAULT_DEVICE_ID: &str = "EXSTREAMTV1";
pub const DEFAULT_FRIENDLY_NAME: &str = "EXStreamTV";
pub const DEFAULT_TUNER_COUNT: u32 = 4;

// Stream throttler / process pool
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 90;
pub const DEFAULT_ACQUIRE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_ACQUIRE_BACKOFF_CAP_SECS: u64 = 60;
pub const DEFAULT_HEALTH_SAMPLE_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_GRACEFUL_TEARDOWN_SECS: u64 = 5;

// ffmpeg
pub const DEFAULT_FFMPEG_COMMAND: &str = "ffmpeg";
pub const DEFAULT_FFPROBE_COMMAND: &str = "ffprobe";

// Playout
pub const DEFAULT_RESUME_THRESHOLD_MINS: i64 = 30;

// Self-healing
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_WINDOW_SECS: u64 = 300;
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 120;
pub const DEFAULT_RESTART_STORM_LIMIT: u32 = 10;
pub const DEFAULT_RESTART_STORM_WINDOW_SECS: u64 = 60;
pub const DEFAULT_PER_CHANNEL_RESTART_COOLDOWN_SECS: u64 = 30;

// ai_agent (external collaborator, config passthrough only)
pub const DEFAULT_AI_AGENT_ENABLED: bool = false;

// Log fanout ring buffer (spec §7)
pub const DEFAULT_LOG_RING_CAPACITY: usize = 10_000;
