//! Error type definitions for EXStreamTV
//!
//! Hierarchical error system: a top-level `AppError` wraps per-layer enums
//! so call sites can match narrowly while `main.rs`/HTTP handlers can still
//! collapse everything into one type via `?`.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    #[error("Ffmpeg error: {0}")]
    Ffmpeg(#[from] FfmpegError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("EPG error: {0}")]
    Epg(#[from] EpgError),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Catalog (sqlx/SQLite) layer errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Record not found: {table} with id {id}")]
    NotFound { table: String, id: i64 },

    #[error("Constraint violation: {constraint} - {message}")]
    ConstraintViolation { constraint: String, message: String },

    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },
}

/// URL Resolver errors, carrying the spec's `UnresolvableKind` taxonomy.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Item is unresolvable ({kind:?}): {message}")]
    Unresolvable {
        kind: UnresolvableKind,
        message: String,
    },

    #[error("Transient upstream failure resolving {source_type}: {message}")]
    Transient {
        source_type: String,
        message: String,
    },

    #[error("Unsupported source type: {0}")]
    UnsupportedSourceType(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Why a [`ResolverError::Unresolvable`] item cannot be resolved, matching
/// spec §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvableKind {
    Auth,
    NotFound,
    Expired,
    UpstreamDown,
    Invalid,
}

/// FFmpeg pipeline / process pool errors.
#[derive(Error, Debug)]
pub enum FfmpegError {
    #[error("Failed to spawn ffmpeg process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Process pool exhausted: waited {waited_secs}s for a slot")]
    AcquireTimeout { waited_secs: u64 },

    #[error("Process exited unexpectedly with status {0:?}")]
    UnexpectedExit(Option<i32>),

    #[error("Probe failed for {url}: {message}")]
    ProbeFailed { url: String, message: String },

    #[error("Signal delivery failed: {0}")]
    Signal(String),
}

/// Channel Manager / Playout errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Channel {0} not found")]
    NotFound(i64),

    #[error("Channel {0} is already running")]
    AlreadyRunning(i64),

    #[error("Channel {0} is not running")]
    NotRunning(i64),

    #[error("No eligible media items for channel {0}")]
    EmptyProgramming(i64),

    #[error("Restart suppressed by circuit breaker for channel {0}")]
    CircuitOpen(i64),

    #[error("Restart suppressed by storm throttle")]
    RestartStormThrottled,

    #[error("Session overrun: consumer {0} fell too far behind")]
    SessionOverrun(u64),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),
}

/// Configuration loading / persistence errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Figment error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to acquire exclusive lock on config file: {0}")]
    Lock(std::io::Error),
}

/// EPG Generator validation/composition errors (spec §4.7). Never served
/// to a client directly — `web` maps these to `503 + Retry-After` rather
/// than ever returning a corrupt XMLTV document.
#[derive(Error, Debug)]
pub enum EpgError {
    #[error("lineup is empty: no enabled channels")]
    EmptyLineup,

    #[error("channel {0} timeline projection failed: {1}")]
    ProjectionFailed(i64, ChannelError),

    #[error("validation failed for channel {channel_id}: {message}")]
    ValidationFailed { channel_id: i64, message: String },

    #[error("catalog read failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("xml serialization failed: {0}")]
    Xml(String),
}

impl AppError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<R: Into<String>, I: Into<String>>(resource: R, id: I) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
