//! Centralized error handling for EXStreamTV.
//!
//! Mirrors the teacher's layered-error approach: a top-level `AppError`
//! wraps per-layer enums (`CatalogError`, `ResolverError`, `FfmpegError`,
//! `ChannelError`, `ConfigError`), each implementing `std::error::Error` via
//! `thiserror` with `#[from]` conversions where the wrapping is lossless.

pub mod types;

pub use types::*;

pub type AppResult<T> = Result<T, AppError>;
pub type CatalogResult<T> = Result<T, CatalogError>;
pub type ResolverResult<T> = Result<T, ResolverError>;
pub type FfmpegResult<T> = Result<T, FfmpegError>;
pub type ChannelResult<T> = Result<T, ChannelError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type EpgResult<T> = Result<T, EpgError>;
