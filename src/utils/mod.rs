//! Small standalone helpers shared across modules.

pub mod human_format;
pub mod jitter;

pub use human_format::{format_duration, format_memory};
