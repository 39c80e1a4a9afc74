//! Per-channel filler placement (spec §4.2): where filler is inserted
//! relative to a block, independent of the per-block
//! [`FillerPolicy`](crate::models::FillerPolicy) that governs what happens
//! when a block's collection is exhausted.

use chrono::{DateTime, Timelike, Utc};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FillerMode {
    PreRoll,
    MidRoll { interval_ms: i64 },
    PostRoll,
    TailOnly,
    /// Align the next block to the next minute boundary.
    PadToMinute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillerPreset {
    /// (media_item_id, weight) pairs.
    pub candidates: Vec<(i64, f64)>,
}

impl FillerPreset {
    /// Weighted-random pick. Never advances an enumerator cursor — filler
    /// selection is independent bookkeeping, per spec §4.2.
    pub fn select(&self) -> Option<i64> {
        if self.candidates.is_empty() {
            return None;
        }
        let total: f64 = self.candidates.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return self.candidates.first().map(|(id, _)| *id);
        }
        let mut roll = rand::rng().random_range(0.0..total);
        for (id, weight) in &self.candidates {
            if roll < *weight {
                return Some(*id);
            }
            roll -= weight;
        }
        self.candidates.last().map(|(id, _)| *id)
    }
}

/// For `pad_to_minute`: how many milliseconds until the next minute
/// boundary after `now`.
pub fn ms_to_next_minute_boundary(now: DateTime<Utc>) -> i64 {
    let secs_into_minute = now.second() as i64;
    let ms_into_minute = secs_into_minute * 1000 + (now.timestamp_subsec_millis() as i64);
    60_000 - ms_into_minute
}
