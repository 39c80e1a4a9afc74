//! Member-ordering strategies for a [`Collection`](crate::models::Collection).
//!
//! Each enumerator persists just enough state (in `Playout.enumerator_state`,
//! a JSON blob) to resume deterministically without replaying — the
//! cursor-persistence idiom generalized from the teacher's
//! `job_scheduling::types::ScheduledJob` ordering fields.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::models::Enumerator;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnumeratorState {
    pub cursor: usize,
    /// `Random`'s repeat-avoidance window, most-recent-first.
    pub recent: Vec<i64>,
    /// `RotatingShuffled`'s current group index and per-group shuffle order.
    pub group_cursor: usize,
    pub shuffled_order: Vec<i64>,
}

fn seeded_rng(channel_id: i64, anchor_time: DateTime<Utc>) -> StdRng {
    let mut hasher = DefaultHasher::new();
    channel_id.hash(&mut hasher);
    anchor_time.timestamp().hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

/// Returns the next media item id and the updated state.
pub fn next(
    enumerator: Enumerator,
    members: &[i64],
    channel_id: i64,
    anchor_time: DateTime<Utc>,
    mut state: EnumeratorState,
) -> Option<(i64, EnumeratorState)> {
    if members.is_empty() {
        return None;
    }

    match enumerator {
        Enumerator::Chronological => {
            let idx = state.cursor % members.len();
            state.cursor = idx + 1;
            Some((members[idx], state))
        }
        Enumerator::Shuffled => {
            if state.shuffled_order.is_empty() || state.shuffled_order.len() != members.len() {
                let mut order = members.to_vec();
                order.shuffle(&mut seeded_rng(channel_id, anchor_time));
                state.shuffled_order = order;
                state.cursor = 0;
            }
            let idx = state.cursor % state.shuffled_order.len();
            let item = state.shuffled_order[idx];
            state.cursor = idx + 1;
            Some((item, state))
        }
        Enumerator::Random => {
            let window = members.len().saturating_sub(1).min(10);
            let mut rng = rand::rng();
            let candidates: Vec<&i64> = members
                .iter()
                .filter(|id| !state.recent.contains(id))
                .collect();
            let pick = if candidates.is_empty() {
                members.choose(&mut rng).copied()?
            } else {
                **candidates.choose(&mut rng)?
            };
            state.recent.insert(0, pick);
            state.recent.truncate(window);
            Some((pick, state))
        }
        Enumerator::RotatingShuffled => {
            const GROUP_SIZE: usize = 4;
            let groups: Vec<&[i64]> = members.chunks(GROUP_SIZE).collect();
            if groups.is_empty() {
                return None;
            }
            let group_idx = state.group_cursor % groups.len();
            let group = groups[group_idx];

            if state.shuffled_order.is_empty()
                || state.shuffled_order.iter().collect::<std::collections::HashSet<_>>()
                    != group.iter().collect::<std::collections::HashSet<_>>()
            {
                let mut order = group.to_vec();
                order.shuffle(&mut seeded_rng(channel_id, anchor_time));
                state.shuffled_order = order;
                state.cursor = 0;
            }

            let idx = state.cursor;
            let item = state.shuffled_order[idx];
            state.cursor += 1;
            if state.cursor >= state.shuffled_order.len() {
                state.cursor = 0;
                state.shuffled_order.clear();
                state.group_cursor += 1;
            }
            Some((item, state))
        }
    }
}
