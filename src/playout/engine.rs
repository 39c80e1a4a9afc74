//! `next_item(channel, now)`: the Playout Engine's core operation, walking
//! a channel's blocks under their schedule modes and filler policy, with
//! anchor/resume semantics for downtime.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use super::enumerator::{self, EnumeratorState};
use crate::catalog::SharedCatalog;
use crate::errors::{ChannelError, ChannelResult};
use crate::models::{
    Block, Channel, Enumerator, FillerPolicy, MediaItem, Playout, PlayoutItem, ScheduleMode,
    SourceType,
};

const OVERSHOOT_TOLERANCE_MS: i64 = 60_000;
/// Guards against a pathological ring of all-empty blocks.
const MAX_SKIP_HOPS: usize = 16;
/// Guards `project_timeline` against looping forever over a block of
/// zero-duration items.
const MAX_PROJECTED_ITEMS: usize = 20_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct BlockProgress {
    block_position: i32,
    items_played_in_block: u32,
    cumulative_duration_ms: i64,
    enumerator: EnumeratorState,
    filler_enumerator: EnumeratorState,
}

pub struct PlayoutEngine {
    catalog: SharedCatalog,
    resume_threshold: ChronoDuration,
}

pub struct NextItem {
    pub media_item: MediaItem,
    pub is_filler: bool,
}

impl PlayoutEngine {
    pub fn new(catalog: SharedCatalog, resume_threshold_minutes: i64) -> Self {
        Self {
            catalog,
            resume_threshold: ChronoDuration::minutes(resume_threshold_minutes),
        }
    }

    /// Advance a channel's playout by one item. Persists the new state via
    /// the catalog at the item boundary, per spec §3.
    pub async fn next_item(&self, channel: &Channel, now: DateTime<Utc>) -> ChannelResult<NextItem> {
        let playout = self.catalog.get_playout(channel.id).await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "failed to load playout state");
            ChannelError::NotFound(channel.id)
        })?;

        let mut playout = playout.unwrap_or(Playout {
            channel_id: channel.id,
            current_item_id: None,
            offset_ms: 0,
            enumerator_state: serde_json::to_value(BlockProgress::default()).unwrap(),
            anchor_time: now,
        });
        let previous_item_id = playout.current_item_id;

        // Anchor/resume: if downtime exceeded resume_threshold, snap the
        // virtual timeline to "now" instead of replaying missed content.
        let downtime = now - playout.anchor_time;
        if downtime > self.resume_threshold {
            playout.anchor_time = now;
            playout.offset_ms = 0;
        }

        let blocks = self.catalog.list_blocks(channel.playlist_id).await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "catalog read failed");
            ChannelError::EmptyProgramming(channel.id)
        })?;
        if blocks.is_empty() {
            return Err(ChannelError::EmptyProgramming(channel.id));
        }

        let mut progress: BlockProgress =
            serde_json::from_value(playout.enumerator_state.clone()).unwrap_or_default();

        let next = self
            .resolve_next(channel, &blocks, &mut progress, playout.anchor_time, now, previous_item_id)
            .await?;

        progress.cumulative_duration_ms += next.media_item.duration_ms;
        playout.current_item_id = Some(next.media_item.id);
        playout.offset_ms = 0;
        playout.enumerator_state = serde_json::to_value(&progress).unwrap_or_default();

        self.catalog.save_playout(&playout).await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "failed to persist playout state");
            ChannelError::EmptyProgramming(channel.id)
        })?;

        Ok(next)
    }

    /// Enumerate the timeline over `[from, until)` without mutating the
    /// persisted playhead (spec §4.7's "projection mode"): operates on a
    /// clone of the current `BlockProgress` seeded from the real playout
    /// row, and never calls `catalog.save_playout`.
    pub async fn project_timeline(
        &self,
        channel: &Channel,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> ChannelResult<Vec<PlayoutItem>> {
        let playout = self.catalog.get_playout(channel.id).await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "failed to load playout state");
            ChannelError::NotFound(channel.id)
        })?;
        let playout = playout.unwrap_or(Playout {
            channel_id: channel.id,
            current_item_id: None,
            offset_ms: 0,
            enumerator_state: serde_json::to_value(BlockProgress::default()).unwrap(),
            anchor_time: from,
        });

        let blocks = self.catalog.list_blocks(channel.playlist_id).await.map_err(|e| {
            tracing::warn!(channel_id = channel.id, error = %e, "catalog read failed");
            ChannelError::EmptyProgramming(channel.id)
        })?;
        if blocks.is_empty() {
            return Err(ChannelError::EmptyProgramming(channel.id));
        }

        let mut progress: BlockProgress =
            serde_json::from_value(playout.enumerator_state.clone()).unwrap_or_default();
        let mut previous_item_id = playout.current_item_id;
        let mut cursor = from;
        let mut items = Vec::new();

        while cursor < until && items.len() < MAX_PROJECTED_ITEMS {
            let next = self
                .resolve_next(channel, &blocks, &mut progress, playout.anchor_time, cursor, previous_item_id)
                .await?;
            progress.cumulative_duration_ms += next.media_item.duration_ms;
            previous_item_id = Some(next.media_item.id);
            items.push(PlayoutItem {
                media_item_id: next.media_item.id,
                scheduled_start: cursor,
                duration_ms: next.media_item.duration_ms,
                is_filler: next.is_filler,
            });
            cursor += ChronoDuration::milliseconds(next.media_item.duration_ms.max(1));
        }

        Ok(items)
    }

    async fn collection_enumerator(&self, block: &Block) -> Enumerator {
        match self.catalog.get_collection(block.collection_id).await {
            Ok(collection) => collection.enumerator,
            Err(e) => {
                tracing::warn!(collection_id = block.collection_id, error = %e, "failed to load collection, defaulting enumerator");
                Enumerator::Chronological
            }
        }
    }

    /// Walks block rotation and filler fallbacks iteratively (never
    /// recursively — `hops` bounds the loop instead) until real or filler
    /// content is found, or `MAX_SKIP_HOPS` is exceeded.
    async fn resolve_next(
        &self,
        channel: &Channel,
        blocks: &[Block],
        progress: &mut BlockProgress,
        anchor_time: DateTime<Utc>,
        now: DateTime<Utc>,
        previous_item_id: Option<i64>,
    ) -> ChannelResult<NextItem> {
        for hops in 0..=MAX_SKIP_HOPS {
            let block_idx = (progress.block_position as usize) % blocks.len();
            let block = &blocks[block_idx];

            let members = self.catalog.collection_members(block.collection_id).await.map_err(|e| {
                tracing::warn!(channel_id = channel.id, error = %e, "catalog read failed");
                ChannelError::EmptyProgramming(channel.id)
            })?;

            let block_exhausted = self.is_block_exhausted(block, progress, now);

            if !block_exhausted && !members.is_empty() {
                let enumerator = self.collection_enumerator(block).await;
                let member_ids: Vec<i64> = members.iter().map(|m| m.id).collect();
                let (item_id, new_state) =
                    enumerator::next(enumerator, &member_ids, channel.id, anchor_time, progress.enumerator.clone())
                        .ok_or(ChannelError::EmptyProgramming(channel.id))?;
                progress.enumerator = new_state;
                progress.items_played_in_block += 1;
                let media_item = members
                    .into_iter()
                    .find(|m| m.id == item_id)
                    .ok_or(ChannelError::EmptyProgramming(channel.id))?;
                return Ok(NextItem { media_item, is_filler: false });
            }

            if members.is_empty() {
                match self.apply_filler(channel, block, previous_item_id).await? {
                    FillerOutcome::Item(next) => return Ok(next),
                    FillerOutcome::SkipBlock => {
                        progress.block_position = (progress.block_position + 1) % blocks.len() as i32;
                        progress.items_played_in_block = 0;
                        progress.cumulative_duration_ms = 0;
                        progress.enumerator = EnumeratorState::default();
                        continue;
                    }
                }
            }

            // Block exhausted but has content: rotate to the next block.
            progress.block_position = (progress.block_position + 1) % blocks.len() as i32;
            progress.items_played_in_block = 0;
            progress.cumulative_duration_ms = 0;
            progress.enumerator = EnumeratorState::default();
            let _ = hops;
        }
        Err(ChannelError::EmptyProgramming(channel.id))
    }

    fn is_block_exhausted(&self, block: &Block, progress: &BlockProgress, now: DateTime<Utc>) -> bool {
        match &block.schedule_mode {
            ScheduleMode::One => progress.items_played_in_block >= 1,
            ScheduleMode::Multiple(k) => progress.items_played_in_block >= *k,
            ScheduleMode::Duration(d) => progress.cumulative_duration_ms >= *d - OVERSHOOT_TOLERANCE_MS,
            ScheduleMode::Flood(until) => now >= *until,
        }
    }

    /// Handle an empty block's collection per its `FillerPolicy`. Does not
    /// touch `progress`'s block rotation itself — `resolve_next` applies
    /// `FillerOutcome::SkipBlock` so the loop, not this method, owns state.
    async fn apply_filler(
        &self,
        channel: &Channel,
        block: &Block,
        previous_item_id: Option<i64>,
    ) -> ChannelResult<FillerOutcome> {
        match &block.filler_policy {
            FillerPolicy::FillerCollection(filler_collection_id) => {
                let filler_members = self.catalog.collection_members(*filler_collection_id).await.map_err(|e| {
                    tracing::warn!(channel_id = channel.id, error = %e, "failed to load filler collection");
                    ChannelError::EmptyProgramming(channel.id)
                })?;
                if filler_members.is_empty() {
                    return Err(ChannelError::EmptyProgramming(channel.id));
                }
                let ids: Vec<i64> = filler_members.iter().map(|m| m.id).collect();
                let (item_id, _) = enumerator::next(Enumerator::Chronological, &ids, channel.id, Utc::now(), EnumeratorState::default())
                    .ok_or(ChannelError::EmptyProgramming(channel.id))?;
                let media_item = filler_members
                    .into_iter()
                    .find(|m| m.id == item_id)
                    .ok_or(ChannelError::EmptyProgramming(channel.id))?;
                Ok(FillerOutcome::Item(NextItem { media_item, is_filler: true }))
            }
            FillerPolicy::Loop => {
                let id = previous_item_id.ok_or(ChannelError::EmptyProgramming(channel.id))?;
                let media_item = self.catalog.get_media_item(id).await.map_err(|e| {
                    tracing::warn!(channel_id = channel.id, error = %e, "catalog read failed");
                    ChannelError::EmptyProgramming(channel.id)
                })?;
                Ok(FillerOutcome::Item(NextItem { media_item, is_filler: true }))
            }
            FillerPolicy::Skip => Ok(FillerOutcome::SkipBlock),
            FillerPolicy::Slate => Ok(FillerOutcome::Item(NextItem {
                media_item: slate_media_item(channel.id),
                is_filler: true,
            })),
        }
    }
}

enum FillerOutcome {
    Item(NextItem),
    SkipBlock,
}

/// A synthetic, unpersisted media item standing in for "dead air" when a
/// block's `FillerPolicy::Slate` applies. Never written to the catalog.
fn slate_media_item(channel_id: i64) -> MediaItem {
    MediaItem {
        id: -channel_id,
        library_id: 0,
        source_type: SourceType::Local,
        source_ref: "slate://default".to_string(),
        title: "Off Air".to_string(),
        duration_ms: 10_000,
        metadata: serde_json::json!({}),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
