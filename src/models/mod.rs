//! Domain model types for EXStreamTV.
//!
//! Identifiers are `i64` (SQLite `INTEGER PRIMARY KEY`) rather than the
//! teacher's `Uuid` convention — see DESIGN.md for the rationale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source a [`MediaItem`] is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Plex,
    Jellyfin,
    Emby,
    Local,
    ArchiveOrg,
    Youtube,
    M3u,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceType::Plex => "plex",
            SourceType::Jellyfin => "jellyfin",
            SourceType::Emby => "emby",
            SourceType::Local => "local",
            SourceType::ArchiveOrg => "archive_org",
            SourceType::Youtube => "youtube",
            SourceType::M3u => "m3u",
        };
        f.write_str(s)
    }
}

/// A single piece of media known to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub library_id: i64,
    pub source_type: SourceType,
    /// Opaque identifier within the upstream source (Plex rating key, file
    /// path, YouTube video id, ...).
    pub source_ref: String,
    pub title: String,
    pub duration_ms: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A grouping of media items backed by one upstream source/library root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub source_type: SourceType,
    /// Source-specific connection config (base URL, auth token, root path).
    pub config: serde_json::Value,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// A virtual linear TV channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    /// Human-facing channel number, e.g. "4.1" — distinct from `id`.
    pub number: String,
    pub name: String,
    /// `#EXTINF` `group-title` in the generated M3U (spec §6).
    pub group: Option<String>,
    /// `#EXTINF` `tvg-logo` in the generated M3U (spec §6).
    pub logo_url: Option<String>,
    pub playlist_id: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Ordered sequence of [`Block`]s that define a channel's programming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub id: i64,
    pub name: String,
}

/// How a [`Collection`] is walked for playout ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enumerator {
    Chronological,
    Shuffled,
    Random,
    RotatingShuffled,
}

/// A named group of media items with an enumeration policy; the unit a
/// [`Block`] schedules from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub enumerator: Enumerator,
    /// Smart collections resolve membership from a query instead of a
    /// fixed member list.
    pub smart_query: Option<String>,
}

/// How a [`Block`] decides when to stop drawing from its collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScheduleMode {
    /// Play exactly one item.
    One,
    /// Play exactly `k` items.
    Multiple(u32),
    /// Play items until cumulative duration reaches `d` milliseconds.
    Duration(i64),
    /// Play items until the next scheduled boundary.
    Flood(DateTime<Utc>),
}

/// What to play when a [`Block`]'s collection is exhausted or empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FillerPolicy {
    /// Skip to the next block immediately.
    Skip,
    /// Loop the collection from the start.
    Loop,
    /// Draw from a dedicated filler collection.
    FillerCollection(i64),
    /// Hold on a static slate/offline card.
    Slate,
}

/// One entry in a [`Playlist`]'s timeline: a collection played under a
/// schedule mode and filler policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: i64,
    pub playlist_id: i64,
    pub position: i32,
    pub collection_id: i64,
    pub schedule_mode: ScheduleMode,
    pub filler_policy: FillerPolicy,
}

/// A channel's live, persisted playhead.
///
/// Invariants (spec §3): `offset_ms` is monotonically non-decreasing within
/// a `current_item_id` until it rolls over to the next item (where it resets
/// to 0); `anchor_time` only moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playout {
    pub channel_id: i64,
    pub current_item_id: Option<i64>,
    pub offset_ms: i64,
    pub enumerator_state: serde_json::Value,
    pub anchor_time: DateTime<Utc>,
}

/// A single resolved entry in a channel's computed timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayoutItem {
    pub media_item_id: i64,
    pub scheduled_start: DateTime<Utc>,
    pub duration_ms: i64,
    pub is_filler: bool,
}

/// A live client connection to a tuned channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub channel_id: i64,
    pub started_at: DateTime<Utc>,
    pub client_addr: String,
    pub bytes_sent: u64,
}

/// Per-channel circuit breaker state (spec §4.6). Not catalog-persisted —
/// re-derived from observed failures after a process restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}
