//! The Catalog Store: the system of record for libraries, media items,
//! collections, playlists, blocks, channels, and persisted playout state.
//!
//! Grounded on the teacher's `sqlx`-based SQLite access (the root crate's
//! original persistence layer, predating its later sea-orm migration, which
//! left an orphaned `entities` module with no backing implementation — see
//! DESIGN.md). WAL mode and a pool sized `base + 2.5 * channel_count`
//! (spec §2/§5) are both set at connection time.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::config::defaults;
use crate::errors::{CatalogError, CatalogResult};
use crate::models::{
    Channel, Collection, Enumerator, FillerPolicy, Library, MediaItem, Playlist, Playout,
    ScheduleMode, SourceType,
};

#[derive(Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

fn pool_size(channel_count: u32) -> u32 {
    (defaults::DEFAULT_POOL_BASE_CONNECTIONS as f64
        + defaults::DEFAULT_POOL_PER_CHANNEL_CONNECTIONS * channel_count as f64)
        .ceil() as u32
}

fn source_type_to_str(s: SourceType) -> &'static str {
    match s {
        SourceType::Plex => "plex",
        SourceType::Jellyfin => "jellyfin",
        SourceType::Emby => "emby",
        SourceType::Local => "local",
        SourceType::ArchiveOrg => "archive_org",
        SourceType::Youtube => "youtube",
        SourceType::M3u => "m3u",
    }
}

fn source_type_from_str(s: &str) -> CatalogResult<SourceType> {
    Ok(match s {
        "plex" => SourceType::Plex,
        "jellyfin" => SourceType::Jellyfin,
        "emby" => SourceType::Emby,
        "local" => SourceType::Local,
        "archive_org" => SourceType::ArchiveOrg,
        "youtube" => SourceType::Youtube,
        "m3u" => SourceType::M3u,
        other => {
            return Err(CatalogError::InvariantViolation {
                message: format!("unknown source_type '{other}' in catalog row"),
            })
        }
    })
}

impl CatalogStore {
    /// Connect, enable WAL, and size the pool from the current channel
    /// count. Re-create (or call [`CatalogStore::resize`]) after the
    /// channel count changes materially.
    pub async fn connect(database_url: &str, channel_count: u32) -> CatalogResult<Self> {
        let opts = SqliteConnectOptions::from_str(database_url)
            .map_err(CatalogError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size(channel_count))
            .connect_with(opts)
            .await
            .map_err(CatalogError::Database)?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> CatalogResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(CatalogError::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- Channels ----------------------------------------------------

    pub async fn list_channels(&self) -> CatalogResult<Vec<Channel>> {
        let rows = sqlx::query(
            "SELECT id, number, name, group_name, logo_url, playlist_id, enabled, created_at FROM channels ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_channel).collect()
    }

    pub async fn get_channel(&self, id: i64) -> CatalogResult<Channel> {
        let row = sqlx::query(
            "SELECT id, number, name, group_name, logo_url, playlist_id, enabled, created_at FROM channels WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::NotFound {
            table: "channels".into(),
            id,
        })?;
        Self::row_to_channel(row)
    }

    /// Look up a channel by its human-facing number (e.g. `"4.1"`), the form
    /// used in HDHomeRun/IPTV URLs (spec §6).
    pub async fn get_channel_by_number(&self, number: &str) -> CatalogResult<Channel> {
        let row = sqlx::query(
            "SELECT id, number, name, group_name, logo_url, playlist_id, enabled, created_at FROM channels WHERE number = ?",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::NotFound {
            table: "channels".into(),
            id: 0,
        })?;
        Self::row_to_channel(row)
    }

    fn row_to_channel(row: sqlx::sqlite::SqliteRow) -> CatalogResult<Channel> {
        Ok(Channel {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            name: row.try_get("name")?,
            group: row.try_get("group_name")?,
            logo_url: row.try_get("logo_url")?,
            playlist_id: row.try_get("playlist_id")?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            created_at: parse_ts(row.try_get("created_at")?)?,
        })
    }

    // ---- Media items / libraries --------------------------------------

    pub async fn get_media_item(&self, id: i64) -> CatalogResult<MediaItem> {
        let row = sqlx::query(
            "SELECT id, library_id, source_type, source_ref, title, duration_ms, metadata, created_at, updated_at
             FROM media_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::NotFound {
            table: "media_items".into(),
            id,
        })?;
        Self::row_to_media_item(row)
    }

    fn row_to_media_item(row: sqlx::sqlite::SqliteRow) -> CatalogResult<MediaItem> {
        let source_type: String = row.try_get("source_type")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(MediaItem {
            id: row.try_get("id")?,
            library_id: row.try_get("library_id")?,
            source_type: source_type_from_str(&source_type)?,
            source_ref: row.try_get("source_ref")?,
            title: row.try_get("title")?,
            duration_ms: row.try_get("duration_ms")?,
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
            created_at: parse_ts(row.try_get("created_at")?)?,
            updated_at: parse_ts(row.try_get("updated_at")?)?,
        })
    }

    pub async fn get_library(&self, id: i64) -> CatalogResult<Library> {
        let row = sqlx::query(
            "SELECT id, name, source_type, config, last_synced_at FROM libraries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CatalogError::NotFound {
            table: "libraries".into(),
            id,
        })?;
        let source_type: String = row.try_get("source_type")?;
        let config: String = row.try_get("config")?;
        let last_synced_at: Option<String> = row.try_get("last_synced_at")?;
        Ok(Library {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            source_type: source_type_from_str(&source_type)?,
            config: serde_json::from_str(&config).unwrap_or(serde_json::Value::Null),
            last_synced_at: last_synced_at.map(|s| parse_ts(s)).transpose()?,
        })
    }

    pub async fn insert_media_item(
        &self,
        library_id: i64,
        source_type: SourceType,
        source_ref: &str,
        title: &str,
        duration_ms: i64,
        metadata: serde_json::Value,
    ) -> CatalogResult<i64> {
        let now = Utc::now().to_rfc3339();
        let id = sqlx::query(
            "INSERT INTO media_items (library_id, source_type, source_ref, title, duration_ms, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(library_id)
        .bind(source_type_to_str(source_type))
        .bind(source_ref)
        .bind(title)
        .bind(duration_ms)
        .bind(metadata.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    // ---- Collections ----------------------------------------------------

    pub async fn get_collection(&self, id: i64) -> CatalogResult<Collection> {
        let row = sqlx::query("SELECT id, name, enumerator, smart_query FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                table: "collections".into(),
                id,
            })?;
        let enumerator: String = row.try_get("enumerator")?;
        Ok(Collection {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            enumerator: parse_enumerator(&enumerator)?,
            smart_query: row.try_get("smart_query")?,
        })
    }

    /// Members of a collection in their stored `position` order. For smart
    /// collections (`smart_query` set), callers resolve membership
    /// dynamically instead — this returns the static member list only.
    pub async fn collection_members(&self, collection_id: i64) -> CatalogResult<Vec<MediaItem>> {
        let rows = sqlx::query(
            "SELECT m.id, m.library_id, m.source_type, m.source_ref, m.title, m.duration_ms, m.metadata, m.created_at, m.updated_at
             FROM media_items m
             JOIN collection_members cm ON cm.media_item_id = m.id
             WHERE cm.collection_id = ?
             ORDER BY cm.position",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_media_item).collect()
    }

    // ---- Playlists / blocks ----------------------------------------------

    pub async fn get_playlist(&self, id: i64) -> CatalogResult<Playlist> {
        let row = sqlx::query("SELECT id, name FROM playlists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CatalogError::NotFound {
                table: "playlists".into(),
                id,
            })?;
        Ok(Playlist {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }

    pub async fn list_blocks(&self, playlist_id: i64) -> CatalogResult<Vec<crate::models::Block>> {
        let rows = sqlx::query(
            "SELECT id, playlist_id, position, collection_id, schedule_mode, filler_policy
             FROM blocks WHERE playlist_id = ? ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let schedule_mode: String = row.try_get("schedule_mode")?;
                let filler_policy: String = row.try_get("filler_policy")?;
                Ok(crate::models::Block {
                    id: row.try_get("id")?,
                    playlist_id: row.try_get("playlist_id")?,
                    position: row.try_get("position")?,
                    collection_id: row.try_get("collection_id")?,
                    schedule_mode: serde_json::from_str::<ScheduleMode>(&schedule_mode)
                        .map_err(|e| CatalogError::InvariantViolation {
                            message: format!("corrupt schedule_mode: {e}"),
                        })?,
                    filler_policy: serde_json::from_str::<FillerPolicy>(&filler_policy).map_err(
                        |e| CatalogError::InvariantViolation {
                            message: format!("corrupt filler_policy: {e}"),
                        },
                    )?,
                })
            })
            .collect()
    }

    // ---- Playout state -----------------------------------------------

    pub async fn get_playout(&self, channel_id: i64) -> CatalogResult<Option<Playout>> {
        let row = sqlx::query(
            "SELECT channel_id, current_item_id, offset_ms, enumerator_state, anchor_time
             FROM playouts WHERE channel_id = ?",
        )
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let enumerator_state: String = row.try_get("enumerator_state")?;
        Ok(Some(Playout {
            channel_id: row.try_get("channel_id")?,
            current_item_id: row.try_get("current_item_id")?,
            offset_ms: row.try_get("offset_ms")?,
            enumerator_state: serde_json::from_str(&enumerator_state)
                .unwrap_or(serde_json::Value::Null),
            anchor_time: parse_ts(row.try_get("anchor_time")?)?,
        }))
    }

    /// Upsert the persisted playhead. Called at each item boundary and on
    /// shutdown per spec §3.
    pub async fn save_playout(&self, playout: &Playout) -> CatalogResult<()> {
        sqlx::query(
            "INSERT INTO playouts (channel_id, current_item_id, offset_ms, enumerator_state, anchor_time)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(channel_id) DO UPDATE SET
                current_item_id = excluded.current_item_id,
                offset_ms = excluded.offset_ms,
                enumerator_state = excluded.enumerator_state,
                anchor_time = excluded.anchor_time",
        )
        .bind(playout.channel_id)
        .bind(playout.current_item_id)
        .bind(playout.offset_ms)
        .bind(playout.enumerator_state.to_string())
        .bind(playout.anchor_time.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_ts(s: String) -> CatalogResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CatalogError::InvariantViolation {
            message: format!("corrupt timestamp '{s}': {e}"),
        })
}

fn parse_enumerator(s: &str) -> CatalogResult<Enumerator> {
    Ok(match s {
        "chronological" => Enumerator::Chronological,
        "shuffled" => Enumerator::Shuffled,
        "random" => Enumerator::Random,
        "rotating_shuffled" => Enumerator::RotatingShuffled,
        other => {
            return Err(CatalogError::InvariantViolation {
                message: format!("unknown enumerator '{other}'"),
            })
        }
    })
}

pub type SharedCatalog = Arc<CatalogStore>;
