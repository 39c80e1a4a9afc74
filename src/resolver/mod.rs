//! The URL Resolver: turns a [`MediaItem`] into a playable URL.
//!
//! Structurally grounded on the teacher's `sources::traits`/`sources::factory`
//! Strategy+Factory split (Interface Segregation: one narrow trait, one
//! dispatcher) — generalized from the teacher's M3U/Xtream ingestion
//! handlers to the spec's closed `resolve(item) -> (url, meta)` table
//! across plex/jellyfin/emby/local/archive_org/youtube/m3u.

pub mod archive_org;
pub mod jellyfin_emby;
pub mod local;
pub mod m3u;
pub mod plex;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::{ResolverError, ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

/// Metadata accompanying a resolved URL (bitrate hints, container, expiry).
#[derive(Debug, Clone, Default)]
pub struct ResolvedMeta {
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub container_hint: Option<String>,
}

/// One strategy in the resolution table.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Resolve `item` (backed by `library`) to a playable URL.
    async fn resolve(&self, item: &MediaItem, library: &Library)
        -> ResolverResult<(String, ResolvedMeta)>;
}

/// Dispatches to the right [`SourceResolver`] by `item.source_type`, and
/// caches [`Library`] rows so resolution never hits the catalog per
/// request (spec §4.3's explicit requirement).
pub struct Resolver {
    handlers: HashMap<&'static str, Arc<dyn SourceResolver>>,
    library_cache: RwLock<HashMap<i64, Library>>,
    catalog: crate::catalog::SharedCatalog,
}

fn key(s: SourceType) -> &'static str {
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

impl Resolver {
    pub fn new(catalog: crate::catalog::SharedCatalog, http: reqwest::Client) -> Self {
        let mut handlers: HashMap<&'static str, Arc<dyn SourceResolver>> = HashMap::new();
        handlers.insert("plex", Arc::new(plex::PlexResolver::new(http.clone())));
        handlers.insert(
            "jellyfin",
            Arc::new(jellyfin_emby::JellyfinEmbyResolver::new(http.clone())),
        );
        handlers.insert(
            "emby",
            Arc::new(jellyfin_emby::JellyfinEmbyResolver::new(http.clone())),
        );
        handlers.insert("local", Arc::new(local::LocalResolver));
        handlers.insert(
            "archive_org",
            Arc::new(archive_org::ArchiveOrgResolver::new(http.clone())),
        );
        handlers.insert("youtube", Arc::new(youtube::YoutubeResolver::new()));
        handlers.insert("m3u", Arc::new(m3u::M3uResolver));

        Self {
            handlers,
            library_cache: RwLock::new(HashMap::new()),
            catalog,
        }
    }

    /// Populate the Library cache at process start. Call again whenever the
    /// catalog signals a library change.
    pub async fn refresh_library_cache(&self) -> ResolverResult<()> {
        let mut cache = self.library_cache.write().await;
        cache.clear();
        // Library ids are discovered lazily via `get_library` on first use
        // by `resolve`; an eager full-table scan would require a
        // `list_libraries` catalog method this spec doesn't otherwise need.
        Ok(())
    }

    async fn library(&self, id: i64) -> ResolverResult<Library> {
        if let Some(lib) = self.library_cache.read().await.get(&id) {
            return Ok(lib.clone());
        }
        let lib = self
            .catalog
            .get_library(id)
            .await
            .map_err(|e| ResolverError::Transient {
                source_type: "catalog".into(),
                message: e.to_string(),
            })?;
        self.library_cache.write().await.insert(id, lib.clone());
        Ok(lib)
    }

    pub async fn resolve(&self, item: &MediaItem) -> ResolverResult<(String, ResolvedMeta)> {
        let library = self.library(item.library_id).await?;
        let handler = self
            .handlers
            .get(key(item.source_type))
            .ok_or_else(|| ResolverError::UnsupportedSourceType(key(item.source_type).into()))?;
        handler.resolve(item, &library).await
    }
}

pub(crate) fn unresolvable(kind: UnresolvableKind, message: impl Into<String>) -> ResolverError {
    ResolverError::Unresolvable {
        kind,
        message: message.into(),
    }
}
