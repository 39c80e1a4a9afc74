//! Jellyfin/Emby resolution: `{base_url}/Videos/{id}/stream?api_key=…`.
//! The two share a wire format closely enough to use one resolver.

use async_trait::async_trait;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverError, ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

pub struct JellyfinEmbyResolver {
    http: reqwest::Client,
}

impl JellyfinEmbyResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceResolver for JellyfinEmbyResolver {
    fn source_type(&self) -> SourceType {
        SourceType::Jellyfin
    }

    async fn resolve(
        &self,
        item: &MediaItem,
        library: &Library,
    ) -> ResolverResult<(String, ResolvedMeta)> {
        let base_url = library
            .config
            .get("base_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| unresolvable(UnresolvableKind::Invalid, "library missing base_url"))?;
        let api_key = library
            .config
            .get("api_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| unresolvable(UnresolvableKind::Auth, "library missing api_key"))?;

        let url = format!(
            "{}/Videos/{}/stream?api_key={}",
            base_url.trim_end_matches('/'),
            item.source_ref,
            api_key
        );

        let resp = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(|e| ResolverError::Transient {
                source_type: "jellyfin_emby".into(),
                message: e.to_string(),
            })?;

        match resp.status().as_u16() {
            200..=299 => Ok((url, ResolvedMeta::default())),
            401 | 403 => Err(unresolvable(UnresolvableKind::Auth, "API key rejected")),
            404 => Err(unresolvable(UnresolvableKind::NotFound, "item not found")),
            503 => Err(unresolvable(UnresolvableKind::UpstreamDown, "server unavailable")),
            other => Err(ResolverError::Transient {
                source_type: "jellyfin_emby".into(),
                message: format!("unexpected status {other}"),
            }),
        }
    }
}
