//! Plex resolution: `{base_url}/library/parts/{partKey}?X-Plex-Token=…`.

use async_trait::async_trait;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverError, ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

pub struct PlexResolver {
    http: reqwest::Client,
}

impl PlexResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceResolver for PlexResolver {
    fn source_type(&self) -> SourceType {
        SourceType::Plex
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
        let token = library
            .config
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| unresolvable(UnresolvableKind::Auth, "library missing Plex token"))?;

        let url = format!(
            "{}/library/parts/{}?X-Plex-Token={}",
            base_url.trim_end_matches('/'),
            item.source_ref,
            token
        );

        let resp = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(|e| ResolverError::Transient {
                source_type: "plex".into(),
                message: e.to_string(),
            })?;

        match resp.status().as_u16() {
            200..=299 => Ok((url, ResolvedMeta::default())),
            401 | 403 => Err(unresolvable(UnresolvableKind::Auth, "Plex token rejected")),
            404 => Err(unresolvable(UnresolvableKind::NotFound, "Plex part not found")),
            503 => Err(unresolvable(UnresolvableKind::UpstreamDown, "Plex server unavailable")),
            other => Err(ResolverError::Transient {
                source_type: "plex".into(),
                message: format!("unexpected status {other}"),
            }),
        }
    }
}
