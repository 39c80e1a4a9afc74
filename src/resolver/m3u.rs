//! M3U resolution: the stored URL is already the playable URL. Opaque
//! upstream credentials (if any) are baked into the URL itself.

use async_trait::async_trait;
use url::Url;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

pub struct M3uResolver;

#[async_trait]
impl SourceResolver for M3uResolver {
    fn source_type(&self) -> SourceType {
        SourceType::M3u
    }

    async fn resolve(
        &self,
        item: &MediaItem,
        _library: &Library,
    ) -> ResolverResult<(String, ResolvedMeta)> {
        Url::parse(&item.source_ref)
            .map(|url| (url.to_string(), ResolvedMeta::default()))
            .map_err(|e| unresolvable(UnresolvableKind::Invalid, format!("malformed m3u url: {e}")))
    }
}
