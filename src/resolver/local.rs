//! Local file resolution: `source_ref` is a filesystem path, resolved to a
//! `file://` URI. No credentials, no expiry.

use async_trait::async_trait;
use std::path::Path;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

pub struct LocalResolver;

#[async_trait]
impl SourceResolver for LocalResolver {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    async fn resolve(
        &self,
        item: &MediaItem,
        _library: &Library,
    ) -> ResolverResult<(String, ResolvedMeta)> {
        let path = Path::new(&item.source_ref);
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(unresolvable(
                UnresolvableKind::NotFound,
                format!("local file does not exist: {}", path.display()),
            ));
        }
        let url = format!("file://{}", path.display());
        Ok((url, ResolvedMeta::default()))
    }
}
