//! Internet Archive resolution: metadata API lookup → canonical media file
//! URL. Anonymous; URLs can 404 and are refreshed by re-querying the
//! identifier rather than by token renewal.

use async_trait::async_trait;
use serde::Deserialize;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverError, ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

#[derive(Deserialize)]
struct ArchiveMetadataResponse {
    files: Vec<ArchiveFile>,
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    dir: Option<String>,
}

#[derive(Deserialize)]
struct ArchiveFile {
    name: String,
    #[serde(default)]
    format: Option<String>,
}

const PREFERRED_FORMATS: &[&str] = &["MPEG4", "h.264", "512Kb MPEG4", "Matroska"];

pub struct ArchiveOrgResolver {
    http: reqwest::Client,
}

impl ArchiveOrgResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl SourceResolver for ArchiveOrgResolver {
    fn source_type(&self) -> SourceType {
        SourceType::ArchiveOrg
    }

    async fn resolve(
        &self,
        item: &MediaItem,
        _library: &Library,
    ) -> ResolverResult<(String, ResolvedMeta)> {
        let identifier = &item.source_ref;
        let meta_url = format!("https://archive.org/metadata/{identifier}");

        let resp = self
            .http
            .get(&meta_url)
            .send()
            .await
            .map_err(|e| ResolverError::Transient {
                source_type: "archive_org".into(),
                message: e.to_string(),
            })?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(unresolvable(
                UnresolvableKind::NotFound,
                format!("identifier {identifier} not found on archive.org"),
            ));
        }
        if !resp.status().is_success() {
            return Err(unresolvable(
                UnresolvableKind::UpstreamDown,
                format!("archive.org metadata API returned {}", resp.status()),
            ));
        }

        let body: ArchiveMetadataResponse =
            resp.json().await.map_err(|e| ResolverError::Transient {
                source_type: "archive_org".into(),
                message: format!("malformed metadata response: {e}"),
            })?;

        let server = body
            .server
            .ok_or_else(|| unresolvable(UnresolvableKind::Invalid, "metadata missing server"))?;
        let dir = body
            .dir
            .ok_or_else(|| unresolvable(UnresolvableKind::Invalid, "metadata missing dir"))?;

        let file = PREFERRED_FORMATS
            .iter()
            .find_map(|fmt| body.files.iter().find(|f| f.format.as_deref() == Some(fmt)))
            .or_else(|| body.files.first())
            .ok_or_else(|| unresolvable(UnresolvableKind::NotFound, "no playable files in item"))?;

        let url = format!("https://{server}{dir}/{}", file.name);
        Ok((url, ResolvedMeta::default()))
    }
}
