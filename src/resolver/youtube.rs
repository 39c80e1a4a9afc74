//! YouTube resolution: direct stream URL extracted via an external
//! extractor subprocess (`yt-dlp`). Extracted URLs are short-lived
//! (seconds to hours) and are refreshed on failure rather than cached
//! long-term, per spec §4.3.

use async_trait::async_trait;
use tokio::process::Command;

use super::{unresolvable, ResolvedMeta, SourceResolver};
use crate::errors::{ResolverError, ResolverResult, UnresolvableKind};
use crate::models::{Library, MediaItem, SourceType};

pub struct YoutubeResolver {
    extractor_command: String,
}

impl YoutubeResolver {
    pub fn new() -> Self {
        Self {
            extractor_command: "yt-dlp".to_string(),
        }
    }
}

#[async_trait]
impl SourceResolver for YoutubeResolver {
    fn source_type(&self) -> SourceType {
        SourceType::Youtube
    }

    async fn resolve(
        &self,
        item: &MediaItem,
        library: &Library,
    ) -> ResolverResult<(String, ResolvedMeta)> {
        let video_id = &item.source_ref;
        let mut cmd = Command::new(&self.extractor_command);
        cmd.arg("-f").arg("best").arg("-g");
        if let Some(cookie_jar) = library.config.get("cookie_jar").and_then(|v| v.as_str()) {
            cmd.arg("--cookies").arg(cookie_jar);
        }
        cmd.arg(format!("https://www.youtube.com/watch?v={video_id}"));

        let output = cmd.output().await.map_err(|e| ResolverError::Transient {
            source_type: "youtube".into(),
            message: format!("failed to spawn extractor: {e}"),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("Private video") || stderr.contains("This video is unavailable") {
                return Err(unresolvable(UnresolvableKind::NotFound, stderr.to_string()));
            }
            if stderr.contains("Sign in") {
                return Err(unresolvable(UnresolvableKind::Auth, stderr.to_string()));
            }
            return Err(ResolverError::Transient {
                source_type: "youtube".into(),
                message: stderr.to_string(),
            });
        }

        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if url.is_empty() {
            return Err(unresolvable(
                UnresolvableKind::Invalid,
                "extractor returned no URL",
            ));
        }

        Ok((
            url,
            ResolvedMeta {
                expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                container_hint: None,
            },
        ))
    }
}
