//! `ffprobe` invocation producing the [`SourceProfile`] the command builder
//! needs to decide copy vs. transcode.

use serde::Deserialize;

use super::builder::SourceProfile;
use crate::errors::{FfmpegError, FfmpegResult};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    streams: Vec<ProbeStream>,
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: String,
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    format_name: String,
}

pub async fn probe_source(ffprobe_command: &str, url: &str) -> FfmpegResult<SourceProfile> {
    let output = tokio::process::Command::new(ffprobe_command)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
            url,
        ])
        .output()
        .await
        .map_err(FfmpegError::Spawn)?;

    if !output.status.success() {
        return Err(FfmpegError::ProbeFailed {
            url: url.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let parsed: ProbeOutput = serde_json::from_slice(&output.stdout).map_err(|e| FfmpegError::ProbeFailed {
        url: url.to_string(),
        message: format!("malformed ffprobe json: {e}"),
    })?;

    let video_codec = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .and_then(|s| s.codec_name.clone())
        .ok_or_else(|| FfmpegError::ProbeFailed {
            url: url.to_string(),
            message: "no video stream found".to_string(),
        })?;

    let audio_codec = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .and_then(|s| s.codec_name.clone());

    let container = parsed
        .format
        .format_name
        .split(',')
        .next()
        .unwrap_or(&parsed.format.format_name)
        .to_string();

    Ok(SourceProfile {
        video_codec,
        audio_codec,
        container,
    })
}
