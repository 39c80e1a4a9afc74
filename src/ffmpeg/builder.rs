//! Staged ffmpeg argument-vector construction, generalizing the teacher's
//! `FFmpegCommandBuilder::build_args` helper-call pipeline.

use super::HwAccel;

/// Source stream characteristics relevant to the copy-vs-transcode
/// decision, as produced by an `ffprobe` pass.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub container: String,
}

/// The target output profile a channel is configured for.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    pub video_codec: String,
    pub resolution: Option<(u32, u32)>,
    pub audio_codec: String,
    pub video_bitrate_kbps: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Copy,
    Transcode,
}

pub struct CommandBuilder {
    pub ffmpeg_command: String,
    pub hwaccel: Option<HwAccel>,
}

impl CommandBuilder {
    pub fn new(ffmpeg_command: String, hwaccel: Option<HwAccel>) -> Self {
        Self {
            ffmpeg_command,
            hwaccel,
        }
    }

    /// Video-only copy-vs-transcode decision; drives hwaccel selection and
    /// the bitstream-filter workaround, both of which only apply to video.
    pub fn decide_mode(source: &SourceProfile, target: &TargetProfile) -> PipelineMode {
        if source.video_codec == target.video_codec && target.resolution.is_none() {
            PipelineMode::Copy
        } else {
            PipelineMode::Transcode
        }
    }

    /// Audio is decided independently of video: a source whose video matches
    /// the target can still carry audio (e.g. AC3/DTS) that must be
    /// transcoded to the target's codec, and vice versa.
    fn decide_audio_mode(source: &SourceProfile, target: &TargetProfile) -> PipelineMode {
        match &source.audio_codec {
            Some(codec) if codec == &target.audio_codec => PipelineMode::Copy,
            _ => PipelineMode::Transcode,
        }
    }

    /// Build the full argument vector for one ffmpeg invocation.
    ///
    /// `seek_offset_ms`, when set, seeks to the nearest keyframe before the
    /// offset then discards forward to the exact offset (`-ss` before and
    /// after `-i`), per spec §4.4's resume precision requirement.
    pub fn build_args(
        &self,
        input_url: &str,
        source: &SourceProfile,
        target: &TargetProfile,
        seek_offset_ms: Option<i64>,
        is_live: bool,
    ) -> Vec<String> {
        let mode = Self::decide_mode(source, target);
        let mut args = Vec::new();

        self.add_hwaccel_args(&mut args, mode);
        self.add_input_args(&mut args, input_url, source, seek_offset_ms, is_live);
        self.add_seek_discard_args(&mut args, seek_offset_ms);
        self.add_codec_args(&mut args, mode, source, target);
        self.add_bitstream_filters(&mut args, source, mode);
        self.add_transport_stream_args(&mut args);

        args
    }

    fn add_hwaccel_args(&self, args: &mut Vec<String>, mode: PipelineMode) {
        if mode != PipelineMode::Transcode {
            return;
        }
        if let Some(hwaccel) = self.hwaccel {
            args.push("-hwaccel".into());
            args.push(hwaccel.ffmpeg_flag().into());
        }
    }

    fn add_input_args(
        &self,
        args: &mut Vec<String>,
        input_url: &str,
        source: &SourceProfile,
        seek_offset_ms: Option<i64>,
        is_live: bool,
    ) {
        if !is_live {
            // Real-time pacing for pre-recorded content.
            args.push("-re".into());
        }
        args.push("-fflags".into());
        args.push("+genpts+discardcorrupt+igndts".into());

        let timeout_secs = if source.container.eq_ignore_ascii_case("plex")
            || source.container.eq_ignore_ascii_case("archive_org")
        {
            60
        } else {
            30
        };
        args.push("-timeout".into());
        args.push((timeout_secs * 1_000_000).to_string());

        if let Some(offset_ms) = seek_offset_ms {
            // Seek to the nearest keyframe before the offset; the exact
            // offset is reached by discarding forward post-demux below.
            let keyframe_seek = (offset_ms / 1000).max(0);
            args.push("-ss".into());
            args.push(keyframe_seek.to_string());
        }

        args.push("-i".into());
        args.push(input_url.to_string());
    }

    fn add_seek_discard_args(&self, args: &mut Vec<String>, seek_offset_ms: Option<i64>) {
        if let Some(offset_ms) = seek_offset_ms {
            let fine_seek_secs = (offset_ms % 1000) as f64 / 1000.0;
            if fine_seek_secs > 0.0 {
                args.push("-ss".into());
                args.push(format!("{fine_seek_secs:.3}"));
            }
        }
    }

    fn add_codec_args(
        &self,
        args: &mut Vec<String>,
        mode: PipelineMode,
        source: &SourceProfile,
        target: &TargetProfile,
    ) {
        match mode {
            PipelineMode::Copy => {
                args.push("-c:v".into());
                args.push("copy".into());
            }
            PipelineMode::Transcode => {
                args.push("-c:v".into());
                args.push(target.video_codec.clone());
                if let Some((w, h)) = target.resolution {
                    args.push("-vf".into());
                    args.push(format!("scale={w}:{h}"));
                }
                if let Some(kbps) = target.video_bitrate_kbps {
                    args.push("-b:v".into());
                    args.push(format!("{kbps}k"));
                }
            }
        }

        match Self::decide_audio_mode(source, target) {
            PipelineMode::Copy => {
                args.push("-c:a".into());
                args.push("copy".into());
            }
            PipelineMode::Transcode => {
                args.push("-c:a".into());
                args.push(target.audio_codec.clone());
            }
        }
    }

    fn add_bitstream_filters(
        &self,
        args: &mut Vec<String>,
        source: &SourceProfile,
        mode: PipelineMode,
    ) {
        let source_is_mp4_like = matches!(
            source.container.to_ascii_lowercase().as_str(),
            "mp4" | "mov" | "m4v"
        );
        if mode == PipelineMode::Copy && source_is_mp4_like {
            args.push("-bsf:v".into());
            args.push("h264_mp4toannexb,dump_extra".into());
        }
    }

    fn add_transport_stream_args(&self, args: &mut Vec<String>) {
        args.push("-f".into());
        args.push("mpegts".into());
        args.push("pipe:1".into());
    }
}
