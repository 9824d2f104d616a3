// src/services/ffmpeg.rs
//! FFmpeg-backed muxer: clip concatenation, narration/BGM mixing with
//! last-frame padding, and ffprobe duration lookups.

use super::{ClipKind, MediaClip, MixRequest, Muxer, ServiceResult};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    work_dir: PathBuf,
    width: u32,
    height: u32,
    fps: u32,
}

impl FfmpegMuxer {
    pub fn new(work_dir: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            work_dir: work_dir.into(),
            width,
            height,
            fps: 24,
        }
    }

    /// Parse a `WIDTHxHEIGHT` size string, falling back to vertical 1080p.
    pub fn from_size(work_dir: impl Into<PathBuf>, size: &str) -> Self {
        let (w, h) = parse_size(size).unwrap_or((1080, 1920));
        Self::new(work_dir, w, h)
    }

    async fn output_path(&self, kind: &str) -> ServiceResult<PathBuf> {
        let dir = self.work_dir.join(kind);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir.join(format!("{}.mp4", Uuid::new_v4().simple())))
    }
}

pub fn parse_size(size: &str) -> Option<(u32, u32)> {
    let (w, h) = size.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// Execute FFmpeg with error handling
pub async fn execute_ffmpeg_command(args: &[String]) -> ServiceResult<String> {
    tracing::debug!("Executing FFmpeg: ffmpeg {}", args.join(" "));

    let output = Command::new("ffmpeg")
        .args(args)
        .output()
        .await
        .map_err(|e| CollaboratorError::Permanent(format!("Failed to execute FFmpeg: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CollaboratorError::Permanent(format!("FFmpeg error: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Execute FFprobe for media analysis
pub async fn execute_ffprobe_command(args: &[&str]) -> ServiceResult<String> {
    let output = Command::new("ffprobe")
        .args(args)
        .output()
        .await
        .map_err(|e| CollaboratorError::Permanent(format!("Failed to execute FFprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CollaboratorError::Permanent(format!("FFprobe error: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Read `format.duration` out of ffprobe's JSON output.
pub fn parse_probe_duration(json: &str) -> ServiceResult<f64> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| CollaboratorError::Parse(format!("Failed to parse ffprobe output: {}", e)))?;
    value["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| CollaboratorError::Parse("ffprobe output has no duration".to_string()))
}

/// Arguments for concatenating clips into one normalized H.264 stream.
pub fn concat_args(clips: &[MediaClip], output: &Path, width: u32, height: u32, fps: u32) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    for clip in clips {
        if clip.kind == ClipKind::Still {
            args.extend(["-loop".into(), "1".into(), "-t".into(), format!("{:.3}", clip.duration)]);
        }
        args.extend(["-i".into(), clip.uri.clone()]);
    }

    let mut filter = String::new();
    for i in 0..clips.len() {
        filter.push_str(&format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}];",
            i = i,
            w = width,
            h = height,
            fps = fps
        ));
    }
    for i in 0..clips.len() {
        filter.push_str(&format!("[v{}]", i));
    }
    filter.push_str(&format!("concat=n={}:v=1:a=0[outv]", clips.len()));

    args.extend([
        "-filter_complex".into(),
        filter,
        "-map".into(),
        "[outv]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "medium".into(),
        "-crf".into(),
        "23".into(),
        "-y".into(),
        output.to_string_lossy().to_string(),
    ]);
    args
}

/// Arguments for laying narration (and optional looped BGM) onto a video.
///
/// The video is extended by cloning its last frame for `pad_video_secs`; the
/// narration is never cut.
pub fn mix_args(request: &MixRequest, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-i".into(),
        request.video.clone(),
        "-i".into(),
        request.voice.clone(),
    ];
    if let Some(bgm) = &request.bgm {
        args.extend(["-stream_loop".into(), "-1".into(), "-i".into(), bgm.clone()]);
    }

    let mut filters: Vec<String> = Vec::new();
    let video_map = if request.pad_video_secs > 0.0 {
        filters.push(format!(
            "[0:v]tpad=stop_mode=clone:stop_duration={:.3}[v]",
            request.pad_video_secs
        ));
        "[v]".to_string()
    } else {
        "0:v".to_string()
    };
    let audio_map = if request.bgm.is_some() {
        filters.push(format!(
            "[2:a]volume={:.3}[bgm];[1:a][bgm]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[a]",
            request.bgm_volume
        ));
        "[a]".to_string()
    } else {
        "1:a".to_string()
    };

    if !filters.is_empty() {
        args.extend(["-filter_complex".into(), filters.join(";")]);
    }
    args.extend(["-map".into(), video_map, "-map".into(), audio_map]);

    if request.pad_video_secs > 0.0 {
        args.extend(["-c:v".into(), "libx264".into(), "-preset".into(), "medium".into(), "-crf".into(), "23".into()]);
    } else {
        args.extend(["-c:v".into(), "copy".into()]);
    }
    args.extend(["-c:a".into(), "aac".into(), "-y".into(), output.to_string_lossy().to_string()]);
    args
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn probe_duration(&self, uri: &str) -> ServiceResult<f64> {
        let args = ["-v", "quiet", "-print_format", "json", "-show_format", uri];
        let out = execute_ffprobe_command(&args).await?;
        parse_probe_duration(&out)
    }

    async fn concat(&self, clips: &[MediaClip]) -> ServiceResult<String> {
        if clips.is_empty() {
            return Err(CollaboratorError::Permanent("No clips to concatenate".to_string()));
        }
        let output = self.output_path("composed").await?;
        let args = concat_args(clips, &output, self.width, self.height, self.fps);
        execute_ffmpeg_command(&args).await?;

        tracing::info!("🎬 Concatenated {} clips into {}", clips.len(), output.display());
        Ok(output.to_string_lossy().to_string())
    }

    async fn mix(&self, request: &MixRequest) -> ServiceResult<String> {
        let output = self.output_path("final").await?;
        let args = mix_args(request, &output);
        execute_ffmpeg_command(&args).await?;

        tracing::info!("🎧 Mixed narration into {}", output.display());
        Ok(output.to_string_lossy().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pad: f64, bgm: Option<&str>) -> MixRequest {
        MixRequest {
            video: "v.mp4".to_string(),
            voice: "n.mp3".to_string(),
            bgm: bgm.map(String::from),
            bgm_volume: 0.2,
            pad_video_secs: pad,
        }
    }

    #[test]
    fn test_mix_pads_last_frame() {
        let args = mix_args(&request(1.4, None), Path::new("out.mp4"));
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert_eq!(filter, "[0:v]tpad=stop_mode=clone:stop_duration=1.400[v]");
        assert!(args.contains(&"libx264".to_string()));
        assert!(!args.contains(&"-shortest".to_string()), "narration must never be trimmed");
    }

    #[test]
    fn test_mix_without_pad_copies_video() {
        let args = mix_args(&request(0.0, None), Path::new("out.mp4"));
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
    }

    #[test]
    fn test_mix_loops_bgm_at_low_volume() {
        let args = mix_args(&request(0.0, Some("bgm.mp3")), Path::new("out.mp4"));
        assert!(args.windows(4).any(|w| w == ["-stream_loop", "-1", "-i", "bgm.mp3"]));
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.contains("[2:a]volume=0.200[bgm]"));
        assert!(filter.contains("duration=first"));
    }

    #[test]
    fn test_concat_holds_stills_for_scene_duration() {
        let clips = vec![
            MediaClip { uri: "a.mp4".into(), kind: ClipKind::Video, duration: 2.0 },
            MediaClip { uri: "b.png".into(), kind: ClipKind::Still, duration: 3.5 },
        ];
        let args = concat_args(&clips, Path::new("o.mp4"), 1080, 1920, 24);
        assert_eq!(&args[..2], ["-i", "a.mp4"]);
        assert_eq!(&args[2..8], ["-loop", "1", "-t", "3.500", "-i", "b.png"]);
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert!(filter.ends_with("[v0][v1]concat=n=2:v=1:a=0[outv]"));
    }

    #[test]
    fn test_parse_probe_duration() {
        assert_eq!(parse_probe_duration(r#"{"format":{"duration":"4.200000"}}"#).unwrap(), 4.2);
        assert!(parse_probe_duration(r#"{"format":{}}"#).is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1080x1920"), Some((1080, 1920)));
        assert_eq!(parse_size("wide"), None);
    }
}
