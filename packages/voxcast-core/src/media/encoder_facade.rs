//! Thin async wrapper around the `ffmpeg`/`ffprobe` subprocesses.
//!
//! Every media operation the Clip Planner, Generation Service, and Cache
//! Service need is a method here; nothing upstream runs `Command` directly.
//! Probed durations are memoized per absolute path, with in-flight probes of
//! the same path deduplicated onto a single subprocess via
//! [`tokio::sync::OnceCell`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::process::Command;
use tokio::sync::OnceCell;

use crate::error::{AppError, AppResult};
use crate::protocol_constants::{DEFAULT_FFPROBE_TIMEOUT_MS, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};

/// Resolution, frame rate, codec, and pixel format of a video file, as
/// reported by ffprobe. A preset's motion clips are expected to share one of
/// these; mismatches are reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoSpec {
    pub width: u32,
    pub height: u32,
    pub frame_rate: String,
    pub codec_name: String,
    pub pix_fmt: String,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    pix_fmt: Option<String>,
    #[serde(default)]
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

/// Subprocess-backed implementation of the Encoder Facade.
pub struct EncoderFacade {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
    ffprobe_timeout_ms: u64,
    video_duration_cache: DashMap<PathBuf, Arc<OnceCell<u32>>>,
    audio_duration_cache: DashMap<PathBuf, Arc<OnceCell<u32>>>,
}

impl EncoderFacade {
    pub fn new(ffmpeg_bin: PathBuf, ffprobe_bin: PathBuf) -> Self {
        Self {
            ffmpeg_bin,
            ffprobe_bin,
            ffprobe_timeout_ms: DEFAULT_FFPROBE_TIMEOUT_MS,
            video_duration_cache: DashMap::new(),
            audio_duration_cache: DashMap::new(),
        }
    }

    pub fn with_ffprobe_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ffprobe_timeout_ms = timeout_ms;
        self
    }

    /// Verifies `ffmpeg -version` and `ffprobe -version` both run, failing
    /// fast at startup rather than on the first generated clip.
    pub async fn ensure_available(&self) -> AppResult<()> {
        for (label, bin) in [("ffmpeg", &self.ffmpeg_bin), ("ffprobe", &self.ffprobe_bin)] {
            let status = Command::new(bin)
                .arg("-version")
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await
                .map_err(|e| AppError::Dependency(format!("{label} not runnable at {bin:?}: {e}")))?;
            if !status.success() {
                return Err(AppError::Dependency(format!("{label} -version exited with {status}")));
            }
        }
        Ok(())
    }

    async fn run_ffprobe_json(&self, args: &[&str]) -> AppResult<FfprobeOutput> {
        let timeout = std::time::Duration::from_millis(self.ffprobe_timeout_ms);
        let output = tokio::time::timeout(timeout, Command::new(&self.ffprobe_bin).args(args).output())
            .await
            .map_err(|_| AppError::Dependency("ffprobe timed out".to_string()))?
            .map_err(|e| AppError::Dependency(format!("spawning ffprobe: {e}")))?;
        if !output.status.success() {
            return Err(AppError::Dependency(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| AppError::Dependency(format!("parsing ffprobe output: {e}")))
    }

    async fn run_ffmpeg(&self, args: &[std::ffi::OsString]) -> AppResult<()> {
        let output = Command::new(&self.ffmpeg_bin)
            .args(args)
            .output()
            .await
            .map_err(|e| AppError::Dependency(format!("spawning ffmpeg: {e}")))?;
        if !output.status.success() {
            return Err(AppError::Dependency(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn parse_duration_ms(raw: Option<String>) -> Option<u32> {
        raw.and_then(|s| s.parse::<f64>().ok()).map(|secs| (secs * 1000.0).round() as u32)
    }

    async fn probe_duration_ms(&self, path: &Path, stream_selector: &str) -> AppResult<u32> {
        let path_str = path.to_string_lossy().to_string();
        let output = self
            .run_ffprobe_json(&[
                "-v",
                "error",
                "-select_streams",
                stream_selector,
                "-show_entries",
                "format=duration",
                "-of",
                "json",
                &path_str,
            ])
            .await?;
        Self::parse_duration_ms(output.format.and_then(|f| f.duration))
            .ok_or_else(|| AppError::Dependency(format!("no duration reported for {path:?}")))
    }

    /// Probed, memoized video duration in milliseconds. Concurrent probes of
    /// the same path share one ffprobe invocation.
    pub async fn probe_video_duration(&self, path: &Path) -> AppResult<u32> {
        let cell = self
            .video_duration_cache
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| self.probe_duration_ms(path, "v:0")).await.copied()
    }

    /// Probed, memoized audio duration in milliseconds.
    pub async fn probe_audio_duration(&self, path: &Path) -> AppResult<u32> {
        let cell = self
            .audio_duration_cache
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(|| self.probe_duration_ms(path, "a:0")).await.copied()
    }

    /// Whether `path` has at least one audio stream.
    pub async fn has_audio_stream(&self, path: &Path) -> AppResult<bool> {
        let path_str = path.to_string_lossy().to_string();
        let output = self
            .run_ffprobe_json(&[
                "-v",
                "error",
                "-select_streams",
                "a",
                "-show_entries",
                "stream=codec_type",
                "-of",
                "json",
                &path_str,
            ])
            .await?;
        Ok(!output.streams.is_empty())
    }

    /// Resolution, frame rate, codec and pixel format of `path`'s first
    /// video stream.
    pub async fn get_video_spec(&self, path: &Path) -> AppResult<VideoSpec> {
        let path_str = path.to_string_lossy().to_string();
        let output = self
            .run_ffprobe_json(&[
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,codec_name,pix_fmt,codec_type",
                "-of",
                "json",
                &path_str,
            ])
            .await?;
        let stream = output
            .streams
            .into_iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| AppError::Dependency(format!("no video stream in {path:?}")))?;
        Ok(VideoSpec {
            width: stream.width.unwrap_or_default(),
            height: stream.height.unwrap_or_default(),
            frame_rate: stream.r_frame_rate.unwrap_or_default(),
            codec_name: stream.codec_name.unwrap_or_default(),
            pix_fmt: stream.pix_fmt.unwrap_or_default(),
        })
    }

    fn arg(s: impl Into<String>) -> std::ffi::OsString {
        std::ffi::OsString::from(s.into())
    }

    fn path_arg(p: &Path) -> std::ffi::OsString {
        p.as_os_str().to_owned()
    }

    /// Generates `duration_ms` of digital silence at the output sample rate
    /// and channel layout.
    pub async fn create_silent_audio(&self, out: &Path, duration_ms: u32) -> AppResult<()> {
        let duration_secs = duration_ms as f64 / 1000.0;
        let args = vec![
            Self::arg("-y"),
            Self::arg("-f"),
            Self::arg("lavfi"),
            Self::arg("-i"),
            Self::arg(format!(
                "anullsrc=channel_layout=stereo:sample_rate={OUTPUT_SAMPLE_RATE}"
            )),
            Self::arg("-t"),
            Self::arg(format!("{duration_secs:.3}")),
            Self::arg("-ac"),
            Self::arg(OUTPUT_CHANNELS.to_string()),
            Self::path_arg(out),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Loudness-normalizes `input` to `output` via the `loudnorm` filter.
    pub async fn normalize_audio(&self, input: &Path, output: &Path) -> AppResult<()> {
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(input),
            Self::arg("-af"),
            Self::arg("loudnorm"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Trims leading/trailing silence below `threshold_db`.
    pub async fn trim_audio_silence(&self, input: &Path, output: &Path, threshold_db: f32) -> AppResult<()> {
        let filter = format!(
            "silenceremove=start_periods=1:start_threshold={threshold_db}dB:detection=peak,\
             areverse,silenceremove=start_periods=1:start_threshold={threshold_db}dB:detection=peak,areverse"
        );
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(input),
            Self::arg("-af"),
            Self::arg(filter),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Pads with silence or trims `input` so its duration is exactly
    /// `target_ms`.
    pub async fn fit_audio_duration(&self, input: &Path, output: &Path, target_ms: u32) -> AppResult<()> {
        let target_secs = target_ms as f64 / 1000.0;
        let filter = format!("apad,atrim=0:{target_secs:.3}");
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(input),
            Self::arg("-af"),
            Self::arg(filter),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Concatenates audio files back-to-back via the concat filter.
    pub async fn concat_audio(&self, inputs: &[PathBuf], output: &Path) -> AppResult<()> {
        if inputs.is_empty() {
            return Err(AppError::Internal("concat_audio called with no inputs".to_string()));
        }
        let mut args = vec![Self::arg("-y")];
        for input in inputs {
            args.push(Self::arg("-i"));
            args.push(Self::path_arg(input));
        }
        let filter = format!(
            "{}concat=n={}:v=0:a=1[out]",
            (0..inputs.len()).map(|i| format!("[{i}:a]")).collect::<String>(),
            inputs.len()
        );
        args.push(Self::arg("-filter_complex"));
        args.push(Self::arg(filter));
        args.push(Self::arg("-map"));
        args.push(Self::arg("[out]"));
        args.push(Self::path_arg(output));
        self.run_ffmpeg(&args).await
    }

    /// Extracts the audio track from a video file. Returns
    /// [`AppError::NotFound`] if the source has no audio stream.
    pub async fn extract_audio_track(&self, video_input: &Path, output: &Path) -> AppResult<()> {
        if !self.has_audio_stream(video_input).await? {
            return Err(AppError::NotFound(format!("{video_input:?} has no audio track")));
        }
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(video_input),
            Self::arg("-vn"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Extracts `video_input`'s audio track if present, otherwise synthesizes
    /// `target_ms` of silence — the source clip never goes without an audio
    /// stream to mix against downstream.
    pub async fn ensure_audio_track(&self, video_input: &Path, output: &Path, target_ms: u32) -> AppResult<()> {
        match self.extract_audio_track(video_input, output).await {
            Ok(()) => Ok(()),
            Err(AppError::NotFound(_)) => self.create_silent_audio(output, target_ms).await,
            Err(other) => Err(other),
        }
    }

    /// Concatenates the video clips named in `playlist` (an ffconcat file,
    /// see [`crate::media::playlist`]) by stream-copy, dropping audio.
    pub async fn concat_video(&self, playlist: &Path, output: &Path) -> AppResult<()> {
        let args = vec![
            Self::arg("-y"),
            Self::arg("-f"),
            Self::arg("concat"),
            Self::arg("-safe"),
            Self::arg("0"),
            Self::arg("-i"),
            Self::path_arg(playlist),
            Self::arg("-an"),
            Self::arg("-c:v"),
            Self::arg("copy"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Mixes two audio tracks with `amix`, matching the combined-audio branch
    /// of [`Self::compose`]: both inputs audible, normalized against clipping,
    /// length set by the longer of the two.
    pub async fn mix_audio(&self, a: &Path, b: &Path, output: &Path) -> AppResult<()> {
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(a),
            Self::arg("-i"),
            Self::path_arg(b),
            Self::arg("-filter_complex"),
            Self::arg("amix=inputs=2:duration=longest:normalize=0"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Extracts `[start_ms, start_ms + duration_ms)` from `input` by
    /// stream-copy.
    pub async fn extract_segment(&self, input: &Path, output: &Path, start_ms: u32, duration_ms: u32) -> AppResult<()> {
        let start_secs = start_ms as f64 / 1000.0;
        let duration_secs = duration_ms as f64 / 1000.0;
        let args = vec![
            Self::arg("-y"),
            Self::arg("-ss"),
            Self::arg(format!("{start_secs:.3}")),
            Self::arg("-i"),
            Self::path_arg(input),
            Self::arg("-t"),
            Self::arg(format!("{duration_secs:.3}")),
            Self::arg("-c"),
            Self::arg("copy"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Muxes a video-only and audio-only file into one MP4 (video
    /// stream-copied, audio re-encoded to AAC). Used directly by the
    /// Idle-Loop Controller to upgrade a silent motion clip so it carries
    /// an audio track before it goes in a playlist.
    pub async fn mux_video_audio(&self, video_only: &Path, audio_only: &Path, output: &Path) -> AppResult<()> {
        let args = vec![
            Self::arg("-y"),
            Self::arg("-i"),
            Self::path_arg(video_only),
            Self::arg("-i"),
            Self::path_arg(audio_only),
            Self::arg("-c:v"),
            Self::arg("copy"),
            Self::arg("-c:a"),
            Self::arg("aac"),
            Self::arg("-shortest"),
            Self::path_arg(output),
        ];
        self.run_ffmpeg(&args).await
    }

    /// Upgrades `source` so it is guaranteed to carry an audio track: extracts
    /// its own audio if present, otherwise mixes in `duration_ms` of silence,
    /// then muxes the result back onto the source video. Used by the
    /// Idle-Loop Controller before a clip goes into the concat playlist,
    /// which requires every entry to have audio.
    pub async fn upgrade_clip_with_audio(&self, source: &Path, duration_ms: u32, work_dir: &Path, output: &Path) -> AppResult<()> {
        let audio = work_dir.join(format!(
            "{}-audio.wav",
            output.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "clip".to_string())
        ));
        self.ensure_audio_track(source, &audio, duration_ms).await?;
        self.mux_video_audio(source, &audio, output).await
    }

    /// Composes a final clip from a concatenated video playlist plus up to
    /// two audio sources (the motion clips' own audio, and synthesized or
    /// externally supplied speech audio), routing by the audio-routing
    /// matrix:
    ///
    /// - both present: mixed via [`Self::mix_audio`]
    /// - external only: fit to `target_duration_ms`
    /// - motion only: fit to `target_duration_ms`
    /// - neither: synthesized silence of `target_duration_ms`
    ///
    /// `work_dir` holds intermediate video-only and audio-only files; the
    /// caller owns its lifecycle (see [`crate::services::generation_service`]'s
    /// scoped job directory).
    pub async fn compose(
        &self,
        clips_playlist: &Path,
        motion_audio: Option<&Path>,
        external_audio: Option<&Path>,
        target_duration_ms: u32,
        work_dir: &Path,
        output: &Path,
    ) -> AppResult<()> {
        let video_only = work_dir.join("video_only.mp4");
        self.concat_video(clips_playlist, &video_only).await?;

        let audio_only = work_dir.join("audio_only.wav");
        match (motion_audio, external_audio) {
            (Some(motion), Some(external)) => {
                let mixed = work_dir.join("mixed_raw.wav");
                self.mix_audio(motion, external, &mixed).await?;
                self.fit_audio_duration(&mixed, &audio_only, target_duration_ms).await?;
            }
            (None, Some(external)) => {
                self.fit_audio_duration(external, &audio_only, target_duration_ms).await?;
            }
            (Some(motion), None) => {
                self.fit_audio_duration(motion, &audio_only, target_duration_ms).await?;
            }
            (None, None) => {
                self.create_silent_audio(&audio_only, target_duration_ms).await?;
            }
        }

        self.mux_video_audio(&video_only, &audio_only, output).await
    }
}

/// Map of absolute path to probed duration, kept separate for video and
/// audio since a file can report different lengths for each stream.
pub type DurationCache = HashMap<PathBuf, u32>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_string_to_milliseconds() {
        assert_eq!(EncoderFacade::parse_duration_ms(Some("1.500000".to_string())), Some(1500));
        assert_eq!(EncoderFacade::parse_duration_ms(Some("0.050".to_string())), Some(50));
        assert_eq!(EncoderFacade::parse_duration_ms(None), None);
    }

    #[test]
    fn parses_malformed_duration_as_none() {
        assert_eq!(EncoderFacade::parse_duration_ms(Some("not-a-number".to_string())), None);
    }
}
