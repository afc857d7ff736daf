//! Core application configuration: directories, external tool paths, and the
//! values the HTTP layer and media pipeline need at runtime. Operator-facing
//! loading (YAML file + CLI flags) lives in the server binary's own
//! `ServerConfig`; this type is what that layer resolves down to.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::DEFAULT_FFPROBE_TIMEOUT_MS;

/// Resolved configuration for the Voxcast core services.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Port to bind the HTTP server to. Override: `PORT`.
    pub bind_port: u16,

    /// Directory of read-only motion assets referenced by presets.
    pub motions_dir: PathBuf,

    /// Directory for cached/generated outputs (`<output_dir>/<hash>.mp4`,
    /// `output.jsonl`, and the `stream/` working subdirectory).
    pub output_dir: PathBuf,

    /// Path to the preset definition file.
    pub preset_path: PathBuf,

    /// `ffmpeg` binary path. Override: `FFMPEG_BIN`.
    pub ffmpeg_bin: PathBuf,

    /// `ffprobe` binary path. Override: `FFPROBE_BIN`.
    pub ffprobe_bin: PathBuf,

    /// Speech-to-text binary path, used for the `audio.transcribe=true` path
    /// of a speak request. Override: `STT_BIN`.
    pub stt_bin: PathBuf,

    /// Timeout for `ffprobe` invocations (ms). Override: `FFPROBE_TIMEOUT_MS`.
    pub ffprobe_timeout_ms: u64,

    /// When set, probe failures and subprocess command lines are logged at
    /// debug level. Override: `DEBUG_MEDIA_PROBE`.
    pub debug_media_probe: bool,

    /// Optional path-prefix rewrite applied to output paths returned to
    /// clients (e.g. mapping an internal mount to a public CDN prefix).
    /// Override: `RESPONSE_PATH_BASE`.
    pub response_path_base: Option<String>,

    /// When set, `/api/*` requests must carry a matching `x-api-key` header.
    pub api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_port: 4900,
            motions_dir: PathBuf::from("./motions"),
            output_dir: PathBuf::from("./output"),
            preset_path: PathBuf::from("./presets.yaml"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            stt_bin: PathBuf::from("stt"),
            ffprobe_timeout_ms: DEFAULT_FFPROBE_TIMEOUT_MS,
            debug_media_probe: false,
            response_path_base: None,
            api_key: None,
        }
    }
}

impl Config {
    /// The live-stream working subdirectory (`<output_dir>/stream`).
    pub fn stream_dir(&self) -> PathBuf {
        self.output_dir.join("stream")
    }

    /// The per-request job-directory root (`<output_dir>/jobs`).
    pub fn jobs_dir(&self) -> PathBuf {
        self.output_dir.join("jobs")
    }

    /// Applies environment variable overrides, matching the teacher's
    /// `apply_env_overrides` convention.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }
        if let Ok(val) = std::env::var("FFMPEG_BIN") {
            self.ffmpeg_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FFPROBE_BIN") {
            self.ffprobe_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("STT_BIN") {
            self.stt_bin = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FFPROBE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.ffprobe_timeout_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("DEBUG_MEDIA_PROBE") {
            self.debug_media_probe = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Ok(val) = std::env::var("RESPONSE_PATH_BASE") {
            self.response_path_base = Some(val);
        }
        if let Ok(val) = std::env::var("API_KEY") {
            self.api_key = Some(val);
        }
    }

    /// Rewrites `path` under `response_path_base` if one is configured,
    /// otherwise returns it unchanged (as a display string).
    pub fn rewrite_response_path(&self, path: &std::path::Path) -> String {
        match (&self.response_path_base, path.file_name()) {
            (Some(base), Some(name)) => format!("{}/{}", base.trim_end_matches('/'), name.to_string_lossy()),
            _ => path.to_string_lossy().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_dir_is_nested_under_output_dir() {
        let config = Config {
            output_dir: PathBuf::from("/data/out"),
            ..Default::default()
        };
        assert_eq!(config.stream_dir(), PathBuf::from("/data/out/stream"));
    }

    #[test]
    fn rewrite_response_path_uses_base_when_set() {
        let config = Config {
            response_path_base: Some("https://cdn.example.com/clips".to_string()),
            ..Default::default()
        };
        let rewritten = config.rewrite_response_path(&PathBuf::from("/data/out/abc123.mp4"));
        assert_eq!(rewritten, "https://cdn.example.com/clips/abc123.mp4");
    }

    #[test]
    fn rewrite_response_path_passes_through_without_base() {
        let config = Config::default();
        let rewritten = config.rewrite_response_path(&PathBuf::from("/data/out/abc123.mp4"));
        assert_eq!(rewritten, "/data/out/abc123.mp4");
    }
}
