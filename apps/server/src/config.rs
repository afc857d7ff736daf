//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! resolving down to `voxcast_core::Config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `PORT`
    pub bind_port: u16,

    /// Directory of read-only motion assets referenced by presets.
    pub motions_dir: PathBuf,

    /// Directory for cached/generated outputs.
    pub output_dir: PathBuf,

    /// Path to the preset definition file.
    pub preset_path: PathBuf,

    /// `ffmpeg` binary path. Override: `FFMPEG_BIN`.
    pub ffmpeg_bin: PathBuf,

    /// `ffprobe` binary path. Override: `FFPROBE_BIN`.
    pub ffprobe_bin: PathBuf,

    /// Speech-to-text binary path. Override: `STT_BIN`.
    pub stt_bin: PathBuf,

    /// Timeout for `ffprobe` invocations (ms). Override: `FFPROBE_TIMEOUT_MS`.
    pub ffprobe_timeout_ms: u64,

    /// Override: `DEBUG_MEDIA_PROBE`.
    pub debug_media_probe: bool,

    /// Override: `RESPONSE_PATH_BASE`.
    pub response_path_base: Option<String>,

    /// When set, `/api/*` requests must carry a matching `x-api-key` header.
    /// Override: `API_KEY`.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = voxcast_core::Config::default();
        Self {
            bind_port: core.bind_port,
            motions_dir: core.motions_dir,
            output_dir: core.output_dir,
            preset_path: core.preset_path,
            ffmpeg_bin: core.ffmpeg_bin,
            ffprobe_bin: core.ffprobe_bin,
            stt_bin: core.stt_bin,
            ffprobe_timeout_ms: core.ffprobe_timeout_ms,
            debug_media_probe: core.debug_media_probe,
            response_path_base: core.response_path_base,
            api_key: core.api_key,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        let mut core = config.to_core_config();
        core.apply_env_overrides();
        Ok(Self::from_core_config(core))
    }

    fn from_core_config(core: voxcast_core::Config) -> Self {
        Self {
            bind_port: core.bind_port,
            motions_dir: core.motions_dir,
            output_dir: core.output_dir,
            preset_path: core.preset_path,
            ffmpeg_bin: core.ffmpeg_bin,
            ffprobe_bin: core.ffprobe_bin,
            stt_bin: core.stt_bin,
            ffprobe_timeout_ms: core.ffprobe_timeout_ms,
            debug_media_probe: core.debug_media_probe,
            response_path_base: core.response_path_base,
            api_key: core.api_key,
        }
    }

    /// Converts to voxcast-core's `Config` type.
    pub fn to_core_config(&self) -> voxcast_core::Config {
        voxcast_core::Config {
            bind_port: self.bind_port,
            motions_dir: self.motions_dir.clone(),
            output_dir: self.output_dir.clone(),
            preset_path: self.preset_path.clone(),
            ffmpeg_bin: self.ffmpeg_bin.clone(),
            ffprobe_bin: self.ffprobe_bin.clone(),
            stt_bin: self.stt_bin.clone(),
            ffprobe_timeout_ms: self.ffprobe_timeout_ms,
            debug_media_probe: self.debug_media_probe,
            response_path_base: self.response_path_base.clone(),
            api_key: self.api_key.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_core_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, voxcast_core::Config::default().bind_port);
    }
}
