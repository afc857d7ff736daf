//! Text-to-speech adapters.
//!
//! All engines reduce to one contract — text + voice → WAV file — dispatched
//! by the tag on a preset's [`crate::preset::AudioProfile`]. This mirrors the
//! combined-trait-via-blanket-impl shape used for Sonos client capabilities:
//! one trait object per preset, built once at bootstrap and never
//! downcast.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::media::EncoderFacade;
use crate::preset::AudioProfile;

/// Synthesizes speech audio for one preset's audio profile.
#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Synthesizes `text` (in `voice`, if given) to a WAV file at `out`.
    async fn synthesize(&self, text: &str, out: &Path, voice: Option<&str>) -> AppResult<()>;
}

/// Shells out to a configurable command-line synthesis binary:
/// `<binary> --voice <voice> --text <text> --out <out>`.
pub struct CommandLineTtsEngine {
    binary: std::path::PathBuf,
}

impl CommandLineTtsEngine {
    pub fn new(binary: std::path::PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl TtsEngine for CommandLineTtsEngine {
    async fn synthesize(&self, text: &str, out: &Path, voice: Option<&str>) -> AppResult<()> {
        let mut command = tokio::process::Command::new(&self.binary);
        command.arg("--text").arg(text).arg("--out").arg(out);
        if let Some(voice) = voice {
            command.arg("--voice").arg(voice);
        }
        let output = command
            .output()
            .await
            .map_err(|e| AppError::Dependency(format!("spawning TTS binary {:?}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(AppError::Dependency(format!(
                "TTS binary exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

/// Calls an HTTP TTS endpoint with `{text, voice}` and writes the response
/// body (raw audio bytes) to `out`.
pub struct HttpTtsEngine {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpTtsEngine {
    pub fn new(client: reqwest::Client, endpoint: String, api_key: Option<String>) -> Self {
        Self { client, endpoint, api_key }
    }
}

#[async_trait]
impl TtsEngine for HttpTtsEngine {
    async fn synthesize(&self, text: &str, out: &Path, voice: Option<&str>) -> AppResult<()> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "text": text,
            "voice": voice,
        }));
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("calling TTS endpoint {}: {e}", self.endpoint)))?;
        if !response.status().is_success() {
            return Err(AppError::Dependency(format!(
                "TTS endpoint {} returned {}",
                self.endpoint,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::Dependency(format!("reading TTS response body: {e}")))?;
        tokio::fs::write(out, &bytes).await?;
        Ok(())
    }
}

/// Generates silent audio in place of real synthesis — for presets with no
/// speech capability, and for tests.
pub struct SilentTtsEngine {
    encoder: Arc<EncoderFacade>,
}

impl SilentTtsEngine {
    pub fn new(encoder: Arc<EncoderFacade>) -> Self {
        Self { encoder }
    }
}

/// Duration of synthesized silence for a [`SilentTtsEngine`] when no better
/// estimate is available (roughly one spoken sentence).
const SILENT_SYNTHESIS_DEFAULT_MS: u32 = 2_000;

#[async_trait]
impl TtsEngine for SilentTtsEngine {
    async fn synthesize(&self, _text: &str, out: &Path, _voice: Option<&str>) -> AppResult<()> {
        self.encoder.create_silent_audio(out, SILENT_SYNTHESIS_DEFAULT_MS).await
    }
}

/// Builds the engine implied by a preset's [`AudioProfile`] tag.
pub fn build_tts_engine(profile: &AudioProfile, http_client: reqwest::Client, encoder: Arc<EncoderFacade>) -> Arc<dyn TtsEngine> {
    match profile {
        AudioProfile::CommandLine { binary, .. } => Arc::new(CommandLineTtsEngine::new(binary.clone())),
        AudioProfile::Http { endpoint, api_key, .. } => {
            Arc::new(HttpTtsEngine::new(http_client, endpoint.clone(), api_key.clone()))
        }
        AudioProfile::Silent => Arc::new(SilentTtsEngine::new(encoder)),
    }
}
