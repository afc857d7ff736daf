//! Speech-to-text adapter: transcribes audio so it can be round-tripped
//! through TTS (the `audio.transcribe=true` path of a speak request).

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, AppResult};

/// Transcribes an audio file to text.
#[async_trait]
pub trait SttEngine: Send + Sync {
    async fn transcribe(&self, audio_path: &Path) -> AppResult<String>;
}

/// Shells out to a configurable transcription binary:
/// `<binary> --in <audio_path>`, reading the transcript from stdout.
pub struct CommandLineSttEngine {
    binary: PathBuf,
}

impl CommandLineSttEngine {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl SttEngine for CommandLineSttEngine {
    async fn transcribe(&self, audio_path: &Path) -> AppResult<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--in")
            .arg(audio_path)
            .output()
            .await
            .map_err(|e| AppError::Dependency(format!("spawning STT binary {:?}: {e}", self.binary)))?;
        if !output.status.success() {
            return Err(AppError::Dependency(format!(
                "STT binary exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_string())
            .map_err(|e| AppError::Dependency(format!("STT binary produced non-utf8 output: {e}")))
    }
}
