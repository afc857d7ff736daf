//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root — the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::cache::CacheService;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::media::EncoderFacade;
use crate::planner::ClipPlanner;
use crate::preset::{Preset, PresetResolver};
use crate::services::{GenerationService, IdleLoopController, StreamService};
use crate::stt::{CommandLineSttEngine, SttEngine};
use crate::tts::{build_tts_engine, TtsEngine};

/// Container for all bootstrapped services, consumed by `AppState` to build
/// the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub config: Arc<Config>,
    pub presets: Arc<HashMap<String, Preset>>,
    pub encoder: Arc<EncoderFacade>,
    pub planner: Arc<ClipPlanner>,
    pub cache: Arc<CacheService>,
    pub generation: Arc<GenerationService>,
    pub idle_loop: Arc<IdleLoopController>,
    pub stream: Arc<StreamService>,
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client used by any HTTP-based TTS/STT adapter.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Probes every preset's motion clips and logs any video-spec
    /// mismatches. Warning-only; never blocks startup.
    pub async fn validate_motion_specs(&self) {
        let mismatches = self.planner.validate_motion_specs().await;
        if mismatches.is_empty() {
            log::info!("[Bootstrap] motion spec validation: all clips consistent");
            return;
        }
        log::warn!("[Bootstrap] motion spec validation found {} mismatch(es)", mismatches.len());
        for mismatch in &mismatches {
            log::warn!(
                "[Bootstrap] preset '{}' clip '{}' ({:?}) deviates from majority spec {:?}: {}",
                mismatch.preset_id, mismatch.clip_id, mismatch.path, mismatch.majority_spec, mismatch.suggested_reencode
            );
        }
    }

    /// Reconciles the cache log against the output directory, dropping
    /// entries for files that no longer exist.
    pub fn reconcile_cache(&self) -> AppResult<()> {
        let (kept, dropped) = self.cache.reconcile()?;
        log::info!("[Bootstrap] cache reconciliation: kept={kept} dropped={dropped}");
        Ok(())
    }

    /// Stops the idle loop (if running) and lets any in-flight queued task
    /// drain.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] beginning graceful shutdown...");
        self.idle_loop.stop().await;
        log::info!("[Bootstrap] shutdown complete");
    }
}

fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Wiring order matters — services are created in dependency order:
/// 1. Shared infrastructure (HTTP client).
/// 2. Presets (resolved from the preset file against `motions_dir`).
/// 3. Encoder Facade (stateless media-subprocess wrapper).
/// 4. Clip Planner (depends on presets + encoder).
/// 5. Cache Service (depends on `output_dir`).
/// 6. Per-preset TTS/STT engines (depend on encoder + HTTP client).
/// 7. Generation Service (depends on all of the above).
/// 8. Idle-Loop Controller (depends on planner).
/// 9. Stream Service (depends on generation + idle loop).
pub fn bootstrap_services(config: Config) -> AppResult<BootstrappedServices> {
    let config = Arc::new(config);
    let http_client = create_http_client();

    let presets = Arc::new(PresetResolver::load_from_file(&config.preset_path, &config.motions_dir)?);
    log::info!("[Bootstrap] loaded {} preset(s)", presets.len());

    let encoder = Arc::new(
        EncoderFacade::new(config.ffmpeg_bin.clone(), config.ffprobe_bin.clone())
            .with_ffprobe_timeout_ms(config.ffprobe_timeout_ms),
    );
    let planner = Arc::new(ClipPlanner::new(Arc::clone(&presets), Arc::clone(&encoder)));
    let cache = Arc::new(CacheService::new(config.output_dir.clone()));

    let mut tts_engines: HashMap<String, Arc<dyn TtsEngine>> = HashMap::new();
    for preset in presets.values() {
        let engine = build_tts_engine(&preset.audio_profile, http_client.clone(), Arc::clone(&encoder));
        tts_engines.insert(preset.id.clone(), engine);
    }

    let stt: Arc<dyn SttEngine> = Arc::new(CommandLineSttEngine::new(config.stt_bin.clone()));

    let generation = Arc::new(GenerationService::new(
        Arc::clone(&presets),
        Arc::clone(&planner),
        Arc::clone(&encoder),
        Arc::clone(&cache),
        tts_engines,
        stt,
        config.output_dir.clone(),
        config.stream_dir(),
    ));

    let idle_loop = IdleLoopController::new(Arc::clone(&planner), config.ffmpeg_bin.clone());
    let stream = StreamService::new(Arc::clone(&presets), Arc::clone(&generation), Arc::clone(&idle_loop), config.stream_dir());

    std::fs::create_dir_all(&config.output_dir).map_err(AppError::from)?;
    std::fs::create_dir_all(config.jobs_dir()).map_err(AppError::from)?;
    std::fs::create_dir_all(config.stream_dir()).map_err(AppError::from)?;

    Ok(BootstrappedServices {
        config,
        presets,
        encoder,
        planner,
        cache,
        generation,
        idle_loop,
        stream,
        http_client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_client_is_constructed() {
        let client = create_http_client();
        assert!(client.get("http://example.com").build().is_ok());
    }
}
