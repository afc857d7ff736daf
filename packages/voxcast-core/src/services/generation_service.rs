//! Generation Service: turns one API batch request into either a list of
//! per-action MP4s (streaming mode) or a single concatenated MP4 (combined
//! mode), driving TTS, the Clip Planner, and the Encoder Facade.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::http::StatusCode;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::cache::{hash_bytes, hash_descriptor, CacheDescriptor, CacheLogEntry, CacheService};
use crate::error::{ActionProcessingError, AppError, AppResult};
use crate::media::EncoderFacade;
use crate::planner::{ClipPlan, ClipPlanEntry, ClipPlanner};
use crate::preset::{normalize_emotion, Preset, RESERVED_ACTION_NAMES};
use crate::protocol_constants::DEFAULT_SILENCE_THRESHOLD_DB;
use crate::services::job_dir::JobDir;
use crate::stt::SttEngine;
use crate::tts::TtsEngine;

/// External audio supplied inline (instead of synthesized from text).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AudioInput {
    pub path: Option<String>,
    pub base64: Option<String>,
    #[serde(default)]
    pub transcribe: bool,
}

/// Per-action parameters; which fields are required depends on `action`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionParams {
    pub text: Option<String>,
    pub audio: Option<AudioInput>,
    pub emotion: Option<String>,
    pub duration_ms: Option<u32>,
    pub motion_id: Option<String>,
}

/// One entry in a batch payload's `requests` array.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionItem {
    pub action: String,
    #[serde(default)]
    pub params: ActionParams,
}

/// Batch-wide defaults, applied when an action omits the corresponding field.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchDefaults {
    pub emotion: Option<String>,
    pub idle_motion_id: Option<String>,
}

/// The full `/api/stream/text` and `/api/generate` request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPayload {
    pub preset_id: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub cache: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub defaults: BatchDefaults,
    pub requests: Vec<ActionItem>,
}

fn default_true() -> bool {
    true
}

/// Finished output for one action, whether served fresh or from cache.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// 1-based, matching `ActionProcessingError::request_id`.
    pub request_id: usize,
    pub output_path: PathBuf,
    pub duration_ms: u32,
    pub motion_ids: Vec<String>,
    pub cache_hit: bool,
}

/// Result of processing a whole batch.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// Stream mode: one finished MP4 per action, in payload order.
    Streamed(Vec<ActionResult>),
    /// Combined mode: every action's clips concatenated into one MP4.
    Combined(ActionResult),
}

struct PlannedAction {
    cache_key: Option<String>,
    plan: ClipPlan,
    audio_path: PathBuf,
}

pub struct GenerationService {
    presets: Arc<HashMap<String, Preset>>,
    planner: Arc<ClipPlanner>,
    encoder: Arc<EncoderFacade>,
    cache: Arc<CacheService>,
    tts_engines: HashMap<String, Arc<dyn TtsEngine>>,
    stt: Arc<dyn SttEngine>,
    output_dir: PathBuf,
    stream_dir: PathBuf,
}

impl GenerationService {
    pub fn new(
        presets: Arc<HashMap<String, Preset>>,
        planner: Arc<ClipPlanner>,
        encoder: Arc<EncoderFacade>,
        cache: Arc<CacheService>,
        tts_engines: HashMap<String, Arc<dyn TtsEngine>>,
        stt: Arc<dyn SttEngine>,
        output_dir: PathBuf,
        stream_dir: PathBuf,
    ) -> Self {
        Self {
            presets,
            planner,
            encoder,
            cache,
            tts_engines,
            stt,
            output_dir,
            stream_dir,
        }
    }

    fn preset(&self, preset_id: &str) -> Result<&Preset, ActionProcessingError> {
        self.presets
            .get(preset_id)
            .ok_or_else(|| ActionProcessingError::new("batch", format!("preset '{preset_id}' not found"), StatusCode::BAD_REQUEST))
    }

    fn tts_for(&self, preset_id: &str) -> AppResult<Arc<dyn TtsEngine>> {
        self.tts_engines
            .get(preset_id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("no TTS engine wired for preset '{preset_id}'")))
    }

    /// Processes one batch request: `stream=true` yields one MP4 per action
    /// (and calls `on_result` as each completes); `stream=false` yields one
    /// concatenated MP4. `for_stream_pipeline` disables caching and writes
    /// into the live-stream working directory instead of the output
    /// directory, for use by the Stream Service's enqueue path.
    pub async fn process_batch(
        &self,
        payload: &BatchPayload,
        for_stream_pipeline: bool,
        on_result: Option<&tokio::sync::mpsc::UnboundedSender<ActionResult>>,
    ) -> Result<GenerationOutcome, ActionProcessingError> {
        if payload.requests.is_empty() {
            return Err(ActionProcessingError::new("batch", "at least one request is required", StatusCode::BAD_REQUEST));
        }
        let preset = self.preset(&payload.preset_id)?;
        let cache_enabled = payload.cache && !for_stream_pipeline;
        let target_root = if for_stream_pipeline { &self.stream_dir } else { &self.output_dir };

        let jobs_root = target_root.join("jobs");
        tokio::fs::create_dir_all(&jobs_root)
            .await
            .map_err(|e| ActionProcessingError::new("batch", format!("creating job directory: {e}"), StatusCode::INTERNAL_SERVER_ERROR))?;
        let job = JobDir::create(&jobs_root, "batch")
            .map_err(|e| ActionProcessingError::new("batch", format!("creating job directory: {e}"), StatusCode::INTERNAL_SERVER_ERROR))?;

        if payload.stream {
            let mut results = Vec::with_capacity(payload.requests.len());
            for (idx, item) in payload.requests.iter().enumerate() {
                let request_id = idx + 1;
                let result = self
                    .process_one_to_file(preset, item, &payload.defaults, cache_enabled, &job, target_root, request_id)
                    .await
                    .map_err(|e| to_action_error(request_id, e))?;
                if let Some(sender) = on_result {
                    let _ = sender.send(result.clone());
                }
                results.push(result);
            }
            return Ok(GenerationOutcome::Streamed(results));
        }

        // Combined mode: compute every action's cache key up front (cheap —
        // no TTS/encode work) and check for a whole-batch cache hit before
        // doing any of it.
        let mut action_cache_keys = Vec::with_capacity(payload.requests.len());
        for (idx, item) in payload.requests.iter().enumerate() {
            let request_id = idx + 1;
            let key = self
                .compute_cache_key(preset, item, &payload.defaults)
                .await
                .map_err(|e| to_action_error(request_id, e))?;
            action_cache_keys.push(key);
        }
        let combined_cache_enabled = cache_enabled && action_cache_keys.iter().all(Option::is_some);
        let combined_descriptor = if combined_cache_enabled {
            let hashes: Vec<String> = action_cache_keys.iter().map(|k| k.clone().unwrap()).collect();
            Some(CacheDescriptor::Combined {
                preset_id: preset.id.clone(),
                action_hashes: hashes,
            })
        } else {
            None
        };
        let combined_hash = combined_descriptor.as_ref().map(hash_descriptor);

        if let Some(hash) = &combined_hash {
            if self.cache.is_cached(hash) {
                let output_path = self.cache.output_path(hash);
                let duration_ms = self.encoder.probe_video_duration(&output_path).await.unwrap_or(0);
                return Ok(GenerationOutcome::Combined(ActionResult {
                    request_id: 0,
                    output_path,
                    duration_ms,
                    motion_ids: Vec::new(),
                    cache_hit: true,
                }));
            }
        }

        let mut planned = Vec::with_capacity(payload.requests.len());
        for (idx, item) in payload.requests.iter().enumerate() {
            let request_id = idx + 1;
            let action = self
                .plan_action(preset, item, &payload.defaults, &job, request_id)
                .await
                .map_err(|e| to_action_error(request_id, e))?;
            planned.push(action);
        }

        let total_duration_ms: u32 = planned.iter().map(|p| p.plan.total_duration_ms).sum();
        let all_entries: Vec<ClipPlanEntry> = planned.iter().flat_map(|p| p.plan.entries.clone()).collect();
        let all_audio: Vec<PathBuf> = planned.iter().map(|p| p.audio_path.clone()).collect();
        let motion_ids: Vec<String> = planned.iter().flat_map(|p| p.plan.motion_ids.clone()).collect();

        let playlist_path = job.join("combined.txt");
        let entries: Vec<String> = all_entries.iter().map(|e| e.source_path.to_string_lossy().to_string()).collect();
        crate::media::playlist::write_task_playlist(&playlist_path, &entries)
            .map_err(|e| to_action_error(0, e))?;

        let combined_audio = job.join("combined_audio.wav");
        if all_audio.len() == 1 {
            tokio::fs::copy(&all_audio[0], &combined_audio)
                .await
                .map_err(|e| to_action_error(0, AppError::Internal(format!("copying combined audio: {e}"))))?;
        } else {
            self.encoder
                .concat_audio(&all_audio, &combined_audio)
                .await
                .map_err(|e| to_action_error(0, e))?;
        }

        let motion_audio = self
            .build_motion_audio(&all_entries, &job, "combined")
            .await
            .map_err(|e| to_action_error(0, e))?;

        let composed = job.join("composed.mp4");
        self.encoder
            .compose(&playlist_path, Some(&motion_audio), Some(&combined_audio), total_duration_ms, job.path(), &composed)
            .await
            .map_err(|e| to_action_error(0, e))?;

        let (base_name, cache_hit) = match &combined_hash {
            Some(hash) => (hash.clone(), false),
            None => (uuid::Uuid::new_v4().to_string(), false),
        };
        let output_path = self
            .finalize_output(&composed, &base_name, target_root)
            .await
            .map_err(|e| to_action_error(0, e))?;

        if let (Some(hash), Some(descriptor)) = (&combined_hash, &combined_descriptor) {
            self.cache
                .append_log(&CacheLogEntry {
                    file: format!("{hash}.mp4"),
                    kind: "combined".to_string(),
                    preset_id: preset.id.clone(),
                    descriptor_fields: descriptor_fields(descriptor),
                    created_at: crate::utils::now_millis().to_string(),
                })
                .map_err(|e| to_action_error(0, e))?;
        }

        Ok(GenerationOutcome::Combined(ActionResult {
            request_id: 0,
            output_path,
            duration_ms: total_duration_ms,
            motion_ids,
            cache_hit,
        }))
    }

    /// Plans and fully composes one action to its own finished MP4,
    /// respecting the per-action cache.
    async fn process_one_to_file(
        &self,
        preset: &Preset,
        item: &ActionItem,
        defaults: &BatchDefaults,
        cache_enabled: bool,
        job: &JobDir,
        target_root: &Path,
        request_id: usize,
    ) -> AppResult<ActionResult> {
        let cache_descriptor = self.compute_cache_descriptor(preset, item, defaults).await?;
        let cache_key = cache_descriptor.as_ref().map(hash_descriptor);

        if cache_enabled {
            if let Some(hash) = &cache_key {
                if self.cache.is_cached(hash) {
                    let output_path = self.cache.output_path(hash);
                    let duration_ms = self.encoder.probe_video_duration(&output_path).await.unwrap_or(0);
                    return Ok(ActionResult {
                        request_id,
                        output_path,
                        duration_ms,
                        motion_ids: Vec::new(),
                        cache_hit: true,
                    });
                }
            }
        }

        let planned = self.plan_action(preset, item, defaults, job, request_id).await?;

        let playlist_path = job.join(format!("action-{request_id}.txt"));
        let entries: Vec<String> = planned.plan.entries.iter().map(|e| e.source_path.to_string_lossy().to_string()).collect();
        crate::media::playlist::write_task_playlist(&playlist_path, &entries)?;

        let motion_audio = self.build_motion_audio(&planned.plan.entries, job, &format!("action-{request_id}")).await?;

        let composed = job.join(format!("action-{request_id}-composed.mp4"));
        self.encoder
            .compose(&playlist_path, Some(&motion_audio), Some(&planned.audio_path), planned.plan.total_duration_ms, job.path(), &composed)
            .await?;

        let base_name = match (&cache_key, cache_enabled) {
            (Some(hash), true) => hash.clone(),
            _ => format!("{}-{}", cache_key.clone().unwrap_or_else(|| "uncached".to_string()), uuid::Uuid::new_v4()),
        };
        let output_path = self.finalize_output(&composed, &base_name, target_root).await?;

        if let (Some(hash), true) = (&cache_key, cache_enabled) {
            if let Some(descriptor) = &cache_descriptor {
                self.cache.append_log(&CacheLogEntry {
                    file: format!("{hash}.mp4"),
                    kind: action_kind(&item.action).to_string(),
                    preset_id: preset.id.clone(),
                    descriptor_fields: descriptor_fields(descriptor),
                    created_at: crate::utils::now_millis().to_string(),
                })?;
            }
        }

        Ok(ActionResult {
            request_id,
            output_path,
            duration_ms: planned.plan.total_duration_ms,
            motion_ids: planned.plan.motion_ids,
            cache_hit: false,
        })
    }

    /// Runs the planning + audio pipeline for one action, producing a clip
    /// plan and a ready-to-compose audio track, without composing or
    /// finalizing — the shared core of both streaming and combined paths.
    async fn plan_action(
        &self,
        preset: &Preset,
        item: &ActionItem,
        defaults: &BatchDefaults,
        job: &JobDir,
        request_id: usize,
    ) -> AppResult<PlannedAction> {
        let cache_key = self.compute_cache_key(preset, item, defaults).await?;
        match item.action.to_lowercase().as_str() {
            "speak" => {
                let tts = self.tts_for(&preset.id)?;
                let (audio_path, plan) = self.build_speech_plan_and_audio(preset, &item.params, defaults, job, request_id, tts.as_ref()).await?;
                Ok(PlannedAction { cache_key, plan, audio_path })
            }
            "idle" => {
                let (audio_path, plan) = self.build_idle_plan_and_audio(preset, &item.params, defaults, job, request_id).await?;
                Ok(PlannedAction { cache_key, plan, audio_path })
            }
            action => {
                let (audio_path, plan) = self.build_custom_action_plan_and_audio(preset, action, job, request_id).await?;
                Ok(PlannedAction { cache_key, plan, audio_path })
            }
        }
    }

    async fn build_speech_plan_and_audio(
        &self,
        preset: &Preset,
        params: &ActionParams,
        defaults: &BatchDefaults,
        job: &JobDir,
        request_id: usize,
        tts: &dyn TtsEngine,
    ) -> AppResult<(PathBuf, ClipPlan)> {
        let emotion = normalize_emotion(params.emotion.as_deref().or(defaults.emotion.as_deref()).unwrap_or("neutral"));
        let raw = self.obtain_raw_audio(preset, params, job, request_id, tts, &emotion).await?;

        let normalized = job.join(format!("normalized-{request_id}.wav"));
        self.encoder.normalize_audio(&raw, &normalized).await?;
        let trimmed = job.join(format!("trimmed-{request_id}.wav"));
        self.encoder.trim_audio_silence(&normalized, &trimmed, DEFAULT_SILENCE_THRESHOLD_DB).await?;

        let trimmed_ms = self.encoder.probe_audio_duration(&trimmed).await.unwrap_or(0);
        let (effective_path, effective_ms) = if trimmed_ms == 0 {
            let ms = self.encoder.probe_audio_duration(&normalized).await?;
            (normalized, ms)
        } else {
            (trimmed, trimmed_ms)
        };

        let plan = self.planner.build_speech_plan(&preset.id, &emotion, effective_ms).await?;

        let fitted = job.join(format!("fitted-{request_id}.wav"));
        self.encoder.fit_audio_duration(&effective_path, &fitted, plan.talk_duration_ms).await?;

        let mut segments = Vec::new();
        if plan.enter_duration_ms > 0 {
            let enter_silence = job.join(format!("enter-{request_id}.wav"));
            self.encoder.create_silent_audio(&enter_silence, plan.enter_duration_ms).await?;
            segments.push(enter_silence);
        }
        segments.push(fitted);
        if plan.exit_duration_ms > 0 {
            let exit_silence = job.join(format!("exit-{request_id}.wav"));
            self.encoder.create_silent_audio(&exit_silence, plan.exit_duration_ms).await?;
            segments.push(exit_silence);
        }

        let combined = job.join(format!("speech-audio-{request_id}.wav"));
        if segments.len() == 1 {
            tokio::fs::copy(&segments[0], &combined).await?;
        } else {
            self.encoder.concat_audio(&segments, &combined).await?;
        }

        Ok((combined, plan))
    }

    async fn obtain_raw_audio(
        &self,
        preset: &Preset,
        params: &ActionParams,
        job: &JobDir,
        request_id: usize,
        tts: &dyn TtsEngine,
        emotion: &str,
    ) -> AppResult<PathBuf> {
        let raw_path = job.join(format!("raw-{request_id}.wav"));

        if let Some(text) = &params.text {
            let voice = preset.audio_profile.voice_for(emotion);
            tts.synthesize(text, &raw_path, voice).await?;
            return Ok(raw_path);
        }

        if let Some(audio) = &params.audio {
            if let Some(b64) = &audio.base64 {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64)
                    .map_err(|e| AppError::Validation(format!("invalid base64 audio: {e}")))?;
                tokio::fs::write(&raw_path, &bytes).await?;
            } else if let Some(path) = &audio.path {
                tokio::fs::copy(path, &raw_path)
                    .await
                    .map_err(|e| AppError::Validation(format!("copying external audio {path}: {e}")))?;
            } else {
                return Err(AppError::Validation("audio requires either path or base64".to_string()));
            }

            if audio.transcribe {
                let transcript = self.stt.transcribe(&raw_path).await?;
                let voice = preset.audio_profile.voice_for(emotion);
                let retts_path = job.join(format!("retts-{request_id}.wav"));
                tts.synthesize(&transcript, &retts_path, voice).await?;
                return Ok(retts_path);
            }
            return Ok(raw_path);
        }

        Err(AppError::Validation("speak action requires text or audio".to_string()))
    }

    async fn build_idle_plan_and_audio(
        &self,
        preset: &Preset,
        params: &ActionParams,
        defaults: &BatchDefaults,
        job: &JobDir,
        request_id: usize,
    ) -> AppResult<(PathBuf, ClipPlan)> {
        let duration_ms = params
            .duration_ms
            .ok_or_else(|| AppError::Validation("idle action requires durationMs".to_string()))?;
        if duration_ms == 0 {
            return Err(AppError::Validation("idle action durationMs must be positive".to_string()));
        }
        let motion_id = params.motion_id.as_deref().or(defaults.idle_motion_id.as_deref());
        let emotion = params.emotion.as_deref().or(defaults.emotion.as_deref());
        let plan = self.planner.build_idle_plan(&preset.id, duration_ms, motion_id, emotion).await?;

        let silence = job.join(format!("idle-{request_id}.wav"));
        self.encoder.create_silent_audio(&silence, duration_ms).await?;
        Ok((silence, plan))
    }

    async fn build_custom_action_plan_and_audio(
        &self,
        preset: &Preset,
        action: &str,
        job: &JobDir,
        request_id: usize,
    ) -> AppResult<(PathBuf, ClipPlan)> {
        let key = action.to_lowercase();
        if RESERVED_ACTION_NAMES.contains(&key.as_str()) {
            return Err(AppError::Validation(format!("action '{action}' is reserved")));
        }
        let plan = self.planner.build_action_clip(&preset.id, action).await?;
        let clip_path = plan.entries[0].source_path.clone();

        let extracted = job.join(format!("action-audio-{request_id}.wav"));
        self.encoder.ensure_audio_track(&clip_path, &extracted, plan.total_duration_ms).await?;
        let fitted = job.join(format!("action-audio-fitted-{request_id}.wav"));
        self.encoder.fit_audio_duration(&extracted, &fitted, plan.total_duration_ms).await?;
        Ok((fitted, plan))
    }

    /// Builds the cache descriptor for one action, without running TTS/encode.
    /// Custom actions are never cached (`None`): they are deterministic
    /// filesystem lookups cheap enough to redo every time, and disable
    /// caching for the whole combined batch they're part of.
    async fn compute_cache_descriptor(&self, preset: &Preset, item: &ActionItem, defaults: &BatchDefaults) -> AppResult<Option<CacheDescriptor>> {
        match item.action.to_lowercase().as_str() {
            "speak" => {
                let emotion = normalize_emotion(item.params.emotion.as_deref().or(defaults.emotion.as_deref()).unwrap_or("neutral"));
                let audio_hash = match &item.params.audio {
                    Some(audio) => Some(Self::hash_audio_input(audio).await?),
                    None => None,
                };
                let input_type = if item.params.text.is_some() {
                    "text"
                } else if item.params.audio.as_ref().is_some_and(|a| a.transcribe) {
                    "audio_transcribe"
                } else {
                    "audio"
                };
                Ok(Some(CacheDescriptor::Speak {
                    preset_id: preset.id.clone(),
                    input_type: input_type.to_string(),
                    text: item.params.text.clone(),
                    audio_hash,
                    tts_engine: None,
                    tts_settings: None,
                    emotion,
                }))
            }
            "idle" => {
                let duration_ms = item
                    .params
                    .duration_ms
                    .ok_or_else(|| AppError::Validation("idle action requires durationMs".to_string()))?;
                let motion_id = item.params.motion_id.clone().or_else(|| defaults.idle_motion_id.clone());
                let emotion = normalize_emotion(item.params.emotion.as_deref().or(defaults.emotion.as_deref()).unwrap_or("neutral"));
                Ok(Some(CacheDescriptor::Idle {
                    preset_id: preset.id.clone(),
                    duration_ms,
                    motion_id,
                    emotion,
                }))
            }
            _ => Ok(None),
        }
    }

    /// Hash of [`Self::compute_cache_descriptor`]'s result, for call sites
    /// that only need the key and not the descriptor itself.
    async fn compute_cache_key(&self, preset: &Preset, item: &ActionItem, defaults: &BatchDefaults) -> AppResult<Option<String>> {
        Ok(self.compute_cache_descriptor(preset, item, defaults).await?.map(|d| hash_descriptor(&d)))
    }

    /// Extracts (or synthesizes silence for) each clip's own audio track and
    /// concatenates them in playback order, so the motion clips' own audio
    /// survives into the composed output instead of being dropped by
    /// `concat_video`'s `-an`.
    async fn build_motion_audio(&self, entries: &[ClipPlanEntry], job: &JobDir, label: &str) -> AppResult<PathBuf> {
        let mut tracks = Vec::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let track = job.join(format!("{label}-motion-audio-{idx}.wav"));
            self.encoder.ensure_audio_track(&entry.source_path, &track, entry.duration_ms).await?;
            tracks.push(track);
        }
        let combined = job.join(format!("{label}-motion-audio.wav"));
        if tracks.len() == 1 {
            tokio::fs::copy(&tracks[0], &combined).await?;
        } else {
            self.encoder.concat_audio(&tracks, &combined).await?;
        }
        Ok(combined)
    }

    async fn hash_audio_input(audio: &AudioInput) -> AppResult<String> {
        if let Some(b64) = &audio.base64 {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(|e| AppError::Validation(format!("invalid base64 audio: {e}")))?;
            Ok(hash_bytes(&bytes))
        } else if let Some(path) = &audio.path {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| AppError::Validation(format!("reading external audio {path}: {e}")))?;
            Ok(hash_bytes(&bytes))
        } else {
            Err(AppError::Validation("audio requires either path or base64".to_string()))
        }
    }

    async fn finalize_output(&self, composed: &Path, base_name: &str, target_root: &Path) -> AppResult<PathBuf> {
        let dest = target_root.join(format!("{base_name}.mp4"));
        match tokio::fs::rename(composed, &dest).await {
            Ok(()) => Ok(dest),
            Err(_) => {
                tokio::fs::copy(composed, &dest).await?;
                tokio::fs::remove_file(composed).await.ok();
                Ok(dest)
            }
        }
    }
}

/// Flattens a `CacheDescriptor` into `output.jsonl`'s `descriptor_fields`,
/// dropping `type`/`presetId` since `CacheLogEntry` already carries those
/// under its own `kind`/`preset_id` fields.
fn descriptor_fields(descriptor: &CacheDescriptor) -> HashMap<String, serde_json::Value> {
    match serde_json::to_value(descriptor) {
        Ok(serde_json::Value::Object(map)) => map.into_iter().filter(|(k, _)| k != "type" && k != "presetId").collect(),
        _ => HashMap::new(),
    }
}

fn action_kind(action: &str) -> &'static str {
    match action.to_lowercase().as_str() {
        "speak" => "speak",
        "idle" => "idle",
        _ => "custom-action",
    }
}

fn to_action_error(request_id: usize, err: AppError) -> ActionProcessingError {
    ActionProcessingError::new(request_id.to_string(), err.to_string(), err.status_code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_kind_classifies_reserved_names() {
        assert_eq!(action_kind("speak"), "speak");
        assert_eq!(action_kind("IDLE"), "idle");
        assert_eq!(action_kind("wave"), "custom-action");
    }

    #[test]
    fn to_action_error_preserves_status_and_message() {
        let err = to_action_error(3, AppError::Validation("bad field".to_string()));
        assert_eq!(err.request_id, "3");
        assert!(err.message.contains("bad field"));
    }
}
