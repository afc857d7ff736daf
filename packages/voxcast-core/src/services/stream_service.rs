//! Stream Service: the singleton STOPPED/IDLE/SPEAK state machine sitting in
//! front of the Idle-Loop Controller, serializing enqueued speech requests
//! onto one FIFO queue so the live RTMP output never has two tasks racing
//! for the same playlist.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::preset::Preset;
use crate::services::generation_service::{BatchPayload, GenerationOutcome, GenerationService};
use crate::services::idle_loop_controller::IdleLoopController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamPhase {
    Stopped,
    Idle,
    Speak,
}

struct State {
    session_id: Option<String>,
    preset_id: Option<String>,
    phase: StreamPhase,
    queue_length: u32,
    active_motion_id: Option<String>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            session_id: None,
            preset_id: None,
            phase: StreamPhase::Stopped,
            queue_length: 0,
            active_motion_id: None,
        }
    }
}

/// Point-in-time view of the Stream Service's singleton state, returned from
/// every operation and served directly by `/api/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSnapshot {
    pub session_id: Option<String>,
    pub preset_id: Option<String>,
    #[serde(rename = "status")]
    pub phase: StreamPhase,
    pub queue_length: u32,
    #[serde(rename = "currentMotionId")]
    pub active_motion_id: Option<String>,
}

pub struct StreamService {
    presets: Arc<HashMap<String, Preset>>,
    generation: Arc<GenerationService>,
    idle_loop: Arc<IdleLoopController>,
    stream_dir: PathBuf,
    state: Mutex<State>,
    task_tx: mpsc::UnboundedSender<BatchPayload>,
}

impl StreamService {
    pub fn new(
        presets: Arc<HashMap<String, Preset>>,
        generation: Arc<GenerationService>,
        idle_loop: Arc<IdleLoopController>,
        stream_dir: PathBuf,
    ) -> Arc<Self> {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            presets,
            generation,
            idle_loop,
            stream_dir,
            state: Mutex::new(State::default()),
            task_tx,
        });
        tokio::spawn(Arc::clone(&this).run_worker(task_rx));
        this
    }

    /// Starts the idle loop against `preset_id`. Idempotent if that preset
    /// is already running; conflicts if a different one is.
    pub async fn start(self: &Arc<Self>, preset_id: &str, debug: bool) -> AppResult<StreamSnapshot> {
        let preset = self
            .presets
            .get(preset_id)
            .ok_or_else(|| AppError::Validation(format!("preset '{preset_id}' not found")))?;

        {
            let state = self.state.lock();
            if state.phase != StreamPhase::Stopped {
                if state.preset_id.as_deref() == Some(preset_id) {
                    return Ok(self.status());
                }
                return Err(AppError::Conflict(format!(
                    "stream is already running preset '{}'; stop it before starting '{preset_id}'",
                    state.preset_id.clone().unwrap_or_default()
                )));
            }
        }

        self.idle_loop.start(preset_id, &preset.rtmp_output_url, self.stream_dir.clone(), debug).await?;

        let mut state = self.state.lock();
        state.session_id = Some(uuid::Uuid::new_v4().to_string());
        state.preset_id = Some(preset_id.to_string());
        state.phase = StreamPhase::Idle;
        state.queue_length = 0;
        state.active_motion_id = None;
        drop(state);
        Ok(self.status())
    }

    /// Fire-and-forget stop: resets state immediately, tears down the
    /// encoder in the background. Always succeeds.
    pub fn stop(self: &Arc<Self>) -> StreamSnapshot {
        let was_running = {
            let mut state = self.state.lock();
            let running = state.phase != StreamPhase::Stopped;
            state.session_id = None;
            state.preset_id = None;
            state.phase = StreamPhase::Stopped;
            state.queue_length = 0;
            state.active_motion_id = None;
            running
        };
        if was_running {
            let idle_loop = Arc::clone(&self.idle_loop);
            tokio::spawn(async move { idle_loop.stop().await });
        }
        self.status()
    }

    /// Validates and enqueues a batch onto the serial task queue. Does not
    /// wait for the batch to finish: `queue_length`/`phase` track progress,
    /// observable via `status()`.
    pub fn enqueue_text(self: &Arc<Self>, payload: BatchPayload) -> AppResult<StreamSnapshot> {
        {
            let state = self.state.lock();
            if state.phase == StreamPhase::Stopped {
                return Err(AppError::Conflict("stream is stopped".to_string()));
            }
            if state.preset_id.as_deref() != Some(payload.preset_id.as_str()) {
                return Err(AppError::Conflict(format!(
                    "stream is running preset '{}', not '{}'",
                    state.preset_id.clone().unwrap_or_default(),
                    payload.preset_id
                )));
            }
        }

        {
            let mut state = self.state.lock();
            state.queue_length += 1;
            state.phase = StreamPhase::Speak;
        }

        if self.task_tx.send(payload).is_err() {
            log::error!("[StreamService] task queue worker is gone, dropping enqueued batch");
        }
        Ok(self.status())
    }

    pub fn status(&self) -> StreamSnapshot {
        let state = self.state.lock();
        StreamSnapshot {
            session_id: state.session_id.clone(),
            preset_id: state.preset_id.clone(),
            phase: state.phase,
            queue_length: state.queue_length,
            active_motion_id: state.active_motion_id.clone(),
        }
    }

    async fn run_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<BatchPayload>) {
        while let Some(payload) = rx.recv().await {
            self.process_one(payload).await;
            let mut state = self.state.lock();
            state.queue_length = state.queue_length.saturating_sub(1);
            if state.queue_length == 0 && state.phase != StreamPhase::Stopped {
                state.phase = StreamPhase::Idle;
            }
        }
    }

    /// Runs one enqueued batch through the Generation Service in streaming
    /// mode, handing each finished MP4 to the Idle-Loop Controller as it
    /// completes. Errors are logged; the worker loop never stops on them.
    async fn process_one(self: &Arc<Self>, mut payload: BatchPayload) {
        payload.stream = true;
        let preset_id = payload.preset_id.clone();

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let this = Arc::clone(self);
        let preset_for_inserts = preset_id.clone();
        let consumer = tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                if let Err(e) = this.idle_loop.insert_task(&preset_for_inserts, &result.output_path, result.duration_ms).await {
                    log::error!("[StreamService] failed to splice task clip into idle loop: {e}");
                    continue;
                }
                let mut state = this.state.lock();
                state.active_motion_id = result.motion_ids.last().cloned();
            }
        });

        match self.generation.process_batch(&payload, true, Some(&result_tx)).await {
            Ok(GenerationOutcome::Streamed(_)) | Ok(GenerationOutcome::Combined(_)) => {}
            Err(e) => log::error!("[StreamService] enqueued batch for preset '{preset_id}' failed: {e}"),
        }

        drop(result_tx);
        let _ = consumer.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_stopped() {
        let state = State::default();
        assert_eq!(state.phase, StreamPhase::Stopped);
        assert!(state.session_id.is_none());
        assert_eq!(state.queue_length, 0);
    }
}
