//! Idle-Loop Controller: owns the single long-lived ffmpeg subprocess that
//! reads a self-referential concat playlist and pushes it to an RTMP
//! destination, forever, whether or not anything interesting is happening.
//!
//! The playlist is the only channel between this controller and the running
//! encoder: `idle.txt` is rewritten atomically to rotate the idle clip or to
//! splice in a task, and ffmpeg picks up the change the next time it reads
//! past EOF. There is no IPC, no pause/resume, no seeking.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{AppError, AppResult};
use crate::media::playlist;
use crate::planner::ClipPlanner;
use crate::protocol_constants::{
    CLEANUP_MARGIN_MS, ENCODER_STOP_GRACE_MS, MIN_IDLE_MS, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE,
    SELF_RESTART_DELAY_MS, STOP_PURGE_DELAY_MS,
};

const IDLE_PLAYLIST_NAME: &str = "idle.txt";

struct Inner {
    preset_id: Option<String>,
    rtmp_output_url: Option<String>,
    work_dir: Option<PathBuf>,
    child: Option<Child>,
    current_idle_clips: Vec<PathBuf>,
    rotation_timer: Option<JoinHandle<()>>,
    restore_timer: Option<JoinHandle<()>>,
    cleanup_timers: Vec<JoinHandle<()>>,
    rotation_counter: u64,
    /// Bumped on every `start()`/`stop()`; lets a stale watcher or timer from
    /// a previous generation recognize it has been superseded and exit
    /// quietly instead of acting on state that no longer belongs to it.
    generation: u64,
    stopping: bool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            preset_id: None,
            rtmp_output_url: None,
            work_dir: None,
            child: None,
            current_idle_clips: Vec::new(),
            rotation_timer: None,
            restore_timer: None,
            cleanup_timers: Vec::new(),
            rotation_counter: 0,
            generation: 0,
            stopping: false,
        }
    }
}

/// Snapshot of what the controller is currently doing, for status reporting.
#[derive(Debug, Clone)]
pub struct IdleLoopSnapshot {
    pub running: bool,
    pub preset_id: Option<String>,
    pub rtmp_output_url: Option<String>,
}

pub struct IdleLoopController {
    planner: Arc<ClipPlanner>,
    ffmpeg_bin: PathBuf,
    inner: Mutex<Inner>,
}

impl IdleLoopController {
    pub fn new(planner: Arc<ClipPlanner>, ffmpeg_bin: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            planner,
            ffmpeg_bin,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn snapshot(&self) -> IdleLoopSnapshot {
        let inner = self.inner.lock();
        IdleLoopSnapshot {
            running: inner.child.is_some(),
            preset_id: inner.preset_id.clone(),
            rtmp_output_url: inner.rtmp_output_url.clone(),
        }
    }

    /// Starts (or restarts, for a different preset/destination) the idle
    /// loop: picks one idle clip, writes the self-referential playlist,
    /// schedules the first rotation, and spawns the encoder subprocess.
    pub async fn start(
        self: &Arc<Self>,
        preset_id: &str,
        rtmp_output_url: &str,
        work_dir: PathBuf,
        debug: bool,
    ) -> AppResult<()> {
        self.kill_existing_child().await;

        {
            let mut inner = self.inner.lock();
            if let Some(h) = inner.rotation_timer.take() {
                h.abort();
            }
            if let Some(h) = inner.restore_timer.take() {
                h.abort();
            }
        }

        if !debug {
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
        }
        tokio::fs::create_dir_all(&work_dir).await?;

        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.preset_id = Some(preset_id.to_string());
            inner.rtmp_output_url = Some(rtmp_output_url.to_string());
            inner.work_dir = Some(work_dir.clone());
            inner.stopping = false;
            inner.current_idle_clips = Vec::new();
            inner.generation
        };

        let rotation_index = {
            let mut inner = self.inner.lock();
            inner.rotation_counter += 1;
            inner.rotation_counter
        };
        let (clip_paths, duration_ms) = self.next_idle_clip(preset_id, &work_dir, rotation_index).await?;

        let entries: Vec<String> = clip_paths.iter().map(|p| relative_name(p)).collect();
        let playlist_path = work_dir.join(IDLE_PLAYLIST_NAME);
        playlist::write_idle_playlist(&playlist_path, &entries, IDLE_PLAYLIST_NAME)?;

        {
            let mut inner = self.inner.lock();
            inner.current_idle_clips = clip_paths;
        }

        self.arm_rotation(duration_ms, generation);

        let mut child = self.spawn_encoder(&playlist_path, rtmp_output_url).await?;
        self.spawn_log_forwarders(&mut child);
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                let _ = child.start_kill();
                return Ok(());
            }
            inner.child = Some(child);
        }
        self.spawn_watcher(generation);

        Ok(())
    }

    /// Splices a finished speech MP4 into the running idle loop: the current
    /// rotation is cancelled, an idle pad clip plays first (so the task
    /// never starts mid-silence while ffmpeg re-reads the manifest), then the
    /// task clip, then normal rotation resumes.
    pub async fn insert_task(self: &Arc<Self>, preset_id: &str, task_mp4: &Path, task_duration_ms: u32) -> AppResult<()> {
        let (current_preset, work_dir, generation, running) = {
            let inner = self.inner.lock();
            (
                inner.preset_id.clone(),
                inner.work_dir.clone(),
                inner.generation,
                inner.child.is_some(),
            )
        };
        let Some(current_preset) = current_preset else {
            return Err(AppError::Conflict("idle loop is not running".to_string()));
        };
        if current_preset != preset_id {
            return Err(AppError::Conflict(format!(
                "idle loop is running preset '{current_preset}', not '{preset_id}'"
            )));
        }
        if !running {
            return Err(AppError::Conflict("idle loop encoder is not running".to_string()));
        }
        let work_dir = work_dir.ok_or_else(|| AppError::Internal("idle loop has no working directory".to_string()))?;

        {
            let mut inner = self.inner.lock();
            if let Some(h) = inner.rotation_timer.take() {
                h.abort();
            }
            if let Some(h) = inner.restore_timer.take() {
                h.abort();
            }
        }

        let rotation_index = {
            let mut inner = self.inner.lock();
            inner.rotation_counter += 1;
            inner.rotation_counter
        };
        let (pad_paths, pad_duration_ms) = self.next_idle_clip(preset_id, &work_dir, rotation_index).await?;

        let task_uuid = uuid::Uuid::new_v4();
        let task_name = format!("task-{task_uuid}.txt");
        let task_playlist_path = work_dir.join(&task_name);
        playlist::write_task_playlist(&task_playlist_path, &[relative_name(task_mp4)])?;

        let playlist_path = work_dir.join(IDLE_PLAYLIST_NAME);
        let mut entries: Vec<String> = pad_paths.iter().map(|p| relative_name(p)).collect();
        entries.push(task_name);
        playlist::write_idle_playlist(&playlist_path, &entries, IDLE_PLAYLIST_NAME)?;

        {
            let mut inner = self.inner.lock();
            inner.current_idle_clips = pad_paths.clone();
        }

        let total_ms = pad_duration_ms as u64 + task_duration_ms as u64;

        let this = Arc::clone(self);
        let restore_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(total_ms)).await;
            this.rotate_idle(generation).await;
        });
        self.inner.lock().restore_timer = Some(restore_handle);

        let mut cleanup_paths = vec![task_playlist_path, task_mp4.to_path_buf()];
        for pad_path in &pad_paths {
            cleanup_paths.push(pad_path.clone());
            cleanup_paths.push(audio_sidecar_for(pad_path));
        }
        self.schedule_cleanup(cleanup_paths, total_ms + CLEANUP_MARGIN_MS);

        Ok(())
    }

    /// Stops the idle loop: SIGTERM the encoder (SIGKILL after a grace
    /// period if it's still alive), cancel all pending timers, and purge the
    /// working directory after a short delay.
    pub async fn stop(self: &Arc<Self>) {
        let work_dir = {
            let mut inner = self.inner.lock();
            inner.stopping = true;
            inner.generation += 1;
            if let Some(h) = inner.rotation_timer.take() {
                h.abort();
            }
            if let Some(h) = inner.restore_timer.take() {
                h.abort();
            }
            inner.work_dir.clone()
        };

        self.stop_child_gracefully().await;

        if let Some(work_dir) = work_dir {
            self.schedule_purge(work_dir, STOP_PURGE_DELAY_MS);
        }

        let mut inner = self.inner.lock();
        inner.preset_id = None;
        inner.rtmp_output_url = None;
        inner.work_dir = None;
        inner.current_idle_clips = Vec::new();
    }

    /// Builds a full idle pad (every entry `build_idle_plan` returns, not
    /// just the first) so a single clip short of `MIN_IDLE_MS` doesn't leave
    /// the pad undershooting the restore timer and racing the live encoder.
    async fn next_idle_clip(&self, preset_id: &str, work_dir: &Path, index: u64) -> AppResult<(Vec<PathBuf>, u32)> {
        let plan = self.planner.build_idle_plan(preset_id, MIN_IDLE_MS, None, None).await?;
        if plan.entries.is_empty() {
            return Err(AppError::NotFound("idle plan produced no usable clips".to_string()));
        }
        let mut out_paths = Vec::with_capacity(plan.entries.len());
        let mut total_ms: u32 = 0;
        for (i, entry) in plan.entries.iter().enumerate() {
            let out_path = work_dir.join(format!("idle-{index}-{i}.mp4"));
            self.planner
                .encoder()
                .upgrade_clip_with_audio(&entry.source_path, entry.duration_ms, work_dir, &out_path)
                .await?;
            out_paths.push(out_path);
            total_ms += entry.duration_ms;
        }
        Ok((out_paths, total_ms))
    }

    fn arm_rotation(self: &Arc<Self>, duration_ms: u32, generation: u64) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(duration_ms as u64)).await;
            this.rotate_idle(generation).await;
        });
        self.inner.lock().rotation_timer = Some(handle);
    }

    async fn rotate_idle(self: &Arc<Self>, generation: u64) {
        let (preset_id, work_dir, previous_clips) = {
            let inner = self.inner.lock();
            if inner.generation != generation || inner.stopping {
                return;
            }
            (inner.preset_id.clone(), inner.work_dir.clone(), inner.current_idle_clips.clone())
        };
        let (Some(preset_id), Some(work_dir)) = (preset_id, work_dir) else {
            return;
        };

        for prev in &previous_clips {
            self.schedule_cleanup(vec![audio_sidecar_for(prev), prev.clone()], CLEANUP_MARGIN_MS);
        }

        let rotation_index = {
            let mut inner = self.inner.lock();
            inner.rotation_counter += 1;
            inner.rotation_counter
        };

        match self.next_idle_clip(&preset_id, &work_dir, rotation_index).await {
            Ok((clip_paths, duration_ms)) => {
                let entries: Vec<String> = clip_paths.iter().map(|p| relative_name(p)).collect();
                let playlist_path = work_dir.join(IDLE_PLAYLIST_NAME);
                if let Err(e) = playlist::write_idle_playlist(&playlist_path, &entries, IDLE_PLAYLIST_NAME) {
                    log::warn!("[IdleLoop] failed to rewrite idle playlist: {e}");
                    return;
                }
                {
                    let mut inner = self.inner.lock();
                    if inner.generation != generation {
                        return;
                    }
                    inner.current_idle_clips = clip_paths;
                }
                self.arm_rotation(duration_ms, generation);
            }
            Err(e) => {
                log::warn!("[IdleLoop] idle rotation failed, leaving current clip looping: {e}");
            }
        }
    }

    fn schedule_cleanup(&self, paths: Vec<PathBuf>, delay_ms: u64) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            for path in paths {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        log::warn!("[IdleLoop] failed to remove {path:?}: {e}");
                    }
                }
            }
        });
        self.inner.lock().cleanup_timers.push(handle);
    }

    fn schedule_purge(&self, work_dir: PathBuf, delay_ms: u64) {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("[IdleLoop] failed to purge working directory {work_dir:?}: {e}");
                }
            }
        });
        self.inner.lock().cleanup_timers.push(handle);
    }

    async fn spawn_encoder(&self, playlist_path: &Path, rtmp_output_url: &str) -> AppResult<Child> {
        Command::new(&self.ffmpeg_bin)
            .arg("-re")
            .arg("-f").arg("concat")
            .arg("-safe").arg("0")
            .arg("-i").arg(playlist_path)
            .arg("-c:v").arg("copy")
            .arg("-c:a").arg("aac")
            .arg("-ar").arg(OUTPUT_SAMPLE_RATE.to_string())
            .arg("-ac").arg(OUTPUT_CHANNELS.to_string())
            .arg("-f").arg("flv")
            .arg(rtmp_output_url)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Dependency(format!("spawning encoder subprocess: {e}")))
    }

    fn spawn_log_forwarders(&self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, "stderr"));
        }
    }

    /// Polls the running child for exit without holding the state lock
    /// across an `.await`: a short sleep-then-`try_wait` loop rather than a
    /// blocking `.wait()`, so `stop()`/`insert_task()` can still take the
    /// lock while this task is between polls.
    fn spawn_watcher(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;
                let status = {
                    let mut inner = this.inner.lock();
                    if inner.generation != generation {
                        return;
                    }
                    match inner.child.as_mut() {
                        Some(child) => child.try_wait().ok().flatten(),
                        None => return,
                    }
                };
                if let Some(status) = status {
                    this.on_encoder_exit(generation, status).await;
                    return;
                }
            }
        });
    }

    async fn on_encoder_exit(self: &Arc<Self>, generation: u64, status: ExitStatus) {
        let (stopping, preset_id, rtmp_output_url, work_dir) = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            inner.child = None;
            (inner.stopping, inner.preset_id.clone(), inner.rtmp_output_url.clone(), inner.work_dir.clone())
        };
        if stopping {
            return;
        }
        let (Some(preset_id), Some(rtmp_output_url), Some(work_dir)) = (preset_id, rtmp_output_url, work_dir) else {
            return;
        };
        if status.success() {
            log::warn!("[IdleLoop] encoder exited cleanly, restarting in {SELF_RESTART_DELAY_MS}ms");
            let this = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(SELF_RESTART_DELAY_MS)).await;
                if let Err(e) = this.start(&preset_id, &rtmp_output_url, work_dir, true).await {
                    log::error!("[IdleLoop] self-restart failed: {e}");
                }
            });
        } else {
            log::error!("[IdleLoop] encoder exited with {status}, leaving idle loop stopped");
        }
    }

    async fn kill_existing_child(&self) {
        let child = self.inner.lock().child.take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }

    async fn stop_child_gracefully(&self) {
        let child = self.inner.lock().child.take();
        let Some(mut child) = child else {
            return;
        };
        if let Some(pid) = child.id() {
            send_sigterm(pid).await;
        } else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return;
        }
        tokio::select! {
            _ = child.wait() => {}
            _ = tokio::time::sleep(Duration::from_millis(ENCODER_STOP_GRACE_MS)) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
    }
}

/// Sends SIGTERM to `pid` by shelling out to the system `kill` utility.
/// `tokio::process::Child` only exposes SIGKILL (`start_kill`) directly;
/// a graceful stop needs the milder signal first.
async fn send_sigterm(pid: u32) {
    let result = Command::new("kill").arg("-TERM").arg(pid.to_string()).status().await;
    if let Err(e) = result {
        log::warn!("[IdleLoop] failed to send SIGTERM to pid {pid}: {e}");
    }
}

async fn forward_lines(reader: impl tokio::io::AsyncRead + Unpin, label: &'static str) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => log::debug!("[IdleLoop:encoder:{label}] {line}"),
            _ => return,
        }
    }
}

fn relative_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

fn audio_sidecar_for(clip_path: &Path) -> PathBuf {
    let stem = clip_path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "clip".to_string());
    clip_path.with_file_name(format!("{stem}-audio.wav"))
}
