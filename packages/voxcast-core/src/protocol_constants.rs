//! Fixed timing and algorithmic constants that should NOT be changed.
//!
//! These values govern the self-referential playlist contract and the clip
//! planner's fill loop. Operator-tunable values (bind port, directories,
//! binary paths) live in `Config`, not here.

// ─────────────────────────────────────────────────────────────────────────────
// Clip Planner fill loop
// ─────────────────────────────────────────────────────────────────────────────

/// Slack tolerance for the speech/idle fill loop (ms).
///
/// A candidate clip is accepted if its duration is within `remaining +
/// FILL_SLACK_MS`; a plan is considered "covered" once `covered + FILL_SLACK_MS
/// >= required_ms`.
pub const FILL_SLACK_MS: u32 = 50;

/// Hard iteration cap for the fill loop, guarding against pathological pools
/// (e.g. every candidate shorter than the slack tolerance).
pub const FILL_MAX_ITERATIONS: u32 = 2_000;

/// Candidates shorter than this are dropped before selection.
pub const MIN_CANDIDATE_DURATION_MS: u32 = 50;

/// Hard cap on repeats when covering a duration by looping a single clip
/// (`build_idle_plan` with an explicit `motion_id`).
pub const MAX_SINGLE_CLIP_REPEATS: u32 = 1_000;

// ─────────────────────────────────────────────────────────────────────────────
// Idle-Loop Controller timing
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum duration of a single idle clip selected for rotation or padding (ms).
pub const MIN_IDLE_MS: u32 = 1_200;

/// Margin past a file's last scheduled play time before it is unlinked (ms).
///
/// Must exceed the encoder's maximum buffered read-ahead so a file is never
/// removed while ffmpeg still has it open.
pub const CLEANUP_MARGIN_MS: u64 = 10_000;

/// Grace period after SIGTERM before the encoder subprocess is SIGKILLed (ms).
pub const ENCODER_STOP_GRACE_MS: u64 = 2_000;

/// Delay before a one-shot self-restart after a clean (exit code 0) encoder exit (ms).
pub const SELF_RESTART_DELAY_MS: u64 = 1_000;

/// Delay before the working directory is purged after `stop()` (ms).
pub const STOP_PURGE_DELAY_MS: u64 = 3_000;

// ─────────────────────────────────────────────────────────────────────────────
// Audio format
// ─────────────────────────────────────────────────────────────────────────────

/// Output sample rate for all synthesized/composed audio (Hz).
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Output channel count for all synthesized/composed audio.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Silence-detection threshold used when trimming trailing silence (dBFS).
pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -70.0;

// ─────────────────────────────────────────────────────────────────────────────
// Subprocess defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Default timeout for `ffprobe` invocations (ms), overridable via
/// `FFPROBE_TIMEOUT_MS`.
pub const DEFAULT_FFPROBE_TIMEOUT_MS: u64 = 10_000;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name, used in default User-Agent headers for HTTP-based
/// TTS/STT adapters and in startup log lines.
pub const APP_NAME: &str = "Voxcast";

/// Service identifier, returned from `/health` for liveness probes.
pub const SERVICE_ID: &str = "voxcast";
