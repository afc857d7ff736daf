//! Static preset data model.
//!
//! A [`Preset`] is an immutable bundle of motion assets and an audio profile
//! identifying one avatar persona; it is loaded once at startup by
//! [`crate::preset::resolver::PresetResolver`] and never mutated afterward.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a motion clip is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClipKind {
    Idle,
    Speech,
    TransitionEnter,
    TransitionExit,
    CustomAction,
}

/// Bin-packing size class used by the Clip Planner's fill loop.
///
/// Large clips fill bulk duration; small clips fine-tune the tail. Only
/// meaningful for idle/speech clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Large,
    Small,
}

/// A short pre-rendered video file: idle, speech, transition, or action motion.
///
/// Immutable after preset load. A preset's motion files are expected to share
/// one video spec (resolution, frame rate, codec, pixel format); mismatches
/// are reported by [`crate::planner::clip_planner::validate_motion_specs`] but
/// never fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionClip {
    /// Unique per preset.
    pub id: String,
    pub absolute_path: PathBuf,
    pub kind: ClipKind,
    /// Only meaningful for idle/speech clips.
    pub size_class: Option<SizeClass>,
    /// Lowercase; defaults to "neutral".
    #[serde(default = "default_emotion")]
    pub emotion: String,
}

fn default_emotion() -> String {
    "neutral".to_string()
}

impl MotionClip {
    /// Normalizes the emotion string: trimmed and lowercased.
    pub fn normalize(&mut self) {
        self.emotion = normalize_emotion(&self.emotion);
    }
}

/// Trims and lowercases an emotion string, the normalization applied
/// throughout the Clip Planner's pool lookups.
pub fn normalize_emotion(emotion: &str) -> String {
    let trimmed = emotion.trim().to_lowercase();
    if trimmed.is_empty() {
        "neutral".to_string()
    } else {
        trimmed
    }
}

/// The universal fallback emotion.
pub const NEUTRAL: &str = "neutral";

/// TTS engine selection and per-emotion voice configuration.
///
/// Modeled as a tagged union rather than the duck-typed config object the
/// distilled spec describes (§9 redesign note): each engine variant carries
/// exactly the fields it needs, and dispatch to a concrete [`crate::tts::TtsEngine`]
/// happens once at preset-load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "camelCase")]
pub enum AudioProfile {
    /// Shells out to a configurable command-line synthesis binary.
    CommandLine {
        binary: PathBuf,
        default_voice: String,
        #[serde(default)]
        voices_by_emotion: HashMap<String, String>,
    },
    /// Calls an HTTP TTS endpoint.
    Http {
        endpoint: String,
        default_voice: String,
        #[serde(default)]
        voices_by_emotion: HashMap<String, String>,
        #[serde(default)]
        api_key: Option<String>,
    },
    /// Emits silent audio of the requested duration; used in tests and for
    /// presets with no speech capability.
    Silent,
}

impl AudioProfile {
    /// Resolves the voice to use for a given (already-normalized) emotion,
    /// falling back to the profile's default voice.
    pub fn voice_for(&self, emotion: &str) -> Option<&str> {
        match self {
            Self::CommandLine {
                default_voice,
                voices_by_emotion,
                ..
            }
            | Self::Http {
                default_voice,
                voices_by_emotion,
                ..
            } => Some(
                voices_by_emotion
                    .get(emotion)
                    .map(String::as_str)
                    .unwrap_or(default_voice),
            ),
            Self::Silent => None,
        }
    }
}

/// A named bundle of motion assets and an audio profile: one avatar persona.
///
/// Immutable after load. Index fields (`idle_pool`, `speech_pool`, the
/// transition maps) are built once by the resolver, keyed by normalized
/// emotion strings and `SizeClass`.
#[derive(Debug, Clone)]
pub struct Preset {
    pub id: String,
    pub actions_by_id: HashMap<String, MotionClip>,
    pub idle_pool: SizeIndexedPool,
    pub speech_pool: HashMap<String, SizeIndexedPool>,
    pub enter_transitions: HashMap<String, Vec<MotionClip>>,
    pub exit_transitions: HashMap<String, Vec<MotionClip>>,
    pub audio_profile: AudioProfile,
    pub rtmp_output_url: String,
}

/// Clips of a single pool, split by [`SizeClass`] for the planner's fill loop.
#[derive(Debug, Clone, Default)]
pub struct SizeIndexedPool {
    pub large: Vec<MotionClip>,
    pub small: Vec<MotionClip>,
}

impl SizeIndexedPool {
    pub fn is_empty(&self) -> bool {
        self.large.is_empty() && self.small.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &MotionClip> {
        self.large.iter().chain(self.small.iter())
    }
}

/// Reserved custom-action names that collide with built-in actions.
pub const RESERVED_ACTION_NAMES: &[&str] = &["speak", "idle"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_emotion_trims_and_lowercases() {
        assert_eq!(normalize_emotion("  Happy  "), "happy");
        assert_eq!(normalize_emotion("SAD"), "sad");
    }

    #[test]
    fn normalize_emotion_empty_falls_back_to_neutral() {
        assert_eq!(normalize_emotion(""), "neutral");
        assert_eq!(normalize_emotion("   "), "neutral");
    }

    #[test]
    fn audio_profile_voice_for_falls_back_to_default() {
        let profile = AudioProfile::CommandLine {
            binary: "tts".into(),
            default_voice: "anna".into(),
            voices_by_emotion: HashMap::from([("happy".to_string(), "anna-happy".to_string())]),
        };
        assert_eq!(profile.voice_for("happy"), Some("anna-happy"));
        assert_eq!(profile.voice_for("sad"), Some("anna"));
    }

    #[test]
    fn size_indexed_pool_all_chains_both_classes() {
        let mut pool = SizeIndexedPool::default();
        pool.large.push(MotionClip {
            id: "l1".into(),
            absolute_path: "l1.mp4".into(),
            kind: ClipKind::Idle,
            size_class: Some(SizeClass::Large),
            emotion: "neutral".into(),
        });
        pool.small.push(MotionClip {
            id: "s1".into(),
            absolute_path: "s1.mp4".into(),
            kind: ClipKind::Idle,
            size_class: Some(SizeClass::Small),
            emotion: "neutral".into(),
        });
        assert_eq!(pool.all().count(), 2);
        assert!(!pool.is_empty());
    }
}
