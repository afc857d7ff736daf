//! Preset loading: turns a deserialized preset file into indexed, in-memory
//! [`Preset`]s.
//!
//! Schema validation of the preset file itself is out of scope (per the
//! spec's Non-goals) — we deserialize an already-well-formed file with
//! `serde`. What *is* in scope is resolving each clip's path against
//! `motions_dir` and rejecting anything that escapes it, and building the
//! per-preset pools the Clip Planner indexes against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::preset::types::{
    normalize_emotion, AudioProfile, ClipKind, MotionClip, Preset, SizeClass, SizeIndexedPool,
};
use crate::utils::validate_motion_path;

/// On-disk representation of a single motion clip entry, before path
/// resolution against `motions_dir`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMotionClip {
    id: String,
    /// Relative to `motions_dir`; validated and rejected if it escapes.
    path: String,
    kind: ClipKind,
    size_class: Option<SizeClass>,
    #[serde(default)]
    emotion: String,
}

/// On-disk representation of one preset, before indexing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPreset {
    id: String,
    clips: Vec<RawMotionClip>,
    audio_profile: AudioProfile,
    rtmp_output_url: String,
}

/// Top-level preset file shape: `{ "presets": [...] }`.
#[derive(Debug, Deserialize)]
pub struct PresetFile {
    presets: Vec<RawPreset>,
}

/// Loads presets from a deserialized [`PresetFile`], resolving every clip
/// path against `motions_dir` and building the pools the Clip Planner uses.
pub struct PresetResolver;

impl PresetResolver {
    /// Reads and parses `path` as JSON, then resolves it into a map of
    /// preset id to [`Preset`].
    pub fn load_from_file(path: &Path, motions_dir: &Path) -> AppResult<HashMap<String, Preset>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AppError::Internal(format!("reading preset file {path:?}: {e}")))?;
        let file: PresetFile = serde_json::from_str(&contents)
            .map_err(|e| AppError::Validation(format!("parsing preset file {path:?}: {e}")))?;
        Self::resolve(file, motions_dir)
    }

    /// Resolves an already-parsed [`PresetFile`] into indexed presets.
    pub fn resolve(file: PresetFile, motions_dir: &Path) -> AppResult<HashMap<String, Preset>> {
        let mut presets = HashMap::with_capacity(file.presets.len());
        for raw in file.presets {
            let preset = Self::resolve_one(raw, motions_dir)?;
            presets.insert(preset.id.clone(), preset);
        }
        Ok(presets)
    }

    fn resolve_one(raw: RawPreset, motions_dir: &Path) -> AppResult<Preset> {
        let mut actions_by_id = HashMap::new();
        let mut idle_pool = SizeIndexedPool::default();
        let mut speech_pool: HashMap<String, SizeIndexedPool> = HashMap::new();
        let mut enter_transitions: HashMap<String, Vec<MotionClip>> = HashMap::new();
        let mut exit_transitions: HashMap<String, Vec<MotionClip>> = HashMap::new();

        for raw_clip in raw.clips {
            let absolute_path = validate_motion_path(motions_dir, &raw_clip.path)?;
            let mut clip = MotionClip {
                id: raw_clip.id,
                absolute_path,
                kind: raw_clip.kind,
                size_class: raw_clip.size_class,
                emotion: raw_clip.emotion,
            };
            clip.normalize();

            match clip.kind {
                ClipKind::Idle => push_by_size(&mut idle_pool, clip),
                ClipKind::Speech => {
                    let pool = speech_pool.entry(clip.emotion.clone()).or_default();
                    push_by_size(pool, clip);
                }
                ClipKind::TransitionEnter => {
                    enter_transitions.entry(clip.emotion.clone()).or_default().push(clip);
                }
                ClipKind::TransitionExit => {
                    exit_transitions.entry(clip.emotion.clone()).or_default().push(clip);
                }
                ClipKind::CustomAction => {
                    actions_by_id.insert(clip.id.to_lowercase(), clip);
                }
            }
        }

        Ok(Preset {
            id: raw.id,
            actions_by_id,
            idle_pool,
            speech_pool,
            enter_transitions,
            exit_transitions,
            audio_profile: raw.audio_profile,
            rtmp_output_url: raw.rtmp_output_url,
        })
    }
}

fn push_by_size(pool: &mut SizeIndexedPool, clip: MotionClip) {
    match clip.size_class {
        Some(SizeClass::Small) => pool.small.push(clip),
        _ => pool.large.push(clip),
    }
}

/// Looks up a pool for `emotion`, falling back to `"neutral"`, then to any
/// non-empty pool in the map. Shared by speech-pool and transition-map lookups.
pub fn resolve_pool<'a, T>(
    map: &'a HashMap<String, T>,
    emotion: &str,
    is_empty: impl Fn(&T) -> bool,
) -> Option<&'a T> {
    let emotion = normalize_emotion(emotion);
    if let Some(pool) = map.get(&emotion) {
        if !is_empty(pool) {
            return Some(pool);
        }
    }
    if emotion != "neutral" {
        if let Some(pool) = map.get("neutral") {
            if !is_empty(pool) {
                return Some(pool);
            }
        }
    }
    map.values().find(|p| !is_empty(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_file() -> PresetFile {
        serde_json::from_str(
            r#"{
                "presets": [{
                    "id": "anchor-a",
                    "rtmpOutputUrl": "rtmp://localhost/live/anchor-a",
                    "audioProfile": {"engine": "silent"},
                    "clips": [
                        {"id": "idle-1", "path": "idle/wave.mp4", "kind": "idle", "sizeClass": "large"},
                        {"id": "speech-1", "path": "speech/neutral-1.mp4", "kind": "speech", "sizeClass": "small", "emotion": "Neutral"},
                        {"id": "enter-1", "path": "transitions/enter.mp4", "kind": "transition-enter"},
                        {"id": "wave-action", "path": "actions/wave.mp4", "kind": "custom-action"}
                    ]
                }]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn resolves_pools_by_kind() {
        let dir = PathBuf::from("/motions");
        let presets = PresetResolver::resolve(sample_file(), &dir).unwrap();
        let preset = presets.get("anchor-a").unwrap();

        assert_eq!(preset.idle_pool.large.len(), 1);
        assert!(preset.speech_pool.contains_key("neutral"));
        assert_eq!(preset.speech_pool["neutral"].small.len(), 1);
        assert_eq!(preset.enter_transitions["neutral"].len(), 1);
        assert!(preset.actions_by_id.contains_key("wave-action"));
    }

    #[test]
    fn rejects_escaping_clip_path() {
        let mut file = sample_file();
        file.presets[0].clips[0].path = "../outside.mp4".to_string();
        let dir = PathBuf::from("/motions");
        assert!(PresetResolver::resolve(file, &dir).is_err());
    }

    #[test]
    fn resolve_pool_falls_back_to_neutral_then_any() {
        let mut map: HashMap<String, Vec<i32>> = HashMap::new();
        map.insert("happy".to_string(), vec![1]);
        map.insert("neutral".to_string(), vec![2]);
        let is_empty = |v: &Vec<i32>| v.is_empty();

        assert_eq!(resolve_pool(&map, "happy", is_empty), Some(&vec![1]));
        assert_eq!(resolve_pool(&map, "sad", is_empty), Some(&vec![2]));

        let mut only_other: HashMap<String, Vec<i32>> = HashMap::new();
        only_other.insert("angry".to_string(), vec![3]);
        assert_eq!(resolve_pool(&only_other, "sad", is_empty), Some(&vec![3]));
    }
}
