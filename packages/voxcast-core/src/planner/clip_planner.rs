//! Clip Planner: selects an ordered sequence of motion clips whose combined
//! duration fits a requested target, flanked by optional enter/exit
//! transitions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::{IteratorRandom, SliceRandom};
use rand::thread_rng;

use crate::error::{AppError, AppResult};
use crate::media::{EncoderFacade, VideoSpec};
use crate::preset::resolver::resolve_pool;
use crate::preset::{normalize_emotion, MotionClip, Preset, SizeIndexedPool, RESERVED_ACTION_NAMES};
use crate::protocol_constants::{
    FILL_MAX_ITERATIONS, FILL_SLACK_MS, MAX_SINGLE_CLIP_REPEATS, MIN_CANDIDATE_DURATION_MS,
};

/// One clip in an ordered [`ClipPlan`].
#[derive(Debug, Clone)]
pub struct ClipPlanEntry {
    pub clip_id: String,
    pub source_path: PathBuf,
    pub duration_ms: u32,
}

/// Ordered sequence of clips produced by the planner, plus the duration
/// breakdown the Generation Service needs to fit audio against it.
#[derive(Debug, Clone, Default)]
pub struct ClipPlan {
    pub entries: Vec<ClipPlanEntry>,
    pub total_duration_ms: u32,
    /// Core speech window, excluding enter/exit transitions.
    pub talk_duration_ms: u32,
    pub enter_duration_ms: u32,
    pub exit_duration_ms: u32,
    pub motion_ids: Vec<String>,
}

/// A clip candidate annotated with its probed duration.
type Candidate = (MotionClip, u32);

/// Reported mismatch between a clip's video spec and its preset's majority
/// spec. Warning-only; never blocks startup or generation.
#[derive(Debug, Clone)]
pub struct SpecMismatch {
    pub preset_id: String,
    pub clip_id: String,
    pub path: PathBuf,
    pub spec: VideoSpec,
    pub majority_spec: VideoSpec,
    pub suggested_reencode: String,
}

pub struct ClipPlanner {
    presets: Arc<HashMap<String, Preset>>,
    encoder: Arc<EncoderFacade>,
}

impl ClipPlanner {
    pub fn new(presets: Arc<HashMap<String, Preset>>, encoder: Arc<EncoderFacade>) -> Self {
        Self { presets, encoder }
    }

    pub fn encoder(&self) -> &Arc<EncoderFacade> {
        &self.encoder
    }

    fn preset(&self, preset_id: &str) -> AppResult<&Preset> {
        self.presets
            .get(preset_id)
            .ok_or_else(|| AppError::NotFound(format!("preset '{preset_id}' not found")))
    }

    async fn probe_candidates<'a>(
        &self,
        clips: impl Iterator<Item = &'a MotionClip>,
    ) -> AppResult<Vec<Candidate>> {
        let mut out = Vec::new();
        for clip in clips {
            let ms = self.encoder.probe_video_duration(&clip.absolute_path).await?;
            if ms > MIN_CANDIDATE_DURATION_MS {
                out.push((clip.clone(), ms));
            }
        }
        Ok(out)
    }

    /// Pure selection algorithm, factored out of the async probing step so
    /// it can be exercised directly in tests.
    fn fill_loop_sync(large: &[Candidate], small: &[Candidate], required_ms: u32) -> Option<Vec<ClipPlanEntry>> {
        if large.is_empty() && small.is_empty() {
            return None;
        }
        let mut rng = thread_rng();
        let mut entries = Vec::new();
        let mut covered: u32 = 0;

        for _ in 0..FILL_MAX_ITERATIONS {
            if covered + FILL_SLACK_MS >= required_ms {
                break;
            }
            let remaining = required_ms.saturating_sub(covered);
            let max_allowed = remaining + FILL_SLACK_MS;
            let pick = large
                .iter()
                .filter(|(_, d)| *d <= max_allowed)
                .choose(&mut rng)
                .or_else(|| small.iter().filter(|(_, d)| *d <= max_allowed).choose(&mut rng))
                .or_else(|| small.choose(&mut rng))
                .or_else(|| large.choose(&mut rng));
            let Some((clip, duration)) = pick else {
                break;
            };
            entries.push(ClipPlanEntry {
                clip_id: clip.id.clone(),
                source_path: clip.absolute_path.clone(),
                duration_ms: *duration,
            });
            covered += duration;
        }

        if entries.is_empty() {
            let (clip, duration) = large.first().or_else(|| small.first())?;
            entries.push(ClipPlanEntry {
                clip_id: clip.id.clone(),
                source_path: clip.absolute_path.clone(),
                duration_ms: *duration,
            });
        }
        Some(entries)
    }

    async fn fill_loop(&self, pool: &SizeIndexedPool, required_ms: u32) -> AppResult<Vec<ClipPlanEntry>> {
        let large = self.probe_candidates(pool.large.iter()).await?;
        let small = self.probe_candidates(pool.small.iter()).await?;
        Self::fill_loop_sync(&large, &small, required_ms)
            .ok_or_else(|| AppError::NotFound("no usable candidate clips in pool".to_string()))
    }

    fn resolve_transition<'a>(map: &'a HashMap<String, Vec<MotionClip>>, emotion: &str) -> Option<&'a MotionClip> {
        let pool = resolve_pool(map, emotion, |v: &Vec<MotionClip>| v.is_empty())?;
        pool.choose(&mut thread_rng())
    }

    /// Fills `required_ms` with speech clips from the emotion-scoped pool
    /// (falling back to "neutral", then any non-empty pool), flanked by
    /// optional enter/exit transitions.
    pub async fn build_speech_plan(&self, preset_id: &str, emotion: &str, required_ms: u32) -> AppResult<ClipPlan> {
        let preset = self.preset(preset_id)?;
        let emotion = normalize_emotion(emotion);
        let pool = resolve_pool(&preset.speech_pool, &emotion, |p: &SizeIndexedPool| p.is_empty())
            .ok_or_else(|| AppError::NotFound(format!("no speech pool available for preset '{preset_id}'")))?;
        let core_entries = self.fill_loop(pool, required_ms).await?;
        let talk_duration_ms: u32 = core_entries.iter().map(|e| e.duration_ms).sum();

        let mut entries = Vec::new();
        let mut enter_duration_ms = 0;
        let mut exit_duration_ms = 0;

        if let Some(enter_clip) = Self::resolve_transition(&preset.enter_transitions, &emotion) {
            let ms = self.encoder.probe_video_duration(&enter_clip.absolute_path).await?;
            enter_duration_ms = ms;
            entries.push(ClipPlanEntry {
                clip_id: enter_clip.id.clone(),
                source_path: enter_clip.absolute_path.clone(),
                duration_ms: ms,
            });
        }
        entries.extend(core_entries);
        if let Some(exit_clip) = Self::resolve_transition(&preset.exit_transitions, &emotion) {
            let ms = self.encoder.probe_video_duration(&exit_clip.absolute_path).await?;
            exit_duration_ms = ms;
            entries.push(ClipPlanEntry {
                clip_id: exit_clip.id.clone(),
                source_path: exit_clip.absolute_path.clone(),
                duration_ms: ms,
            });
        }

        let motion_ids = entries.iter().map(|e| e.clip_id.clone()).collect();
        let total_duration_ms = enter_duration_ms + talk_duration_ms + exit_duration_ms;

        Ok(ClipPlan {
            entries,
            total_duration_ms,
            talk_duration_ms,
            enter_duration_ms,
            exit_duration_ms,
            motion_ids,
        })
    }

    /// Repeats a specific idle clip (if `motion_id` is given) or runs the
    /// fill loop over the idle pool, optionally filtered by emotion.
    pub async fn build_idle_plan(
        &self,
        preset_id: &str,
        duration_ms: u32,
        motion_id: Option<&str>,
        emotion: Option<&str>,
    ) -> AppResult<ClipPlan> {
        let preset = self.preset(preset_id)?;

        if let Some(motion_id) = motion_id {
            let clip = preset
                .idle_pool
                .all()
                .find(|c| c.id == motion_id)
                .ok_or_else(|| AppError::NotFound(format!("motion '{motion_id}' not found in idle pool")))?;
            let unit_ms = self.encoder.probe_video_duration(&clip.absolute_path).await?;
            let mut entries = Vec::new();
            let mut covered = 0u32;
            while covered < duration_ms && entries.len() < MAX_SINGLE_CLIP_REPEATS as usize {
                entries.push(ClipPlanEntry {
                    clip_id: clip.id.clone(),
                    source_path: clip.absolute_path.clone(),
                    duration_ms: unit_ms,
                });
                covered += unit_ms;
            }
            if entries.is_empty() {
                entries.push(ClipPlanEntry {
                    clip_id: clip.id.clone(),
                    source_path: clip.absolute_path.clone(),
                    duration_ms: unit_ms,
                });
                covered = unit_ms;
            }
            let motion_ids = entries.iter().map(|e| e.clip_id.clone()).collect();
            return Ok(ClipPlan {
                entries,
                total_duration_ms: covered,
                talk_duration_ms: 0,
                enter_duration_ms: 0,
                exit_duration_ms: 0,
                motion_ids,
            });
        }

        let pool = match emotion {
            Some(emotion) => {
                let normalized = normalize_emotion(emotion);
                let large: Vec<MotionClip> = preset
                    .idle_pool
                    .large
                    .iter()
                    .filter(|c| c.emotion == normalized)
                    .cloned()
                    .collect();
                let small: Vec<MotionClip> = preset
                    .idle_pool
                    .small
                    .iter()
                    .filter(|c| c.emotion == normalized)
                    .cloned()
                    .collect();
                let filtered = SizeIndexedPool { large, small };
                if filtered.is_empty() {
                    preset.idle_pool.clone()
                } else {
                    filtered
                }
            }
            None => preset.idle_pool.clone(),
        };

        let entries = self.fill_loop(&pool, duration_ms).await?;
        let total_duration_ms: u32 = entries.iter().map(|e| e.duration_ms).sum();
        let motion_ids = entries.iter().map(|e| e.clip_id.clone()).collect();
        Ok(ClipPlan {
            entries,
            total_duration_ms,
            talk_duration_ms: 0,
            enter_duration_ms: 0,
            exit_duration_ms: 0,
            motion_ids,
        })
    }

    /// Looks up a custom action clip by id, rejecting the reserved
    /// `speak`/`idle` names.
    pub async fn build_action_clip(&self, preset_id: &str, action_id: &str) -> AppResult<ClipPlan> {
        let preset = self.preset(preset_id)?;
        let key = action_id.to_lowercase();
        if RESERVED_ACTION_NAMES.contains(&key.as_str()) {
            return Err(AppError::Validation(format!("action '{action_id}' is reserved")));
        }
        let clip = preset
            .actions_by_id
            .get(&key)
            .ok_or_else(|| AppError::NotFound(format!("custom action '{action_id}' not found")))?;
        let ms = self.encoder.probe_video_duration(&clip.absolute_path).await?;
        Ok(ClipPlan {
            entries: vec![ClipPlanEntry {
                clip_id: clip.id.clone(),
                source_path: clip.absolute_path.clone(),
                duration_ms: ms,
            }],
            total_duration_ms: ms,
            talk_duration_ms: 0,
            enter_duration_ms: 0,
            exit_duration_ms: 0,
            motion_ids: vec![clip.id.clone()],
        })
    }

    fn all_clips(preset: &Preset) -> impl Iterator<Item = &MotionClip> {
        preset
            .idle_pool
            .all()
            .chain(preset.speech_pool.values().flat_map(|p| p.all()))
            .chain(preset.enter_transitions.values().flatten())
            .chain(preset.exit_transitions.values().flatten())
            .chain(preset.actions_by_id.values())
    }

    /// Probes every clip in every preset and compares video specs, grouping
    /// by the majority spec per preset. Warning-only: mismatches are
    /// returned for the caller to log, never treated as fatal.
    pub async fn validate_motion_specs(&self) -> Vec<SpecMismatch> {
        let mut mismatches = Vec::new();

        for preset in self.presets.values() {
            let mut counts: HashMap<VideoSpec, u32> = HashMap::new();
            let mut clip_specs: Vec<(&MotionClip, VideoSpec)> = Vec::new();

            for clip in Self::all_clips(preset) {
                match self.encoder.get_video_spec(&clip.absolute_path).await {
                    Ok(spec) => {
                        *counts.entry(spec.clone()).or_insert(0) += 1;
                        clip_specs.push((clip, spec));
                    }
                    Err(_) => continue,
                }
            }

            let Some(majority_spec) = counts.iter().max_by_key(|(_, count)| **count).map(|(spec, _)| spec.clone())
            else {
                continue;
            };

            for (clip, spec) in clip_specs {
                if spec != majority_spec {
                    mismatches.push(SpecMismatch {
                        preset_id: preset.id.clone(),
                        clip_id: clip.id.clone(),
                        path: clip.absolute_path.clone(),
                        spec: spec.clone(),
                        suggested_reencode: format!(
                            "ffmpeg -y -i {:?} -vf scale={}:{},fps={} -pix_fmt {} -c:v libx264 -c:a copy {:?}.fixed.mp4",
                            clip.absolute_path,
                            majority_spec.width,
                            majority_spec.height,
                            majority_spec.frame_rate,
                            majority_spec.pix_fmt,
                            clip.absolute_path
                        ),
                        majority_spec: majority_spec.clone(),
                    });
                }
            }
        }

        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::ClipKind;

    fn clip(id: &str) -> MotionClip {
        MotionClip {
            id: id.to_string(),
            absolute_path: PathBuf::from(format!("{id}.mp4")),
            kind: ClipKind::Speech,
            size_class: None,
            emotion: "neutral".to_string(),
        }
    }

    #[test]
    fn fill_loop_stops_within_slack_of_target() {
        let large = vec![(clip("l1"), 900u32), (clip("l2"), 1000u32)];
        let small: Vec<(MotionClip, u32)> = vec![];
        let entries = ClipPlanner::fill_loop_sync(&large, &small, 1800).unwrap();
        let covered: u32 = entries.iter().map(|e| e.duration_ms).sum();
        assert!(covered + FILL_SLACK_MS >= 1800);
    }

    #[test]
    fn fill_loop_never_empty_for_short_target() {
        let large = vec![(clip("l1"), 5000u32)];
        let small: Vec<(MotionClip, u32)> = vec![];
        let entries = ClipPlanner::fill_loop_sync(&large, &small, 10).unwrap();
        assert!(!entries.is_empty());
    }

    #[test]
    fn fill_loop_none_when_both_pools_empty() {
        let large: Vec<(MotionClip, u32)> = vec![];
        let small: Vec<(MotionClip, u32)> = vec![];
        assert!(ClipPlanner::fill_loop_sync(&large, &small, 1000).is_none());
    }

    #[test]
    fn fill_loop_falls_back_to_small_when_large_overshoots() {
        let large = vec![(clip("l1"), 5000u32)];
        let small = vec![(clip("s1"), 200u32)];
        let entries = ClipPlanner::fill_loop_sync(&large, &small, 200).unwrap();
        assert_eq!(entries[0].clip_id, "s1");
    }
}
