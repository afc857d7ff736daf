//! Content-addressed cache: hashes request descriptors, tracks generated
//! outputs in an append-only log, and reconciles that log against the
//! output directory at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppResult;

/// The three shapes a cache key descriptor can take, matching the three
/// kinds of generation request. Field order inside each variant is
/// alphabetical so `serde_json`'s map serialization (itself insertion-order)
/// is made deterministic by sorting before hashing — see [`hash_descriptor`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CacheDescriptor {
    #[serde(rename = "speak")]
    Speak {
        #[serde(rename = "presetId")]
        preset_id: String,
        #[serde(rename = "inputType")]
        input_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(rename = "audioHash", skip_serializing_if = "Option::is_none")]
        audio_hash: Option<String>,
        #[serde(rename = "ttsEngine", skip_serializing_if = "Option::is_none")]
        tts_engine: Option<String>,
        #[serde(rename = "ttsSettings", skip_serializing_if = "Option::is_none")]
        tts_settings: Option<serde_json::Value>,
        emotion: String,
    },
    #[serde(rename = "idle")]
    Idle {
        #[serde(rename = "presetId")]
        preset_id: String,
        #[serde(rename = "durationMs")]
        duration_ms: u32,
        #[serde(rename = "motionId", skip_serializing_if = "Option::is_none")]
        motion_id: Option<String>,
        emotion: String,
    },
    #[serde(rename = "combined")]
    Combined {
        #[serde(rename = "presetId")]
        preset_id: String,
        #[serde(rename = "actionHashes")]
        action_hashes: Vec<String>,
    },
}

/// Recursively sorts a [`serde_json::Value`]'s object keys, so that two
/// structurally-equal descriptors serialize to byte-identical JSON
/// regardless of field insertion order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 hex digest of the canonicalized (sorted-keys) JSON serialization
/// of a cache descriptor.
pub fn hash_descriptor(descriptor: &CacheDescriptor) -> String {
    let value = serde_json::to_value(descriptor).expect("CacheDescriptor always serializes");
    let canonical = canonicalize(&value);
    let bytes = serde_json::to_vec(&canonical).expect("canonicalized value always serializes");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// SHA-256 hex digest of raw bytes, used for `audioHash` in the speak
/// descriptor.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// One line of `output.jsonl`: records that a cache hit is backed by a real
/// file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLogEntry {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "presetId")]
    pub preset_id: String,
    #[serde(flatten)]
    pub descriptor_fields: HashMap<String, serde_json::Value>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// Hashing, existence checks, and log reconciliation over `<output_dir>`.
pub struct CacheService {
    output_dir: PathBuf,
}

impl CacheService {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    fn log_path(&self) -> PathBuf {
        self.output_dir.join("output.jsonl")
    }

    pub fn output_path(&self, hash: &str) -> PathBuf {
        self.output_dir.join(format!("{hash}.mp4"))
    }

    /// `true` if `<output_dir>/<hash>.mp4` exists.
    pub fn is_cached(&self, hash: &str) -> bool {
        self.output_path(hash).exists()
    }

    /// Appends a log entry for a newly generated (or reused) output.
    pub fn append_log(&self, entry: &CacheLogEntry) -> AppResult<()> {
        use std::io::Write;
        let line = serde_json::to_string(entry)
            .map_err(|e| crate::error::AppError::Internal(format!("serializing cache log entry: {e}")))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Reads `output.jsonl`, keeps only entries whose referenced file still
    /// exists, and rewrites the log atomically. Malformed JSON lines are
    /// dropped silently (the caller logs a warning with the count).
    ///
    /// Returns `(kept, dropped)` counts.
    pub fn reconcile(&self) -> AppResult<(usize, usize)> {
        let log_path = self.log_path();
        let contents = match std::fs::read_to_string(&log_path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
            Err(e) => return Err(e.into()),
        };

        let mut kept = Vec::new();
        let mut dropped = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CacheLogEntry>(line) {
                Ok(entry) => {
                    let referenced = self.output_dir.join(&entry.file);
                    if referenced.exists() {
                        kept.push(line.to_string());
                    } else {
                        dropped += 1;
                    }
                }
                Err(_) => dropped += 1,
            }
        }

        let mut body = kept.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        write_atomic(&log_path, &body)?;

        Ok((kept.len(), dropped))
    }
}

fn write_atomic(path: &Path, body: &str) -> AppResult<()> {
    let temp_path = path.with_extension("jsonl.tmp");
    std::fs::write(&temp_path, body)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn identical_descriptors_hash_identically_regardless_of_field_order() {
        let a = CacheDescriptor::Idle {
            preset_id: "anchor".to_string(),
            duration_ms: 1000,
            motion_id: None,
            emotion: "neutral".to_string(),
        };
        let b = CacheDescriptor::Idle {
            preset_id: "anchor".to_string(),
            duration_ms: 1000,
            motion_id: None,
            emotion: "neutral".to_string(),
        };
        assert_eq!(hash_descriptor(&a), hash_descriptor(&b));
    }

    #[test]
    fn different_descriptors_hash_differently() {
        let a = CacheDescriptor::Idle {
            preset_id: "anchor".to_string(),
            duration_ms: 1000,
            motion_id: None,
            emotion: "neutral".to_string(),
        };
        let b = CacheDescriptor::Idle {
            preset_id: "anchor".to_string(),
            duration_ms: 2000,
            motion_id: None,
            emotion: "neutral".to_string(),
        };
        assert_ne!(hash_descriptor(&a), hash_descriptor(&b));
    }

    #[test]
    fn combined_descriptor_is_order_sensitive() {
        let a = CacheDescriptor::Combined {
            preset_id: "anchor".to_string(),
            action_hashes: vec!["h1".to_string(), "h2".to_string()],
        };
        let b = CacheDescriptor::Combined {
            preset_id: "anchor".to_string(),
            action_hashes: vec!["h2".to_string(), "h1".to_string()],
        };
        assert_ne!(hash_descriptor(&a), hash_descriptor(&b));
    }

    #[test]
    fn reconcile_drops_entries_for_missing_files_and_keeps_existing() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("present.mp4"), b"data").unwrap();
        let log_path = dir.path().join("output.jsonl");
        let present = serde_json::json!({"file":"present.mp4","type":"idle","presetId":"a","createdAt":"now"});
        let missing = serde_json::json!({"file":"missing.mp4","type":"idle","presetId":"a","createdAt":"now"});
        std::fs::write(&log_path, format!("{present}\n{missing}\nnot json at all\n")).unwrap();

        let service = CacheService::new(dir.path().to_path_buf());
        let (kept, dropped) = service.reconcile().unwrap();
        assert_eq!(kept, 1);
        assert_eq!(dropped, 2);

        let rewritten = std::fs::read_to_string(&log_path).unwrap();
        assert!(rewritten.contains("present.mp4"));
        assert!(!rewritten.contains("missing.mp4"));
    }

    #[test]
    fn reconcile_on_missing_log_returns_zero_zero() {
        let dir = tempdir().unwrap();
        let service = CacheService::new(dir.path().to_path_buf());
        assert_eq!(service.reconcile().unwrap(), (0, 0));
    }

    #[test]
    fn is_cached_reflects_filesystem() {
        let dir = tempdir().unwrap();
        let service = CacheService::new(dir.path().to_path_buf());
        assert!(!service.is_cached("abc123"));
        std::fs::write(dir.path().join("abc123.mp4"), b"x").unwrap();
        assert!(service.is_cached("abc123"));
    }
}
