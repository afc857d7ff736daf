//! Self-referential concat-demuxer playlist writer.
//!
//! The central trick of the Idle-Loop Controller: a concat-demuxer manifest
//! whose last entry points back to itself, so the consumer (ffmpeg) loops
//! forever via EOF re-read. The only synchronization primitive is an atomic
//! rename — no lock, no channel, no shared memory between producer and
//! consumer.

use std::path::{Path, PathBuf};

use crate::error::AppResult;

/// `ffconcat version 1.0` header line.
const PLAYLIST_HEADER: &str = "ffconcat version 1.0";

/// Escapes a path for use inside a single-quoted concat-demuxer `file` line.
/// Single quotes are escaped as `'\''`, the shell-quoting idiom ffmpeg's
/// concat demuxer itself expects.
fn escape_single_quoted(path: &str) -> String {
    path.replace('\'', r"'\''")
}

fn file_line(relative: &str) -> String {
    format!("file '{}'", escape_single_quoted(relative))
}

/// Builds the body of a playlist file: header, one `file` line per entry,
/// and (if `self_reference` is set) a trailing self-reference line.
fn build_body(entries: &[String], self_reference: Option<&str>) -> String {
    let mut lines = Vec::with_capacity(entries.len() + 2);
    lines.push(PLAYLIST_HEADER.to_string());
    for entry in entries {
        lines.push(file_line(entry));
    }
    if let Some(name) = self_reference {
        lines.push(file_line(name));
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// Atomically writes `body` to `path`: write to a sibling temp file, then
/// rename. The rename is the sole point of synchronization with a concurrent
/// reader — it never observes a partially written file.
pub fn write_atomic(path: &Path, body: &str) -> AppResult<()> {
    let temp_path = temp_path_for(path);
    std::fs::write(&temp_path, body)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    let file_name = path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "playlist.tmp".to_string());
    temp.set_file_name(file_name);
    temp
}

/// Writes the live idle playlist (`idle.txt`): the given entries followed
/// by a self-reference to `self_name` (normally `"idle.txt"`).
pub fn write_idle_playlist(path: &Path, entries: &[String], self_name: &str) -> AppResult<()> {
    write_atomic(path, &build_body(entries, Some(self_name)))
}

/// Writes a one-shot task playlist (`task-<uuid>.txt`): just the given
/// entries, no self-reference, no idle tail. Read once then abandoned.
pub fn write_task_playlist(path: &Path, entries: &[String]) -> AppResult<()> {
    write_atomic(path, &build_body(entries, None))
}

/// Returns `true` if `body` is a syntactically valid self-referential
/// playlist ending with a reference to `self_name` — used in tests to assert
/// the "every written idle.txt ends with a self-reference" invariant.
pub fn ends_with_self_reference(body: &str, self_name: &str) -> bool {
    body.trim_end()
        .lines()
        .last()
        .is_some_and(|line| line == file_line(self_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn escapes_single_quotes_in_paths() {
        assert_eq!(escape_single_quoted("it's.mp4"), r"it'\''s.mp4");
    }

    #[test]
    fn idle_playlist_ends_with_self_reference() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle.txt");
        write_idle_playlist(&path, &["clip1.mp4".to_string()], "idle.txt").unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(ends_with_self_reference(&body, "idle.txt"));
        assert!(body.starts_with(PLAYLIST_HEADER));
    }

    #[test]
    fn task_playlist_has_no_self_reference() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("task-1.txt");
        write_task_playlist(&path, &["clip1.mp4".to_string(), "clip2.mp4".to_string()]).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(!ends_with_self_reference(&body, "task-1.txt"));
        assert_eq!(body.lines().count(), 3); // header + 2 entries
    }

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle.txt");
        write_idle_playlist(&path, &["a.mp4".to_string()], "idle.txt").unwrap();
        write_idle_playlist(&path, &["b.mp4".to_string()], "idle.txt").unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("b.mp4"));
        assert!(!body.contains("a.mp4"));
    }

    #[test]
    fn temp_file_does_not_linger_after_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idle.txt");
        write_idle_playlist(&path, &["a.mp4".to_string()], "idle.txt").unwrap();
        assert!(!temp_path_for(&path).exists());
    }
}
