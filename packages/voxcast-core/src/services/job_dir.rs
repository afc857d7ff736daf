//! Scoped job directory: every intermediate file a Generation Service
//! invocation produces lives under one directory that is guaranteed removed
//! on exit, success or failure.

use std::path::{Path, PathBuf};

/// RAII guard around a freshly created temporary directory under
/// `<output_dir>/jobs/`. Removed on drop; failures to remove are logged,
/// never panicked on.
pub struct JobDir {
    path: PathBuf,
}

impl JobDir {
    /// Creates a new job directory named `<prefix>-<uuid>` under `jobs_root`.
    pub fn create(jobs_root: &Path, prefix: &str) -> std::io::Result<Self> {
        let path = jobs_root.join(format!("{prefix}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for JobDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("[JobDir] failed to remove {:?}: {e}", self.path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_directory_on_drop() {
        let root = tempdir().unwrap();
        let job_path;
        {
            let job = JobDir::create(root.path(), "speak").unwrap();
            job_path = job.path().to_path_buf();
            assert!(job_path.exists());
            std::fs::write(job.join("scratch.txt"), b"x").unwrap();
        }
        assert!(!job_path.exists());
    }

    #[test]
    fn survives_double_removal() {
        let root = tempdir().unwrap();
        let job = JobDir::create(root.path(), "idle").unwrap();
        let path = job.path().to_path_buf();
        std::fs::remove_dir_all(&path).unwrap();
        drop(job);
        assert!(!path.exists());
    }
}
