// Request-scoped temporary artifacts
// Every file or directory a run creates is registered here and removed on exit

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Tracks temporary artifacts owned by one in-flight request
///
/// Entries are removed newest first by [`ArtifactTracker::cleanup`]. Whatever
/// is still registered when the tracker is dropped (panic, early return,
/// aborted task) is removed synchronously in `Drop`, so each artifact is
/// deleted exactly once on every exit path.
#[derive(Debug, Default)]
pub struct ArtifactTracker {
    entries: Vec<PathBuf>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        ArtifactTracker {
            entries: Vec::new(),
        }
    }

    /// Create a uniquely named directory under `root` and track it
    pub fn create_dir(&mut self, root: &Path, id: &Uuid) -> io::Result<PathBuf> {
        let dir = root.join(id.to_string());
        fs::create_dir_all(&dir)?;
        self.register(dir.clone());
        Ok(dir)
    }

    /// Write `data` to `path` and track it
    ///
    /// The path is registered before writing so a partial file is still
    /// cleaned up when the write fails.
    pub async fn write_file(&mut self, path: PathBuf, data: &[u8]) -> io::Result<PathBuf> {
        self.register(path.clone());
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    /// Track an artifact created elsewhere (may not exist yet)
    pub fn register(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.entries.contains(&path) {
            self.entries.push(path);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every tracked artifact still present, newest first
    ///
    /// Returns how many artifacts were actually deleted.
    pub async fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        while let Some(path) = self.entries.pop() {
            match remove_async(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => log::warn!("Failed to remove artifact {}: {}", path.display(), e),
            }
        }
        removed
    }
}

impl Drop for ArtifactTracker {
    fn drop(&mut self) {
        while let Some(path) = self.entries.pop() {
            if let Err(e) = remove_sync(&path) {
                log::warn!("Failed to remove artifact {}: {}", path.display(), e);
            }
        }
    }
}

async fn remove_async(path: &Path) -> io::Result<bool> {
    let meta = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn remove_sync(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}

/// Keep only a short alphanumeric extension from a caller-supplied filename
///
/// Stored names are generated, so the caller's name never reaches the
/// filesystem; returns `None` when nothing usable remains.
pub fn sanitized_extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 8 {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_removes_files_and_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = ArtifactTracker::new();

        let run_dir = tracker.create_dir(temp_dir.path(), &Uuid::new_v4()).unwrap();
        let upload = tracker
            .write_file(run_dir.join("input.wav"), b"RIFF")
            .await
            .unwrap();
        // Untracked file inside a tracked directory goes with it
        std::fs::write(run_dir.join("scratch.tmp"), b"x").unwrap();

        assert!(upload.exists());
        let removed = tracker.cleanup().await;

        assert_eq!(removed, 2);
        assert!(!upload.exists());
        assert!(!run_dir.exists());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_skips_missing_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = ArtifactTracker::new();
        tracker.register(temp_dir.path().join("never-created.mid"));

        assert_eq!(tracker.cleanup().await, 0);
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = ArtifactTracker::new();
        tracker
            .write_file(temp_dir.path().join("a.wav"), b"data")
            .await
            .unwrap();

        assert_eq!(tracker.cleanup().await, 1);
        assert_eq!(tracker.cleanup().await, 0);
    }

    #[test]
    fn test_drop_removes_remaining_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("left-behind.wav");
        std::fs::write(&path, b"data").unwrap();

        {
            let mut tracker = ArtifactTracker::new();
            tracker.register(path.clone());
        }

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.wav");
        std::fs::write(&path, b"data").unwrap();

        let mut tracker = ArtifactTracker::new();
        tracker.register(path.clone());
        tracker.register(path.clone());
        assert_eq!(tracker.cleanup().await, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_sanitized_extension() {
        assert_eq!(sanitized_extension("song.MP3"), Some("mp3".to_string()));
        assert_eq!(sanitized_extension("../../etc/passwd"), None);
        assert_eq!(sanitized_extension("a/b/take.flac"), Some("flac".to_string()));
        assert_eq!(sanitized_extension("evil.w/av"), None);
        assert_eq!(sanitized_extension(".hidden"), None);
        assert_eq!(sanitized_extension("noext"), None);
    }
}
