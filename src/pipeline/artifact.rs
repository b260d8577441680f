//! Temporary artifacts: one input and one output file per call.
//!
//! Artifacts live under a configurable base directory and are named
//! `<prefix>_<unix-millis>_<uuid>.<ext>`, so concurrently active calls never
//! collide.
//!
//! An [`Artifact`] is owned by exactly one call. [`Artifact::cleanup`] consumes
//! it, so the pipeline cannot remove the same file twice; if the call is
//! aborted before reaching cleanup (task cancelled during shutdown, panic in
//! the pipeline), the underlying [`TempPath`] removes the file on drop.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempPath;
use tracing::debug;
use uuid::Uuid;

/// Hands out collision-free artifact paths under one base directory.
#[derive(Debug, Clone)]
pub struct TempArtifactManager {
    base_dir: PathBuf,
}

impl TempArtifactManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the base directory if it does not exist yet.
    pub async fn ensure_base_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await
    }

    /// Produce a fresh path. Nothing is created on disk.
    ///
    /// `extension` is given without the leading dot (`"pdf"`, not `".pdf"`).
    pub fn new_path(&self, prefix: &str, extension: &str) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let name = format!("{prefix}_{millis}_{}.{extension}", Uuid::new_v4().simple());
        self.base_dir.join(name)
    }

    /// Allocate an owned artifact for the current call.
    pub fn allocate(&self, prefix: &str, extension: &str) -> Artifact {
        let path = self.new_path(prefix, extension);
        debug!("Allocated artifact {}", path.display());
        Artifact {
            path: TempPath::from_path(path),
        }
    }
}

/// A call-owned temporary file path, removed on drop.
#[derive(Debug)]
pub struct Artifact {
    path: TempPath,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        exists(&self.path)
    }

    pub fn size(&self) -> u64 {
        size(&self.path)
    }

    /// Remove the file. Returns `false` only when it exists and could not be deleted.
    pub fn cleanup(self) -> bool {
        let path_str = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                debug!("remove_file({}) failed: {}", path_str, e);
                false
            }
        }
    }
}

/// `true` if `path` is an existing regular file.
pub fn exists(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// File size in bytes, or 0 when the file is absent.
pub fn size(path: &Path) -> u64 {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .unwrap_or(0)
}

/// Best-effort delete. Never panics; an already-absent file counts as removed.
pub fn cleanup(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            debug!("remove_file({}) failed: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn new_path_lives_under_base_dir_with_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TempArtifactManager::new(dir.path());
        let p = mgr.new_path("input_pdf", "pdf");

        assert_eq!(p.parent().unwrap(), dir.path());
        let name = p.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("input_pdf_"), "got: {name}");
        assert!(name.ends_with(".pdf"), "got: {name}");
        let suffix = name
            .trim_end_matches(".pdf")
            .rsplit('_')
            .next()
            .unwrap();
        assert!(Uuid::try_parse(suffix).is_ok(), "got: {name}");
        assert!(!p.exists(), "new_path must not create anything");
    }

    #[test]
    fn new_path_does_not_collide() {
        let mgr = TempArtifactManager::new("/tmp");
        let paths: HashSet<PathBuf> = (0..2000).map(|_| mgr.new_path("p", "bin")).collect();
        assert_eq!(paths.len(), 2000);
    }

    #[test]
    fn new_path_does_not_collide_across_threads() {
        let mgr = TempArtifactManager::new("/tmp");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                std::thread::spawn(move || {
                    (0..250).map(|_| mgr.new_path("t", "tmp")).collect::<Vec<_>>()
                })
            })
            .collect();
        let all: HashSet<PathBuf> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 2000);
    }

    #[test]
    fn exists_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a.bin");
        assert!(!exists(&p));
        assert_eq!(size(&p), 0);

        std::fs::write(&p, b"hello").unwrap();
        assert!(exists(&p));
        assert_eq!(size(&p), 5);

        // Directories are not artifacts.
        assert!(!exists(dir.path()));
        assert_eq!(size(dir.path()), 0);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("gone.txt");
        std::fs::write(&p, b"x").unwrap();

        assert!(cleanup(&p));
        assert!(!p.exists());
        assert!(cleanup(&p), "already-absent file counts as cleaned");
    }

    #[test]
    fn cleanup_reports_failure_instead_of_panicking() {
        let dir = tempfile::tempdir().unwrap();
        // remove_file on a directory fails with something other than NotFound.
        let sub = dir.path().join("subdir");
        std::fs::create_dir(&sub).unwrap();
        assert!(!cleanup(&sub));
    }

    #[test]
    fn explicit_cleanup_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TempArtifactManager::new(dir.path());
        let a = mgr.allocate("output_txt", "txt");
        std::fs::write(a.path(), b"text").unwrap();
        let path = a.path().to_path_buf();

        assert!(a.exists());
        assert_eq!(a.size(), 4);
        assert!(a.cleanup());
        assert!(!path.exists());
    }

    #[test]
    fn dropped_artifact_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TempArtifactManager::new(dir.path());
        let path = {
            let a = mgr.allocate("input_img", "tmp");
            std::fs::write(a.path(), b"abandoned").unwrap();
            a.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn cleanup_of_never_written_artifact_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TempArtifactManager::new(dir.path());
        let a = mgr.allocate("output_pdf", "pdf");
        assert!(!a.exists());
        assert!(a.cleanup());
    }

    #[test]
    fn failed_cleanup_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = TempArtifactManager::new(dir.path());
        let a = mgr.allocate("output_img", "png");
        // A directory in the artifact's place cannot be removed with remove_file.
        std::fs::create_dir(a.path()).unwrap();
        let path = a.path().to_path_buf();
        assert!(!a.cleanup());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn ensure_base_dir_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("a/b/c");
        let mgr = TempArtifactManager::new(&base);
        mgr.ensure_base_dir().await.unwrap();
        assert!(base.is_dir());
    }
}
