//! Ephemeral files that hold one submission for one run.
//!
//! An `ExecutionArtifact` owns its file: the file is created exactly once by
//! `create` and removed exactly once when the artifact is dropped. Because
//! removal lives in `Drop`, it runs on every exit path of the request:
//! normal completion, timeout, early `?` returns and unwinding panics.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SandboxError;

const ARTIFACT_PREFIX: &str = "python_";
const ARTIFACT_EXTENSION: &str = "py";

#[derive(Debug)]
pub struct ExecutionArtifact {
    id: Uuid,
    path: PathBuf,
}

impl ExecutionArtifact {
    /// Write `code` to a new, uniquely named file under `scratch_dir`.
    ///
    /// The file is opened with create-new semantics, so an existing file is
    /// never overwritten or adopted.
    pub async fn create(scratch_dir: &Path, code: &str) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(scratch_dir)
            .await
            .map_err(|source| SandboxError::Scratch {
                path: scratch_dir.display().to_string(),
                source,
            })?;

        let id = Uuid::new_v4();
        let path = scratch_dir.join(format!("{ARTIFACT_PREFIX}{id}.{ARTIFACT_EXTENSION}"));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(SandboxError::Artifact)?;

        // The file exists from here on; a failed write still gets cleaned up.
        let artifact = Self { id, path };

        file.write_all(code.as_bytes())
            .await
            .map_err(SandboxError::Artifact)?;
        file.flush().await.map_err(SandboxError::Artifact)?;
        drop(file);

        debug!("Created artifact {}", artifact.path.display());
        Ok(artifact)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExecutionArtifact {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed artifact {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Artifact {} already gone", self.path.display());
            }
            // The request outcome is already decided; this is an operator concern.
            Err(e) => warn!(
                "Failed to delete artifact {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_writes_code() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = ExecutionArtifact::create(tmp.path(), "print('hi')\n")
            .await
            .unwrap();

        let content = fs::read_to_string(artifact.path()).unwrap();
        assert_eq!(content, "print('hi')\n");
        assert!(artifact.path().starts_with(tmp.path()));
        assert_eq!(artifact.path().extension().unwrap(), "py");
    }

    #[tokio::test]
    async fn drop_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = ExecutionArtifact::create(tmp.path(), "pass").await.unwrap();
        let path = artifact.path().to_path_buf();
        assert!(path.exists());

        drop(artifact);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let tmp = tempfile::tempdir().unwrap();
        let a = ExecutionArtifact::create(tmp.path(), "pass").await.unwrap();
        let b = ExecutionArtifact::create(tmp.path(), "pass").await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn scratch_dir_is_created_on_demand() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let artifact = ExecutionArtifact::create(&nested, "pass").await.unwrap();
        assert!(artifact.path().starts_with(&nested));
    }

    #[tokio::test]
    async fn unusable_scratch_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let err = ExecutionArtifact::create(&file, "pass").await.unwrap_err();
        assert!(matches!(err, SandboxError::Scratch { .. }));
    }

    #[tokio::test]
    async fn drop_tolerates_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = ExecutionArtifact::create(tmp.path(), "pass").await.unwrap();
        fs::remove_file(artifact.path()).unwrap();
        drop(artifact);
    }

    #[tokio::test]
    async fn drop_runs_during_unwind() {
        let tmp = tempfile::tempdir().unwrap();
        let artifact = ExecutionArtifact::create(tmp.path(), "pass").await.unwrap();
        let path = artifact.path().to_path_buf();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _held = artifact;
            panic!("boom");
        }));

        assert!(result.is_err());
        assert!(!path.exists());
    }
}
