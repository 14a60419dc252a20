//! Filesystem-backed artifact storage for rendered PDFs.
//!
//! One flat directory; artifacts are keyed by job id as `{job_id}.pdf`.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ArtifactStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Flat directory of rendered PDFs, rooted at the configured storage path.
#[derive(Debug, Clone)]
pub struct ArtifactStorage {
    root: PathBuf,
}

impl ArtifactStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Relative path an artifact for this job is stored under.
    pub fn stored_path(job_id: Uuid) -> String {
        format!("{job_id}.pdf")
    }

    /// Persist PDF bytes for a job. The payload lands under a temporary
    /// name and is renamed into place so readers never observe a partial
    /// file.
    pub async fn write(&self, job_id: Uuid, data: &Bytes) -> Result<String, ArtifactStorageError> {
        let stored_path = Self::stored_path(job_id);
        let absolute = self.resolve(&stored_path)?;
        let staging = self.root.join(format!(".{job_id}.pdf.partial"));

        fs::write(&staging, data).await?;
        if let Err(err) = fs::rename(&staging, &absolute).await {
            let _ = fs::remove_file(&staging).await;
            return Err(err.into());
        }

        Ok(stored_path)
    }

    /// Read the stored payload into memory.
    pub async fn read(&self, stored_path: &str) -> Result<Bytes, ArtifactStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(absolute).await?;
        Ok(Bytes::from(data))
    }

    pub async fn exists(&self, stored_path: &str) -> Result<bool, ArtifactStorageError> {
        let absolute = self.resolve(stored_path)?;
        Ok(fs::try_exists(&absolute).await?)
    }

    /// Remove the stored payload. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), ArtifactStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ArtifactStorageError::Io(err)),
        }
    }

    /// Resolve the absolute filesystem path for a stored artifact.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, ArtifactStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ArtifactStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}
