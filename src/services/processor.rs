use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::job::ProcessingJob;
use crate::models::result::ProcessingResult;
use crate::services::extractor::{self, ExtractError, FrameExtractor};
use crate::services::storage::{ArtifactStore, StorageError};

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Executes one full attempt of the pipeline for a job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &ProcessingJob) -> ProcessingResult;
}

/// Download → extract → archive → upload, inside a scoped workspace.
pub struct Processor {
    store: Arc<dyn ArtifactStore>,
    extractor: FrameExtractor,
    work_dir: PathBuf,
}

impl Processor {
    pub fn new(store: Arc<dyn ArtifactStore>, extractor: FrameExtractor, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            extractor,
            work_dir: work_dir.into(),
        }
    }

    /// Per-user scratch area; each attempt gets its own subdirectory.
    pub fn user_temp_dir(&self, user_id: u64) -> PathBuf {
        self.work_dir.join("videos").join(user_id.to_string()).join("temp")
    }

    /// Where finished archives are written before upload.
    pub fn outputs_dir(&self) -> PathBuf {
        self.work_dir.join("outputs")
    }

    async fn run(&self, job: &ProcessingJob) -> Result<ProcessingResult, AttemptError> {
        let attempt_id = attempt_id();

        let user_temp = self.user_temp_dir(job.user_id);
        let outputs = self.outputs_dir();
        tokio::fs::create_dir_all(&user_temp)
            .await
            .map_err(AttemptError::Workspace)?;
        tokio::fs::create_dir_all(&outputs)
            .await
            .map_err(AttemptError::Workspace)?;

        let workspace = ScopedDir::create(user_temp.join(&attempt_id))
            .await
            .map_err(AttemptError::Workspace)?;
        let staging = ScopedDir::create(outputs.join(&attempt_id))
            .await
            .map_err(AttemptError::Workspace)?;

        let result = self
            .run_in(job, &attempt_id, workspace.path(), staging.path())
            .await;

        workspace.remove().await;
        staging.remove().await;
        result
    }

    async fn run_in(
        &self,
        job: &ProcessingJob,
        attempt_id: &str,
        workspace: &Path,
        staging: &Path,
    ) -> Result<ProcessingResult, AttemptError> {
        // Download
        let source_key = self
            .store
            .object_key(&job.video_url)
            .map_err(AttemptError::Download)?;
        let source_path = workspace.join(format!(
            "video_{}.{}",
            attempt_id,
            source_extension(&source_key, &job.file_name)
        ));
        tracing::debug!(source_key = %source_key, path = %source_path.display(), "Downloading source video");
        self.store
            .download_to(&source_key, &source_path)
            .await
            .map_err(AttemptError::Download)?;

        // Extract
        let frames = self
            .extractor
            .extract(&source_path, workspace)
            .await
            .map_err(|e| match e {
                ExtractError::NoFrames => AttemptError::NoFrames,
                other => AttemptError::Extract(other),
            })?;
        let images: Vec<String> = frames
            .iter()
            .filter_map(|f| f.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        tracing::info!(frame_count = frames.len(), "Frames extracted");

        // Archive
        let zip_name = archive_name(&job.file_name);
        let archive_path = staging.join(&zip_name);
        extractor::create_archive(frames, archive_path.clone())
            .await
            .map_err(AttemptError::Archive)?;

        // Upload
        let archive_key = format!("{}/outputs/{}", job.user_id, zip_name);
        let size = tokio::fs::metadata(&archive_path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        let address = self
            .store
            .upload_file(&archive_key, &archive_path, ARCHIVE_CONTENT_TYPE)
            .await
            .map_err(AttemptError::Upload)?;
        tracing::info!(archive_key = %archive_key, address = %address, size, "Archive uploaded");

        Ok(ProcessingResult::completed(zip_name, archive_key, images))
    }
}

#[async_trait]
impl JobProcessor for Processor {
    async fn process(&self, job: &ProcessingJob) -> ProcessingResult {
        tracing::info!(file_name = %job.file_name, "Processing video");
        match self.run(job).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Processing attempt failed");
                ProcessingResult::failed(e.to_string())
            }
        }
    }
}

/// Why an attempt stopped. Only the message survives into the result.
#[derive(Debug, thiserror::Error)]
enum AttemptError {
    #[error("workspace setup failed: {0}")]
    Workspace(std::io::Error),

    #[error("download failed: {0}")]
    Download(StorageError),

    #[error("frame extraction failed: {0}")]
    Extract(ExtractError),

    #[error("no frames extracted")]
    NoFrames,

    #[error("archive creation failed: {0}")]
    Archive(ExtractError),

    #[error("archive upload failed: {0}")]
    Upload(StorageError),
}

/// Attempt directory, removed with everything in it by [`ScopedDir::remove`].
///
/// Dropping it without `remove` still cleans up, off the async worker threads.
struct ScopedDir {
    path: Option<PathBuf>,
}

impl ScopedDir {
    async fn create(path: PathBuf) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path: Some(path) })
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    async fn remove(mut self) {
        if let Some(path) = self.path.take() {
            let outcome = tokio::fs::remove_dir_all(&path).await;
            log_cleanup(&path, outcome);
        }
    }
}

impl Drop for ScopedDir {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let cleanup = move || {
            let outcome = std::fs::remove_dir_all(&path);
            log_cleanup(&path, outcome);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(cleanup);
            }
            Err(_) => cleanup(),
        }
    }
}

fn log_cleanup(path: &Path, outcome: std::io::Result<()>) {
    if let Err(e) = outcome {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to clean up workspace");
        }
    }
}

/// Unique per attempt: second-resolution timestamp plus a random suffix.
fn attempt_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// `<file stem>.zip`, falling back to `video.zip` for unusable names.
pub fn archive_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty() && *s != "..")
        .unwrap_or("video");
    format!("{}.zip", stem)
}

fn source_extension(source_key: &str, file_name: &str) -> String {
    [source_key, file_name]
        .into_iter()
        .find_map(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        })
        .unwrap_or("mp4")
        .to_ascii_lowercase()
}
