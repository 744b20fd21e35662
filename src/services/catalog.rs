use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use std::time::Duration;

use crate::models::job::{JobStatus, ProcessingJob};
use crate::models::video::{CatalogVideo, VideoStatus, VideoUpdate};

/// Requests status transitions for a job's catalog record.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Move the job's video to the catalog equivalent of `status`,
    /// returning the value that was written.
    async fn report(&self, job: &ProcessingJob, status: JobStatus) -> Result<VideoStatus, CatalogError>;
}

/// HTTP client for the video catalog service.
///
/// The catalog only offers whole-record reads and writes, so a status change
/// is a GET followed by a PUT of the same record. A write landing between the
/// two is overwritten.
pub struct CatalogClient {
    http: Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CatalogError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(CatalogError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn video_url(&self, video_id: u64) -> String {
        format!("{}/api/v1/videos/{}", self.base_url, video_id)
    }

    /// GET /api/v1/videos/{id}
    pub async fn get_video(&self, video_id: u64, credential: Option<&str>) -> Result<CatalogVideo, CatalogError> {
        let mut request = self.http.get(self.video_url(video_id));
        if let Some(token) = credential {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await.map_err(CatalogError::Http)?;
        let status = response.status();
        let body = response.text().await.map_err(CatalogError::Http)?;
        if !status.is_success() {
            return Err(CatalogError::Status {
                method: "GET",
                video_id,
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(CatalogError::Decode)
    }

    /// PUT /api/v1/videos/{id}
    pub async fn update_video(
        &self,
        video_id: u64,
        update: &VideoUpdate,
        credential: Option<&str>,
    ) -> Result<(), CatalogError> {
        let mut request = self.http.put(self.video_url(video_id)).json(update);
        if let Some(token) = credential {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await.map_err(CatalogError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                method: "PUT",
                video_id,
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StatusReporter for CatalogClient {
    async fn report(&self, job: &ProcessingJob, status: JobStatus) -> Result<VideoStatus, CatalogError> {
        let credential = job.credential();
        let record = self.get_video(job.video_id, credential).await?;
        let target = VideoStatus::from(status);

        tracing::debug!(
            video_id = job.video_id,
            current = ?record.status,
            target = %target,
            "Updating catalog status"
        );

        let update = VideoUpdate::from_record(record, target);
        self.update_video(job.video_id, &update, credential).await?;

        tracing::info!(video_id = job.video_id, status = %target, "Catalog status updated");
        Ok(target)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} video {video_id} returned status {status}: {body}")]
    Status {
        method: &'static str,
        video_id: u64,
        status: u16,
        body: String,
    },

    #[error("Failed to decode catalog record: {0}")]
    Decode(#[from] serde_json::Error),
}
