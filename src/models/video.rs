use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::JobStatus;

/// Status vocabulary of the video catalog service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VideoStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl From<JobStatus> for VideoStatus {
    /// The catalog keeps a video `pending` until the pipeline reaches a
    /// terminal outcome.
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending | JobStatus::Processing => VideoStatus::Pending,
            JobStatus::Completed => VideoStatus::Processed,
            JobStatus::Failed => VideoStatus::Failed,
        }
    }
}

/// Catalog record as returned by `GET /api/v1/videos/{id}`.
///
/// `title` and `url` are kept as raw JSON so they are written back verbatim.
/// A record missing either cannot be written back and fails to decode.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogVideo {
    pub title: serde_json::Value,
    pub url: serde_json::Value,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `PUT /api/v1/videos/{id}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VideoUpdate {
    pub title: serde_json::Value,
    pub url: serde_json::Value,
    pub status: VideoStatus,
}

impl VideoUpdate {
    pub fn from_record(record: CatalogVideo, status: VideoStatus) -> Self {
        Self {
            title: record.title,
            url: record.url,
            status,
        }
    }
}
