use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::job::JobStatus;

/// Outcome of one processor attempt. Never persisted; only `status` and
/// `message` feed the retry decision and the logs.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub status: JobStatus,
    pub message: String,
    pub processed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_key: Option<String>,
    pub frame_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ProcessingResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            message: message.into(),
            processed_at: Utc::now(),
            zip_path: None,
            archive_key: None,
            frame_count: 0,
            images: Vec::new(),
        }
    }

    pub fn completed(zip_path: String, archive_key: String, images: Vec<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            message: format!("processed {} frames", images.len()),
            processed_at: Utc::now(),
            zip_path: Some(zip_path),
            archive_key: Some(archive_key),
            frame_count: images.len(),
            images,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}
