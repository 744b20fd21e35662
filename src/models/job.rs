use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a processing job, as carried on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One unit of frame-extraction work for an uploaded video.
///
/// Created once by the uploader after the catalog record exists, then only
/// its serialized copy travels through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ProcessingJob {
    #[garde(length(min = 1, max = 128))]
    pub id: String,

    #[garde(range(min = 1))]
    pub video_id: u64,

    #[garde(range(min = 1))]
    pub user_id: u64,

    /// Address of the source video, resolvable by the artifact store.
    #[garde(length(min = 1))]
    pub video_url: String,

    /// Original upload file name; the archive is named after its stem.
    #[garde(length(min = 1, max = 255))]
    pub file_name: String,

    #[garde(skip)]
    pub status: JobStatus,

    /// Caller's `Authorization` header value, reused for catalog callbacks.
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[garde(skip)]
    pub created_at: DateTime<Utc>,

    #[garde(skip)]
    pub updated_at: DateTime<Utc>,
}

impl ProcessingJob {
    /// Build a fresh `pending` job for a video whose catalog record exists.
    pub fn new(
        video_id: u64,
        user_id: u64,
        video_url: impl Into<String>,
        file_name: impl Into<String>,
        auth_token: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("job_{}", Uuid::new_v4().simple()),
            video_id,
            user_id,
            video_url: video_url.into(),
            file_name: file_name.into(),
            status: JobStatus::Pending,
            auth_token,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse and validate a queue payload.
    pub fn from_payload(payload: &str) -> Result<Self, MalformedJob> {
        let job: ProcessingJob = serde_json::from_str(payload)?;
        job.validate()?;
        Ok(job)
    }

    /// Credential to forward to the catalog, ignoring empty strings.
    pub fn credential(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// A queue payload that can never become a valid job.
#[derive(Debug, thiserror::Error)]
pub enum MalformedJob {
    #[error("payload is not a processing job: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("processing job failed validation: {0}")]
    Invalid(#[from] garde::Report),
}
