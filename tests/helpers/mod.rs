//! In-memory stand-ins for the broker, artifact store, processor and catalog.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use video_pipeline::models::job::{JobStatus, ProcessingJob};
use video_pipeline::models::result::ProcessingResult;
use video_pipeline::models::video::VideoStatus;
use video_pipeline::services::catalog::{CatalogError, StatusReporter};
use video_pipeline::services::extractor::FrameExtractor;
use video_pipeline::services::processor::JobProcessor;
use video_pipeline::services::queue::{Delivery, MessageQueue, QueueError};
use video_pipeline::services::storage::{resolve_object_key, ArtifactStore, StorageError};

pub const BUCKET: &str = "videos";

/// Ordered record of side effects across all fakes sharing it.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub fn scenario_job() -> ProcessingJob {
    ProcessingJob::new(
        42,
        7,
        "store://7/input/a.mp4",
        "a.mp4",
        Some("Bearer test-token".to_string()),
    )
}

pub fn delivery_for(job: &ProcessingJob, message_id: &str) -> Delivery {
    Delivery {
        message_id: message_id.to_string(),
        payload: serde_json::to_string(job).unwrap(),
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    pub log: EventLog,
    pending: Mutex<VecDeque<Delivery>>,
    next_id: Mutex<u64>,
    pub acked: Mutex<Vec<String>>,
    pub nacked: Mutex<Vec<(String, bool)>>,
    /// Returned by every claim until acknowledged, as if idle past the threshold.
    pub stale: Mutex<Vec<Delivery>>,
    pub touched: Mutex<Vec<String>>,
}

impl MemoryQueue {
    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Default::default()
        }
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn nacked(&self) -> Vec<(String, bool)> {
        self.nacked.lock().unwrap().clone()
    }

    pub fn touched(&self) -> Vec<String> {
        self.touched.lock().unwrap().clone()
    }

    /// Hand `delivery` out from every claim until it is acknowledged.
    pub fn mark_stale(&self, delivery: Delivery) {
        self.stale.lock().unwrap().push(delivery);
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, payload: &str) -> Result<String, QueueError> {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let message_id = format!("{}-0", next_id);
        self.pending.lock().unwrap().push_back(Delivery {
            message_id: message_id.clone(),
            payload: payload.to_string(),
        });
        Ok(message_id)
    }

    async fn receive(&self, _consumer: &str, max: usize, block: Duration) -> Result<Vec<Delivery>, QueueError> {
        let batch: Vec<Delivery> = {
            let mut pending = self.pending.lock().unwrap();
            let n = max.min(pending.len());
            pending.drain(..n).collect()
        };
        if batch.is_empty() {
            tokio::time::sleep(block).await;
        }
        Ok(batch)
    }

    async fn claim_stale(&self, _: &str, _: Duration, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let acked = self.acked();
        Ok(self
            .stale
            .lock()
            .unwrap()
            .iter()
            .filter(|d| !acked.contains(&d.message_id))
            .take(max)
            .cloned()
            .collect())
    }

    async fn touch(&self, _: &str, message_ids: &[String]) -> Result<(), QueueError> {
        self.touched.lock().unwrap().extend_from_slice(message_ids);
        Ok(())
    }

    async fn ack(&self, message_id: &str) -> Result<(), QueueError> {
        self.log.push(format!("ack {}", message_id));
        self.acked.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.log.push(format!("nack {}", delivery.message_id));
        self.nacked
            .lock()
            .unwrap()
            .push((delivery.message_id.clone(), requeue));
        Ok(())
    }
}

/// Processor whose attempts fail until `succeed_on` (1-based); `None` fails forever.
pub struct ScriptedProcessor {
    log: EventLog,
    succeed_on: Option<usize>,
    /// How long each attempt takes.
    pub duration: Duration,
    calls: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedProcessor {
    pub fn new(log: EventLog, succeed_on: Option<usize>) -> Self {
        Self {
            log,
            succeed_on,
            duration: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn taking(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn calls(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobProcessor for ScriptedProcessor {
    async fn process(&self, job: &ProcessingJob) -> ProcessingResult {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(tokio::time::Instant::now());
            calls.len()
        };
        self.log.push(format!("process {} #{}", job.video_id, attempt));
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }

        if self.succeed_on.is_some_and(|k| attempt >= k) {
            ProcessingResult::completed(
                "a.zip".to_string(),
                format!("{}/outputs/a.zip", job.user_id),
                vec!["frame_0001.png".to_string()],
            )
        } else {
            ProcessingResult::failed("frame extraction failed: exit status: 1")
        }
    }
}

/// Status reporter that records requests and optionally fails them.
pub struct RecordingReporter {
    log: EventLog,
    fail: bool,
    reports: Mutex<Vec<(u64, VideoStatus)>>,
}

impl RecordingReporter {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail: false,
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(log: EventLog) -> Self {
        Self {
            fail: true,
            ..Self::new(log)
        }
    }

    pub fn reports(&self) -> Vec<(u64, VideoStatus)> {
        self.reports.lock().unwrap().clone()
    }

    /// Reports other than the initial `pending` one.
    pub fn terminal_reports(&self) -> Vec<(u64, VideoStatus)> {
        self.reports()
            .into_iter()
            .filter(|(_, s)| matches!(s, VideoStatus::Processed | VideoStatus::Failed))
            .collect()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, job: &ProcessingJob, status: JobStatus) -> Result<VideoStatus, CatalogError> {
        let target = VideoStatus::from(status);
        self.log.push(format!("status {} {}", job.video_id, target));
        self.reports.lock().unwrap().push((job.video_id, target));
        if self.fail {
            return Err(CatalogError::Status {
                method: "PUT",
                video_id: job.video_id,
                status: 503,
                body: "catalog unavailable".to_string(),
            });
        }
        Ok(target)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_uploads: bool,
    pub uploads: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_object(key: &str, data: &[u8]) -> Self {
        let store = Self::default();
        store.put(key, data);
        store
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn upload_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<String, StorageError> {
        if self.fail_uploads {
            return Err(StorageError::Status {
                key: key.to_string(),
                status: 500,
            });
        }
        let data = tokio::fs::read(path).await?;
        self.uploads.lock().unwrap().push(key.to_string());
        self.put(key, &data);
        Ok(format!("http://store.test/{}/{}", BUCKET, key))
    }

    async fn download_to(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        let data = self
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn object_key(&self, address: &str) -> Result<String, StorageError> {
        resolve_object_key(address, BUCKET)
    }
}

/// Stand-in decoder writing `count` numbered frames to the output pattern,
/// which is always its last argument.
pub fn fake_tool(count: u32) -> FrameExtractor {
    let script = format!(
        r#"for last; do :; done
i=1
while [ $i -le {count} ]; do
  printf 'png-%d' $i > "$(printf "$last" $i)"
  i=$((i+1))
done"#
    );
    FrameExtractor::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        script,
        "fake-ffmpeg".to_string(),
    ])
}

pub fn failing_tool() -> FrameExtractor {
    FrameExtractor::new(vec![
        "sh".to_string(),
        "-c".to_string(),
        "echo 'Invalid data found when processing input' >&2; exit 1".to_string(),
        "fake-ffmpeg".to_string(),
    ])
}
