use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Health and metrics listener (e.g., "0.0.0.0:8081").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the job stream
    pub redis_url: String,

    /// Well-known durable queue shared by publishers and workers
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    /// Consumer group all workers join
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Base URL of the video catalog service
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Per-request timeout for catalog calls, in seconds
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// S3-compatible endpoint URL (MinIO, R2, ...)
    pub storage_endpoint: String,

    /// Bucket holding both source videos and output archives
    #[serde(default = "default_storage_bucket")]
    pub storage_bucket: String,

    /// Access key ID
    pub storage_access_key: String,

    /// Secret access key
    pub storage_secret_key: String,

    /// Signing region
    #[serde(default = "default_storage_region")]
    pub storage_region: String,

    /// Root for per-user temporary workspaces and finished archives
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Frame extraction command line, whitespace separated
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,

    /// Processor attempts per job before it is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Worker pool size
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Idle time after which an unacknowledged message is redelivered, in seconds
    #[serde(default = "default_claim_idle_secs")]
    pub claim_idle_secs: u64,

    /// How long shutdown waits for in-flight jobs, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8081".to_string()
}

fn default_queue_name() -> String {
    "input_processing_queue".to_string()
}

fn default_consumer_group() -> String {
    "video_processing_workers".to_string()
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_timeout_secs() -> u64 {
    10
}

fn default_storage_bucket() -> String {
    "videos".to_string()
}

fn default_storage_region() -> String {
    "us-east-1".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_ffmpeg_command() -> String {
    "ffmpeg".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_claim_idle_secs() -> u64 {
    600
}

fn default_shutdown_grace_secs() -> u64 {
    60
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// The extraction command split into program and leading arguments.
    pub fn ffmpeg_argv(&self) -> Vec<String> {
        self.ffmpeg_command
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn claim_idle(&self) -> Duration {
        Duration::from_secs(self.claim_idle_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Broker settings alone, for tools that only publish.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    pub redis_url: String,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl QueueSettings {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
