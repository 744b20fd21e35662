//! Publish one processing job read from stdin.
//!
//! Used to re-drive a video whose job never reached a worker:
//!
//! ```text
//! echo '{"id":"job_1","video_id":42,...}' | enqueue
//! ```

use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use video_pipeline::config::QueueSettings;
use video_pipeline::models::job::ProcessingJob;
use video_pipeline::services::{publisher::Publisher, queue::JobQueue};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let settings = QueueSettings::from_env().expect("Failed to load queue configuration");

    let mut payload = String::new();
    std::io::stdin()
        .read_to_string(&mut payload)
        .expect("Failed to read job from stdin");

    let job = match ProcessingJob::from_payload(&payload) {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(error = %e, "Refusing to publish invalid job");
            std::process::exit(2);
        }
    };

    let queue = JobQueue::new(&settings.redis_url, &settings.queue_name, &settings.consumer_group)
        .expect("Failed to initialize job queue");
    queue.init().await.expect("Failed to create consumer group");

    let publisher = Publisher::new(Arc::new(queue));
    match publisher.publish(&job).await {
        Ok(message_id) => println!("{}", message_id),
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Failed to publish job");
            std::process::exit(1);
        }
    }
}
