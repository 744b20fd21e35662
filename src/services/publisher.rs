use std::sync::Arc;

use crate::models::job::ProcessingJob;
use crate::services::queue::{MessageQueue, QueueError};

/// Places processing jobs on the durable queue.
#[derive(Clone)]
pub struct Publisher {
    queue: Arc<dyn MessageQueue>,
}

impl Publisher {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }

    /// Serialize and enqueue a job. The message is persisted by the broker
    /// and stays there until a worker acknowledges it.
    pub async fn publish(&self, job: &ProcessingJob) -> Result<String, QueueError> {
        let payload = serde_json::to_string(job)?;
        let message_id = self.queue.publish(&payload).await?;

        metrics::counter!("video_jobs_published_total").increment(1);
        tracing::info!(
            job_id = %job.id,
            video_id = job.video_id,
            user_id = job.user_id,
            message_id = %message_id,
            "Job published for processing"
        );

        Ok(message_id)
    }
}
