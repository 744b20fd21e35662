use std::sync::Arc;

use crate::services::{consumer::Consumer, queue::JobQueue};

/// Shared state for the worker's HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub consumer: Arc<Consumer>,
}

impl AppState {
    pub fn new(queue: Arc<JobQueue>, consumer: Arc<Consumer>) -> Self {
        Self { queue, consumer }
    }
}
