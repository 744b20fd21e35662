pub mod catalog;
pub mod consumer;
pub mod extractor;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod storage;
