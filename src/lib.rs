//! Video processing pipeline
//!
//! Consumes processing jobs from a Redis Streams queue, extracts frames from
//! the source video with an external decoder, archives them to S3-compatible
//! storage and reports the outcome to the video catalog service.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
