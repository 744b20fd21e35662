mod helpers;

use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use helpers::{failing_tool, fake_tool, scenario_job, MemoryStore};
use video_pipeline::models::job::JobStatus;
use video_pipeline::services::processor::{JobProcessor, Processor};

fn zip_entries(bytes: Vec<u8>) -> Vec<(String, String)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len())
        .map(|i| {
            let mut entry = archive.by_index(i).unwrap();
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            (entry.name().to_string(), body)
        })
        .collect()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

#[tokio::test]
async fn scenario_produces_archive_with_every_frame() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Processor::new(store.clone(), fake_tool(5), work.path());

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Completed, "{}", result.message);
    assert_eq!(result.frame_count, 5);
    assert_eq!(result.zip_path.as_deref(), Some("a.zip"));
    assert_eq!(result.archive_key.as_deref(), Some("7/outputs/a.zip"));
    assert_eq!(result.message, "processed 5 frames");
    assert_eq!(result.images[0], "frame_0001.png");

    let entries = zip_entries(store.get("7/outputs/a.zip").unwrap());
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "frame_0001.png",
            "frame_0002.png",
            "frame_0003.png",
            "frame_0004.png",
            "frame_0005.png"
        ]
    );
    assert_eq!(entries[2].1, "png-3");

    assert!(dir_is_empty(&processor.user_temp_dir(7)));
    assert!(dir_is_empty(&processor.outputs_dir()));
}

#[tokio::test]
async fn zero_frames_fails_without_upload() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Processor::new(store.clone(), fake_tool(0), work.path());

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.contains("no frames"), "{}", result.message);
    assert!(result.zip_path.is_none());
    assert!(store.uploads().is_empty());
    assert!(dir_is_empty(&processor.user_temp_dir(7)));
}

#[tokio::test]
async fn tool_failure_carries_its_output() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Processor::new(store.clone(), failing_tool(), work.path());

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.starts_with("frame extraction failed"), "{}", result.message);
    assert!(result.message.contains("Invalid data found when processing input"));
    assert!(store.uploads().is_empty());
    assert!(dir_is_empty(&processor.user_temp_dir(7)));
}

#[tokio::test]
async fn missing_source_is_a_download_failure() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::default());
    let processor = Processor::new(store.clone(), fake_tool(3), work.path());

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.starts_with("download failed"), "{}", result.message);
    assert!(store.uploads().is_empty());
}

#[tokio::test]
async fn rejected_upload_fails_the_attempt() {
    let work = tempfile::tempdir().unwrap();
    let store = MemoryStore {
        fail_uploads: true,
        ..Default::default()
    };
    store.put("7/input/a.mp4", b"fake video");
    let processor = Processor::new(Arc::new(store), fake_tool(2), work.path());

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.starts_with("archive upload failed"), "{}", result.message);
    assert!(dir_is_empty(&processor.outputs_dir()));
}

#[tokio::test]
async fn concurrent_runs_on_one_source_do_not_collide() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Arc::new(Processor::new(store.clone(), fake_tool(4), work.path()));
    let job = scenario_job();

    let results = futures::future::join_all((0..3).map(|_| processor.process(&job))).await;

    for result in &results {
        assert!(result.is_completed(), "{}", result.message);
        assert_eq!(result.frame_count, 4);
    }
    assert_eq!(store.uploads().len(), 3);
    assert_eq!(zip_entries(store.get("7/outputs/a.zip").unwrap()).len(), 4);
    assert!(dir_is_empty(&processor.user_temp_dir(7)));
}

#[tokio::test]
async fn http_source_address_is_resolved() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/holiday clip.mov", b"fake video"));
    let processor = Processor::new(store.clone(), fake_tool(1), work.path());
    let mut job = scenario_job();
    job.video_url = "http://minio:9000/videos/7/input/holiday%20clip.mov".to_string();
    job.file_name = "holiday clip.mov".to_string();

    let result = processor.process(&job).await;

    assert!(result.is_completed(), "{}", result.message);
    assert_eq!(store.uploads(), vec!["7/outputs/holiday clip.zip"]);
}

#[tokio::test]
async fn unusable_work_dir_fails_workspace_setup() {
    let root = tempfile::tempdir().unwrap();
    let not_a_dir = root.path().join("work");
    std::fs::write(&not_a_dir, b"occupied").unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Processor::new(store.clone(), fake_tool(3), &not_a_dir);

    let result = processor.process(&scenario_job()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.starts_with("workspace setup failed"), "{}", result.message);
    assert!(store.uploads().is_empty());
}

#[tokio::test]
async fn unwritable_archive_fails_before_upload() {
    let work = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::with_object("7/input/a.mp4", b"fake video"));
    let processor = Processor::new(store.clone(), fake_tool(3), work.path());
    let mut job = scenario_job();
    // Longer than any file name the filesystem accepts.
    job.file_name = format!("{}.mp4", "a".repeat(300));

    let result = processor.process(&job).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.message.starts_with("archive creation failed"), "{}", result.message);
    assert!(result.zip_path.is_none());
    assert!(store.uploads().is_empty());
    assert!(dir_is_empty(&processor.user_temp_dir(7)));
    assert!(dir_is_empty(&processor.outputs_dir()));
}
