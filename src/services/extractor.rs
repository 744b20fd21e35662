//! Frame extraction through an external decoder and frame archiving.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Frames sampled per second of video.
pub const FRAMES_PER_SECOND: u32 = 1;

const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";
/// Padding widens past four digits on long videos; order frames by index, not name.
const FRAME_PATTERN: &str = "frame_%04d.png";
/// Tool output kept in failure messages.
const OUTPUT_TAIL_BYTES: usize = 4096;

/// Runs the extraction tool (ffmpeg, possibly behind a wrapper such as `nice`).
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    command: Vec<String>,
}

impl FrameExtractor {
    /// `command` is the program followed by any leading arguments.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }

    /// The executable that will be spawned.
    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    /// Decoder arguments for sampling `input` into numbered images in `out_dir`.
    pub fn build_args(&self, input: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            format!("fps={}", FRAMES_PER_SECOND),
            out_dir.join(FRAME_PATTERN).to_string_lossy().to_string(),
        ]
    }

    /// Extract frames from `input` into `out_dir`, returning them in frame order.
    ///
    /// A clean exit that produced no images is still an error.
    pub async fn extract(&self, input: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let (program, leading) = self.command.split_first().ok_or(ExtractError::NoCommand)?;
        let args = self.build_args(input, out_dir);
        tracing::debug!(program = %program, args = %args.join(" "), "Running frame extraction");

        let output = Command::new(program)
            .args(leading)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(ExtractError::ToolFailed {
                program: program.clone(),
                status: output.status.to_string(),
                output: output_tail(combined.trim()).to_string(),
            });
        }

        let frames = list_frames(out_dir).await?;
        if frames.is_empty() {
            return Err(ExtractError::NoFrames);
        }

        tracing::debug!(frame_count = frames.len(), "Frames extracted");
        Ok(frames)
    }
}

/// Images written by the extractor into `dir`, in frame order.
pub async fn list_frames(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut frames = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FRAME_PREFIX))
            && path.extension().and_then(|e| e.to_str()) == Some(FRAME_EXTENSION);
        if is_frame && entry.file_type().await?.is_file() {
            frames.push(path);
        }
    }

    frames.sort_by_cached_key(|path| (frame_index(path), path.clone()));
    Ok(frames)
}

/// Number in `frame_<n>.png`; `None` sorts unnumbered frames first, by name.
fn frame_index(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse()
        .ok()
}

/// Bundle `frames` into a Deflate zip at `archive_path`, one entry per frame
/// named after the file. Returns the number of entries written.
pub async fn create_archive(frames: Vec<PathBuf>, archive_path: PathBuf) -> Result<usize, ExtractError> {
    tokio::task::spawn_blocking(move || write_archive(&frames, &archive_path))
        .await
        .map_err(|e| ExtractError::Join(e.to_string()))?
}

fn write_archive(frames: &[PathBuf], archive_path: &Path) -> Result<usize, ExtractError> {
    let file = File::create(archive_path)?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for frame in frames {
        let name = frame
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame without a file name"))?;
        writer.start_file(name, options)?;
        let mut source = File::open(frame)?;
        io::copy(&mut source, &mut writer)?;
    }

    writer.finish()?;
    Ok(frames.len())
}

fn output_tail(output: &str) -> &str {
    if output.len() <= OUTPUT_TAIL_BYTES {
        return output;
    }
    let mut start = output.len() - OUTPUT_TAIL_BYTES;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no extraction command configured")]
    NoCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}\nOutput: {output}")]
    ToolFailed {
        program: String,
        status: String,
        output: String,
    },

    #[error("no frames extracted")]
    NoFrames,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("archive task failed: {0}")]
    Join(String),
}
