//! Video sources for the annotation pipeline
//!
//! A [`FrameSource`] is a cursor over decoded frames: `read_frame` decodes the
//! frame at the current position and advances, `seek` repositions. Sources are
//! opened with [`open_source`], which picks a backend from the path.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

mod ffmpeg;
mod synthetic;

pub use ffmpeg::FfmpegSource;
pub use synthetic::{SyntheticSource, SYNTHETIC_SCHEME};

/// Used when the container reports no usable frame rate.
pub const DEFAULT_FPS: f64 = 30.0;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("{0} not found on PATH")]
    ToolMissing(&'static str),
    #[error("failed to spawn {tool}: {source}")]
    Spawn { tool: &'static str, source: std::io::Error },
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid probe output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid synthetic source spec: {0}")]
    InvalidSynthetic(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

/// Immutable description of an opened video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub path: String,
    pub fps: f64,
    pub total_frames: u64,
    pub width: u32,
    pub height: u32,
}

impl VideoInfo {
    /// File name used in exports.
    pub fn display_name(&self) -> String {
        Path::new(&self.path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.clone())
    }

    pub fn last_frame(&self) -> u64 { self.total_frames.saturating_sub(1) }
}

/// Decoded picture. The payload is opaque to the pipeline (packed RGB24 for ffmpeg).
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub index: u64,
    pub width: u32,
    pub height: u32,
    pub data: Arc<[u8]>,
}

pub trait FrameSource: Send {
    fn info(&self) -> &VideoInfo;

    /// Decode the frame at the current position and advance. `Ok(None)` at end of stream.
    fn read_frame(&mut self) -> Result<Option<DecodedFrame>>;

    /// Position the cursor so the next `read_frame` returns `frame`.
    fn seek(&mut self, frame: u64) -> Result<()>;

    /// Index the next `read_frame` will return.
    fn position(&self) -> u64;
}

/// Fallback to [`DEFAULT_FPS`] for zero, negative or non-finite rates.
pub fn sanitize_fps(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 { fps } else { DEFAULT_FPS }
}

/// Open a source for `path`. `synthetic://<frames>@<fps>` yields a generated
/// source, anything else goes through ffmpeg.
pub fn open_source(path: &str) -> Result<Box<dyn FrameSource>> {
    if let Some(spec) = path.strip_prefix(SYNTHETIC_SCHEME) {
        return Ok(Box::new(SyntheticSource::parse(spec)?));
    }
    Ok(Box::new(FfmpegSource::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_fps() {
        assert_eq!(sanitize_fps(25.0), 25.0);
        assert_eq!(sanitize_fps(0.0), DEFAULT_FPS);
        assert_eq!(sanitize_fps(-3.0), DEFAULT_FPS);
        assert_eq!(sanitize_fps(f64::NAN), DEFAULT_FPS);
    }

    #[test]
    fn test_open_missing_file() {
        let err = open_source("/definitely/not/here.mp4").err().unwrap();
        assert!(matches!(err, MediaError::NotFound(_)));
    }

    #[test]
    fn test_open_synthetic() {
        let src = open_source("synthetic://12@6").unwrap();
        assert_eq!(src.info().total_frames, 12);
        assert_eq!(src.info().fps, 6.0);
    }

    #[test]
    fn test_display_name() {
        let info = VideoInfo { path: "/data/run1/mouse.mp4".into(), fps: 30.0, total_frames: 3, width: 1, height: 1 };
        assert_eq!(info.display_name(), "mouse.mp4");
        assert_eq!(info.last_frame(), 2);
    }
}
