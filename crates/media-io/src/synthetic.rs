use std::sync::Arc;

use crate::{sanitize_fps, DecodedFrame, FrameSource, MediaError, Result, VideoInfo};

pub const SYNTHETIC_SCHEME: &str = "synthetic://";

const WIDTH: u32 = 4;
const HEIGHT: u32 = 4;

/// Generated frames for headless runs and tests. Every byte of frame `n`
/// holds `n % 256`.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    info: VideoInfo,
    position: u64,
}

impl SyntheticSource {
    pub fn new(total_frames: u64, fps: f64) -> Self {
        let info = VideoInfo {
            path: format!("{SYNTHETIC_SCHEME}{total_frames}@{fps}"),
            fps: sanitize_fps(fps),
            total_frames,
            width: WIDTH,
            height: HEIGHT,
        };
        Self { info, position: 0 }
    }

    /// Parses `<frames>@<fps>`; `<frames>` alone uses the default rate.
    pub fn parse(spec: &str) -> Result<Self> {
        let (frames, fps) = match spec.split_once('@') {
            Some((f, r)) => (f, Some(r)),
            None => (spec, None),
        };
        let frames = frames.trim().parse::<u64>().map_err(|_| MediaError::InvalidSynthetic(spec.to_string()))?;
        let fps = match fps {
            Some(r) => r.trim().parse::<f64>().map_err(|_| MediaError::InvalidSynthetic(spec.to_string()))?,
            None => 0.0,
        };
        Ok(Self::new(frames, fps))
    }
}

impl FrameSource for SyntheticSource {
    fn info(&self) -> &VideoInfo { &self.info }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        if self.position >= self.info.total_frames { return Ok(None); }
        let index = self.position;
        self.position += 1;
        let data: Arc<[u8]> = vec![(index % 256) as u8; (WIDTH * HEIGHT * 3) as usize].into();
        Ok(Some(DecodedFrame { index, width: WIDTH, height: HEIGHT, data }))
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        self.position = frame;
        Ok(())
    }

    fn position(&self) -> u64 { self.position }
}
