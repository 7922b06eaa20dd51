//! Frame index <-> media time conversions.
//!
//! Recording durations are computed from the displayed frame, never from the
//! wall clock, so the same key log always yields the same labels.

use media_io::sanitize_fps;

pub fn frame_to_ms(frame: u64, fps: f64) -> u64 {
    let fps = sanitize_fps(fps);
    ((frame as f64 * 1000.0) / fps).floor() as u64
}

pub fn ms_to_frame(ms: u64, fps: f64) -> u64 {
    let fps = sanitize_fps(fps);
    ((ms as f64 * fps) / 1000.0).floor() as u64
}

/// Media time of the frame currently shown.
pub fn now_ms(current_frame: u64, fps: f64) -> u64 { frame_to_ms(current_frame, fps) }

/// Whole frames covered by `seconds` (negative for backward steps).
pub fn frames_for_seconds(seconds: f64, fps: f64) -> i64 {
    if !seconds.is_finite() { return 0; }
    (seconds * sanitize_fps(fps)).trunc() as i64
}

/// `m:ss:cc` (minutes, seconds, hundredths).
pub fn format_clock(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}:{:02}", secs / 60, secs % 60, (ms % 1000) / 10)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    pub fps: f64,
    pub total_frames: u64,
}

impl Default for PlaybackClock {
    fn default() -> Self { Self { fps: media_io::DEFAULT_FPS, total_frames: 0 } }
}

impl PlaybackClock {
    pub fn new(fps: f64, total_frames: u64) -> Self { Self { fps: sanitize_fps(fps), total_frames } }

    pub fn last_frame(&self) -> u64 { self.total_frames.saturating_sub(1) }

    /// Clamps into `[0, total_frames - 1]` (0 for an empty video).
    pub fn clamp(&self, frame: i64) -> u64 {
        if frame <= 0 { 0 } else { (frame as u64).min(self.last_frame()) }
    }

    pub fn now_ms(&self, current_frame: u64) -> u64 { now_ms(current_frame, self.fps) }

    pub fn frame_to_ms(&self, frame: u64) -> u64 { frame_to_ms(frame, self.fps) }

    pub fn ms_to_frame(&self, ms: u64) -> u64 { ms_to_frame(ms, self.fps) }
}
