use serde::Serialize;

use crate::clock::PlaybackClock;

/// One recording window. Starting only arms it; the start position is latched
/// from the first frame delivered afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingSession {
    active: bool,
    armed: bool,
    start_frame: Option<u64>,
    start_ms: Option<u64>,
    limit_frame: Option<u64>,
    limit_minutes: f64,
}

/// `start + floor(minutes * 60 * fps)`, clamped to the video. `None` without a limit.
pub fn limit_frame_for(start_frame: u64, limit_minutes: f64, clock: &PlaybackClock) -> Option<u64> {
    if !(limit_minutes.is_finite() && limit_minutes > 0.0) { return None; }
    let span = (limit_minutes * 60.0 * clock.fps).floor() as u64;
    Some(start_frame.saturating_add(span).min(clock.last_frame()))
}

impl RecordingSession {
    pub fn is_active(&self) -> bool { self.active }
    pub fn is_armed(&self) -> bool { self.armed }
    pub fn start_frame(&self) -> Option<u64> { self.start_frame }
    pub fn start_ms(&self) -> Option<u64> { self.start_ms }
    pub fn limit_frame(&self) -> Option<u64> { self.limit_frame }

    pub fn start(&mut self, limit_minutes: f64) {
        *self = Self { active: true, armed: true, limit_minutes, ..Self::default() };
    }

    /// Latches the start on the first frame after arming. Returns `true` when it latched.
    pub fn latch(&mut self, frame: u64, clock: &PlaybackClock) -> bool {
        if !(self.active && self.armed) { return false; }
        self.start_frame = Some(frame);
        self.start_ms = Some(clock.now_ms(frame));
        self.limit_frame = limit_frame_for(frame, self.limit_minutes, clock);
        self.armed = false;
        true
    }

    pub fn limit_reached(&self, frame: u64) -> bool {
        self.active && self.limit_frame.map_or(false, |limit| frame >= limit)
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        self.start_ms.map_or(0, |s| now_ms.saturating_sub(s))
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_arms_without_latching() {
        let mut s = RecordingSession::default();
        s.start(1.0);
        assert!(s.is_active() && s.is_armed());
        assert_eq!(s.start_frame(), None);
        assert_eq!(s.limit_frame(), None);
    }

    #[test]
    fn test_latch_once() {
        let clock = PlaybackClock::new(30.0, 10_000);
        let mut s = RecordingSession::default();
        s.start(1.0);
        assert!(s.latch(0, &clock));
        assert_eq!(s.limit_frame(), Some(1800));
        assert!(!s.latch(50, &clock));
        assert_eq!(s.start_frame(), Some(0));
        assert!(!s.limit_reached(1799));
        assert!(s.limit_reached(1800));
    }

    #[test]
    fn test_limit_clamped_to_video() {
        let clock = PlaybackClock::new(30.0, 1000);
        assert_eq!(limit_frame_for(200, 1.0, &clock), Some(999));
        assert_eq!(limit_frame_for(200, 0.0, &clock), None);
        assert_eq!(limit_frame_for(200, -2.0, &clock), None);
    }

    #[test]
    fn test_elapsed_and_stop() {
        let clock = PlaybackClock::new(10.0, 100);
        let mut s = RecordingSession::default();
        s.start(0.0);
        assert_eq!(s.elapsed_ms(900), 0);
        s.latch(4, &clock);
        assert_eq!(s.elapsed_ms(900), 500);
        assert_eq!(s.limit_frame(), None);
        s.stop();
        assert!(!s.is_active());
        assert!(!s.limit_reached(99));
    }
}
