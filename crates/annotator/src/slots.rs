//! Key slots and the per-slot interval history.
//!
//! Each slot binds one key to one behavior. While recording, a press opens an
//! interval and a release closes it. Scrubbing backward and pressing again
//! inside a closed interval reopens and extends it instead of stacking a second
//! one, so `accumulated_ms` never counts the same media time twice.

use labels::BehaviorId;
use serde::Serialize;

use crate::error::BindingError;
use crate::keys::{find_binding, KeyBinding};

pub const SLOT_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interval {
    pub start_ms: u64,
    pub start_frame: u64,
    /// `None` while the key is held.
    pub end_ms: Option<u64>,
    pub end_frame: Option<u64>,
    /// Cumulative duration of everything before this interval.
    pub base_ms: u64,
    /// Cumulative duration once this interval closed.
    pub cumulative_ms: u64,
}

impl Interval {
    fn open(start_ms: u64, start_frame: u64, base_ms: u64) -> Self {
        Self { start_ms, start_frame, end_ms: None, end_frame: None, base_ms, cumulative_ms: base_ms }
    }

    pub fn is_open(&self) -> bool { self.end_ms.is_none() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Baseline {
    base_ms: u64,
    start_ms: u64,
    start_frame: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Slot {
    key: Option<KeyBinding>,
    behavior: Option<BehaviorId>,
    pressed: bool,
    accumulated_ms: u64,
    history: Vec<Interval>,
    baseline: Option<Baseline>,
}

impl Slot {
    pub fn key(&self) -> Option<KeyBinding> { self.key }
    pub fn behavior(&self) -> Option<BehaviorId> { self.behavior }
    pub fn is_pressed(&self) -> bool { self.pressed }
    pub fn accumulated_ms(&self) -> u64 { self.accumulated_ms }
    pub fn history(&self) -> &[Interval] { &self.history }

    /// Duration including the currently held press, as of `now_ms`.
    pub fn running_ms(&self, now_ms: u64) -> u64 {
        match (self.pressed, self.baseline) {
            (true, Some(b)) => b.base_ms + now_ms.saturating_sub(b.start_ms),
            _ => self.accumulated_ms,
        }
    }

    fn reset_session(&mut self) {
        self.pressed = false;
        self.accumulated_ms = 0;
        self.history.clear();
        self.baseline = None;
    }
}

/// Frames to set in the label matrix after a release, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paint {
    pub slot: usize,
    pub behavior: BehaviorId,
    pub from_frame: u64,
    pub to_frame: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SlotMachine {
    slots: [Slot; SLOT_COUNT],
}

impl SlotMachine {
    pub fn new() -> Self { Self::default() }

    pub fn slots(&self) -> &[Slot] { &self.slots }

    pub fn slot(&self, slot: usize) -> Option<&Slot> { self.slots.get(slot) }

    fn check(slot: usize) -> Result<(), BindingError> {
        if slot < SLOT_COUNT { Ok(()) } else { Err(BindingError::InvalidSlot(slot)) }
    }

    /// Checks a key change without applying it.
    pub fn validate_key(&self, slot: usize, key: Option<KeyBinding>) -> Result<(), BindingError> {
        Self::check(slot)?;
        let Some(key) = key else { return Ok(()); };
        match self.slots.iter().enumerate().find(|(i, s)| *i != slot && s.key.map_or(false, |k| k.conflicts_with(&key))) {
            Some((owner, _)) => Err(BindingError::DuplicateKeyBinding { slot, owner }),
            None => Ok(()),
        }
    }

    pub fn validate_behavior(&self, slot: usize, behavior: Option<BehaviorId>) -> Result<(), BindingError> {
        Self::check(slot)?;
        let Some(b) = behavior else { return Ok(()); };
        match self.slots.iter().enumerate().find(|(i, s)| *i != slot && s.behavior == Some(b)) {
            Some((owner, _)) => Err(BindingError::DuplicateBehaviorAssignment { slot, owner }),
            None => Ok(()),
        }
    }

    pub fn bind_key(&mut self, slot: usize, key: Option<KeyBinding>) -> Result<(), BindingError> {
        self.validate_key(slot, key)?;
        self.slots[slot].key = key;
        Ok(())
    }

    /// Changing the behavior of a held slot drops the held press; finish it first.
    pub fn assign_behavior(&mut self, slot: usize, behavior: Option<BehaviorId>) -> Result<(), BindingError> {
        self.validate_behavior(slot, behavior)?;
        let s = &mut self.slots[slot];
        if s.behavior != behavior {
            s.pressed = false;
            s.baseline = None;
            s.history.retain(|i| !i.is_open());
        }
        s.behavior = behavior;
        Ok(())
    }

    pub fn slot_for_key(&self, key: KeyBinding) -> Option<usize> {
        let bindings: Vec<Option<KeyBinding>> = self.slots.iter().map(|s| s.key).collect();
        find_binding(&bindings, key)
    }

    /// `(slot, behavior)` for every slot with a behavior.
    pub fn assigned(&self) -> impl Iterator<Item = (usize, BehaviorId)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| s.behavior.map(|b| (i, b)))
    }

    /// Opens (or reopens) an interval at `t_ms`. Returns `false` when the slot has
    /// no behavior and the press is not tracked.
    pub fn press_start(&mut self, slot: usize, t_ms: u64, t_frame: u64) -> bool {
        let Some(s) = self.slots.get_mut(slot) else { return false; };
        if s.behavior.is_none() { return false; }

        let baseline = loop {
            let Some(last) = s.history.last_mut() else {
                s.history.push(Interval::open(t_ms, t_frame, 0));
                break Baseline { base_ms: 0, start_ms: t_ms, start_frame: t_frame };
            };
            let Some(last_end) = last.end_ms else {
                // Duplicate press signal, the interval is already open.
                match s.baseline {
                    Some(b) => break b,
                    None => break Baseline { base_ms: last.base_ms, start_ms: last.start_ms, start_frame: last.start_frame },
                }
            };
            if t_ms < last_end {
                if t_ms > last.start_ms {
                    // Re-pressed inside the interval just closed: extend it from its original start.
                    last.end_ms = None;
                    last.end_frame = None;
                    last.cumulative_ms = last.base_ms;
                    break Baseline { base_ms: last.base_ms, start_ms: last.start_ms, start_frame: last.start_frame };
                }
                // Starts at or before that interval: it is superseded entirely.
                s.history.pop();
                continue;
            }
            let base_ms = last.cumulative_ms;
            s.history.push(Interval::open(t_ms, t_frame, base_ms));
            break Baseline { base_ms, start_ms: t_ms, start_frame: t_frame };
        };

        s.baseline = Some(baseline);
        s.pressed = true;
        true
    }

    /// Closes the open interval at `t_ms` and returns the frames to label.
    pub fn press_end(&mut self, slot: usize, t_ms: u64, t_frame: u64) -> Option<Paint> {
        let s = self.slots.get_mut(slot)?;
        if !s.pressed { return None; }
        s.pressed = false;
        let baseline = s.baseline.take()?;
        let behavior = s.behavior?;

        let cumulative_ms = baseline.base_ms + t_ms.saturating_sub(baseline.start_ms);
        if let Some(last) = s.history.last_mut().filter(|l| l.is_open()) {
            if t_ms <= last.start_ms {
                // Zero-width (or released behind its own start after scrubbing back).
                s.history.pop();
            } else {
                last.end_ms = Some(t_ms);
                last.end_frame = Some(t_frame);
                last.cumulative_ms = cumulative_ms;
            }
        }
        s.accumulated_ms = cumulative_ms;

        Some(Paint {
            slot,
            behavior,
            from_frame: baseline.start_frame.min(t_frame),
            to_frame: baseline.start_frame.max(t_frame),
        })
    }

    /// Releases every pressed slot at `t_ms`.
    pub fn release_all(&mut self, t_ms: u64, t_frame: u64) -> Vec<Paint> {
        (0..SLOT_COUNT).filter_map(|i| self.press_end(i, t_ms, t_frame)).collect()
    }

    /// Clears per-session state (pressed, totals, history), keeping bindings.
    pub fn reset_sessions(&mut self) {
        self.slots.iter_mut().for_each(Slot::reset_session);
    }

    /// Unassigns every behavior and clears per-session state.
    pub fn clear_behaviors(&mut self) {
        for s in self.slots.iter_mut() {
            s.behavior = None;
            s.reset_session();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FPS10_MS: u64 = 100;

    fn machine() -> SlotMachine {
        let mut m = SlotMachine::new();
        m.bind_key(0, Some(KeyBinding::new(70, 33))).unwrap();
        m.assign_behavior(0, Some(0)).unwrap();
        m
    }

    fn at(frame: u64) -> (u64, u64) { (frame * FPS10_MS, frame) }

    fn press(m: &mut SlotMachine, frame: u64) -> bool {
        let (t, f) = at(frame);
        m.press_start(0, t, f)
    }

    fn release(m: &mut SlotMachine, frame: u64) -> Option<Paint> {
        let (t, f) = at(frame);
        m.press_end(0, t, f)
    }

    #[test]
    fn test_press_release_paints_and_accumulates() {
        let mut m = machine();
        assert!(press(&mut m, 5));
        assert!(m.slot(0).unwrap().is_pressed());
        let paint = release(&mut m, 10).unwrap();
        assert_eq!((paint.from_frame, paint.to_frame, paint.behavior), (5, 10, 0));
        let s = m.slot(0).unwrap();
        assert_eq!(s.accumulated_ms(), 500);
        assert!(!s.is_pressed());
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].end_ms, Some(1000));
    }

    #[test]
    fn test_repress_inside_closed_interval_extends_it() {
        let mut m = machine();
        press(&mut m, 5);
        release(&mut m, 10);
        // Scrubbed back to frame 7 and pressed again.
        press(&mut m, 7);
        let s = m.slot(0).unwrap();
        assert_eq!(s.history().len(), 1);
        assert!(s.history()[0].is_open());
        assert_eq!(s.running_ms(800), 300);

        let paint = release(&mut m, 12).unwrap();
        assert_eq!((paint.from_frame, paint.to_frame), (5, 12));
        let s = m.slot(0).unwrap();
        assert_eq!(s.accumulated_ms(), 700);
        assert_eq!(s.history().len(), 1);
        assert_eq!((s.history()[0].start_ms, s.history()[0].end_ms), (500, Some(1200)));
    }

    #[test]
    fn test_press_after_interval_appends() {
        let mut m = machine();
        press(&mut m, 2);
        release(&mut m, 4);
        press(&mut m, 6);
        release(&mut m, 9);
        let s = m.slot(0).unwrap();
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[1].base_ms, 200);
        assert_eq!(s.accumulated_ms(), 500);
    }

    #[test]
    fn test_press_at_release_frame_appends() {
        let mut m = machine();
        press(&mut m, 2);
        release(&mut m, 4);
        press(&mut m, 4);
        assert_eq!(m.slot(0).unwrap().history().len(), 2);
    }

    #[test]
    fn test_press_before_intervals_supersedes_them() {
        let mut m = machine();
        press(&mut m, 10);
        release(&mut m, 12);
        press(&mut m, 20);
        release(&mut m, 25);
        // Scrubbed back before both intervals.
        press(&mut m, 8);
        let s = m.slot(0).unwrap();
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].start_ms, 800);
        assert_eq!(s.history()[0].base_ms, 0);
        release(&mut m, 30);
        assert_eq!(m.slot(0).unwrap().accumulated_ms(), 2200);
    }

    #[test]
    fn test_press_between_intervals_reopens_earlier_one() {
        let mut m = machine();
        press(&mut m, 10);
        release(&mut m, 20);
        press(&mut m, 30);
        release(&mut m, 40);
        // Back to 15: the second interval is dropped, the first reopened.
        press(&mut m, 15);
        let s = m.slot(0).unwrap();
        assert_eq!(s.history().len(), 1);
        assert!(s.history()[0].is_open());
        release(&mut m, 22);
        assert_eq!(m.slot(0).unwrap().accumulated_ms(), 1200);
    }

    #[test]
    fn test_duplicate_press_keeps_baseline() {
        let mut m = machine();
        press(&mut m, 5);
        press(&mut m, 8);
        assert_eq!(m.slot(0).unwrap().history().len(), 1);
        let paint = release(&mut m, 10).unwrap();
        assert_eq!(paint.from_frame, 5);
        assert_eq!(m.slot(0).unwrap().accumulated_ms(), 500);
    }

    #[test]
    fn test_zero_width_tap_is_dropped() {
        let mut m = machine();
        press(&mut m, 5);
        let paint = release(&mut m, 5).unwrap();
        assert_eq!((paint.from_frame, paint.to_frame), (5, 5));
        let s = m.slot(0).unwrap();
        assert!(s.history().is_empty());
        assert_eq!(s.accumulated_ms(), 0);
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut m = machine();
        assert!(release(&mut m, 3).is_none());
    }

    #[test]
    fn test_press_without_behavior_is_ignored() {
        let mut m = SlotMachine::new();
        m.bind_key(1, Some(KeyBinding::new(74, 36))).unwrap();
        assert!(!m.press_start(1, 0, 0));
        assert!(m.press_end(1, 100, 1).is_none());
    }

    #[test]
    fn test_history_stays_ordered_and_disjoint() {
        let mut m = machine();
        for (a, b) in [(5, 10), (7, 12), (20, 22), (3, 4), (30, 31), (31, 33)] {
            press(&mut m, a);
            release(&mut m, b);
            let h = m.slot(0).unwrap().history();
            for w in h.windows(2) {
                assert!(w[0].end_ms.unwrap() <= w[1].start_ms, "{h:?}");
            }
        }
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut m = machine();
        let err = m.bind_key(2, Some(KeyBinding::new(70, 99))).unwrap_err();
        assert_eq!(err, BindingError::DuplicateKeyBinding { slot: 2, owner: 0 });
        assert_eq!(m.slot(2).unwrap().key(), None);
        assert_eq!(m.slot(0).unwrap().key(), Some(KeyBinding::new(70, 33)));
        // Rebinding the owner itself is fine.
        m.bind_key(0, Some(KeyBinding::new(70, 34))).unwrap();
    }

    #[test]
    fn test_duplicate_behavior_rejected() {
        let mut m = machine();
        let err = m.assign_behavior(3, Some(0)).unwrap_err();
        assert_eq!(err, BindingError::DuplicateBehaviorAssignment { slot: 3, owner: 0 });
        assert_eq!(m.slot(3).unwrap().behavior(), None);
        assert_eq!(m.assign_behavior(4, Some(1)), Err(BindingError::InvalidSlot(4)));
    }

    #[test]
    fn test_release_all_and_reset() {
        let mut m = machine();
        m.bind_key(1, Some(KeyBinding::new(74, 36))).unwrap();
        m.assign_behavior(1, Some(1)).unwrap();
        press(&mut m, 1);
        m.press_start(1, 200, 2);
        let paints = m.release_all(500, 5);
        assert_eq!(paints.len(), 2);
        assert_eq!(m.slot(1).unwrap().accumulated_ms(), 300);

        m.reset_sessions();
        assert!(m.slots().iter().all(|s| s.history().is_empty() && s.accumulated_ms() == 0));
        assert_eq!(m.slot(1).unwrap().behavior(), Some(1));
        m.clear_behaviors();
        assert_eq!(m.assigned().count(), 0);
    }
}
