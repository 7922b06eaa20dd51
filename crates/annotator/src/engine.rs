//! The controller that owns every piece of annotation state.
//!
//! All mutation happens on the thread that owns the [`AnnotationEngine`]. The
//! decode worker only reports frames; the engine turns those reports and the
//! caller's key events into labels.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use labels::csv::{self, TableMeta};
use labels::{BehaviorId, BehaviorSet, LabelError, LabelMatrix};
use media_io::VideoInfo;
use tracing::{debug, info, warn};

use crate::clock::{self, PlaybackClock};
use crate::config::AnnotatorConfig;
use crate::error::{BindingError, ExportIoError, ImportFormatError, OpenError, RecordingGuardError};
use crate::keys::{KeyBinding, KeyInput};
use crate::session::RecordingSession;
use crate::slots::{Paint, SlotMachine, SLOT_COUNT};
use crate::snapshot::{EngineSnapshot, RecordingStatus, SlotStatus, SnapshotFeed, SnapshotPublisher};
use crate::worker::{DecodeWorker, WorkerEvent, WorkerState};

/// What a processed worker event changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineNotice {
    FrameShown(u64),
    PlaybackFinished,
    RecordingStarted { start_frame: u64 },
    RecordingStopped { auto: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step { Back, Forward, LongBack, LongForward }

pub struct AnnotationEngine {
    config: AnnotatorConfig,
    worker: DecodeWorker,
    video: Option<VideoInfo>,
    clock: PlaybackClock,
    behaviors: BehaviorSet,
    matrix: LabelMatrix,
    slots: SlotMachine,
    session: RecordingSession,
    bookmarks: BTreeSet<u64>,
    current_frame: u64,
    playing: bool,
    speed: f32,
    limit_minutes: f64,
    unsaved: bool,
    subscribers: Vec<SnapshotPublisher>,
}

impl AnnotationEngine {
    pub fn new(config: AnnotatorConfig) -> Self {
        let mut worker = DecodeWorker::new(config.worker.clone());
        let speed = worker.set_speed(config.speed);
        let mut slots = SlotMachine::new();
        for (slot, key) in config.slot_keys.iter().enumerate().take(SLOT_COUNT) {
            if let Err(e) = slots.bind_key(slot, *key) { warn!(slot, error = %e, "skipping configured key"); }
        }
        Self {
            limit_minutes: config.record_limit_minutes,
            config,
            worker,
            video: None,
            clock: PlaybackClock::default(),
            behaviors: BehaviorSet::default(),
            matrix: LabelMatrix::default(),
            slots,
            session: RecordingSession::default(),
            bookmarks: BTreeSet::new(),
            current_frame: 0,
            playing: false,
            speed,
            unsaved: false,
            subscribers: Vec::new(),
        }
    }

    pub fn config(&self) -> &AnnotatorConfig { &self.config }
    pub fn video(&self) -> Option<&VideoInfo> { self.video.as_ref() }
    pub fn clock(&self) -> &PlaybackClock { &self.clock }
    pub fn behaviors(&self) -> &BehaviorSet { &self.behaviors }
    pub fn matrix(&self) -> &LabelMatrix { &self.matrix }
    pub fn slots(&self) -> &SlotMachine { &self.slots }
    pub fn session(&self) -> &RecordingSession { &self.session }
    pub fn current_frame(&self) -> u64 { self.current_frame }
    pub fn is_playing(&self) -> bool { self.playing }
    pub fn is_unsaved(&self) -> bool { self.unsaved }
    pub fn speed(&self) -> f32 { self.speed }
    pub fn worker_state(&self) -> WorkerState { self.worker.state() }
    pub fn now_ms(&self) -> u64 { self.clock.now_ms(self.current_frame) }

    // ---- transport ----

    /// Loads a video, keeping the behavior list but zeroing every label.
    /// On failure the current video, labels and session are left as they were.
    pub fn open_video(&mut self, path: &str) -> Result<VideoInfo, OpenError> {
        let info = match self.worker.open(path) {
            Ok(info) => info,
            Err(e) => {
                self.publish();
                return Err(e);
            }
        };
        if self.session.is_active() { self.finish_recording(); }
        self.playing = false;
        self.current_frame = 0;
        self.bookmarks.clear();
        self.slots.reset_sessions();
        self.session = RecordingSession::default();
        self.clock = PlaybackClock::new(info.fps, info.total_frames);
        self.matrix.reset(self.behaviors.len(), info.total_frames as usize);
        self.unsaved = false;
        self.video = Some(info.clone());
        self.speed = self.worker.set_speed(self.speed);
        self.worker.seek(0);
        self.publish();
        Ok(info)
    }

    pub fn play(&mut self) {
        if self.video.is_none() { return; }
        self.worker.play();
        self.playing = true;
        self.publish();
    }

    pub fn pause(&mut self) {
        if self.video.is_none() { return; }
        self.worker.pause();
        self.playing = false;
        self.publish();
    }

    pub fn toggle_play(&mut self) {
        if self.playing { self.pause() } else { self.play() }
    }

    /// Clamped by the worker. The shown frame changes once it is decoded.
    pub fn seek(&mut self, frame: i64) {
        if self.video.is_none() { return; }
        self.worker.seek(frame);
    }

    pub fn step_seconds(&mut self, seconds: f64) {
        let delta = clock::frames_for_seconds(seconds, self.clock.fps);
        self.seek((self.current_frame as i64).saturating_add(delta));
    }

    pub fn step(&mut self, step: Step) {
        let seconds = match step {
            Step::Back => -self.config.step_seconds,
            Step::Forward => self.config.step_seconds,
            Step::LongBack => -self.config.long_step_seconds,
            Step::LongForward => self.config.long_step_seconds,
        };
        self.step_seconds(seconds);
    }

    /// Returns the speed applied after clamping.
    pub fn set_speed(&mut self, factor: f32) -> f32 {
        self.speed = self.worker.set_speed(factor);
        self.publish();
        self.speed
    }

    /// Takes effect when the next recording starts. Zero disables the limit.
    pub fn set_record_limit(&mut self, minutes: f64) {
        self.limit_minutes = if minutes.is_finite() { minutes.max(0.0) } else { 0.0 };
    }

    // ---- behaviors and slots ----

    /// Replaces the behavior list. Unassigns every slot and zeroes the labels.
    pub fn define_behaviors<I, S>(&mut self, names: I) -> Result<(), LabelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let behaviors = BehaviorSet::define(names)?;
        if self.session.is_active() {
            self.session.stop();
            info!("recording stopped by behavior redefinition");
        }
        self.slots.clear_behaviors();
        self.matrix.reset(behaviors.len(), self.clock.total_frames as usize);
        info!(count = behaviors.len(), "behaviors defined");
        self.behaviors = behaviors;
        self.unsaved = false;
        self.publish();
        Ok(())
    }

    pub fn bind_slot_key(&mut self, slot: usize, key: KeyBinding) -> Result<(), BindingError> {
        self.slots.validate_key(slot, Some(key))?;
        self.release_slot(slot);
        self.slots.bind_key(slot, Some(key))?;
        self.publish();
        Ok(())
    }

    pub fn clear_slot_key(&mut self, slot: usize) -> Result<(), BindingError> {
        self.slots.validate_key(slot, None)?;
        self.release_slot(slot);
        self.slots.bind_key(slot, None)?;
        self.publish();
        Ok(())
    }

    pub fn assign_slot_behavior(&mut self, slot: usize, behavior: Option<BehaviorId>) -> Result<(), BindingError> {
        if let Some(b) = behavior {
            if self.behaviors.get(b).is_none() { return Err(BindingError::UnknownBehavior(b)); }
        }
        self.slots.validate_behavior(slot, behavior)?;
        self.release_slot(slot);
        self.slots.assign_behavior(slot, behavior)?;
        self.publish();
        Ok(())
    }

    /// Finalizes a held press on `slot` at the current frame.
    fn release_slot(&mut self, slot: usize) {
        if !self.slots.slot(slot).map_or(false, |s| s.is_pressed()) { return; }
        let (t_ms, t_frame) = (self.now_ms(), self.current_frame);
        if let Some(paint) = self.slots.press_end(slot, t_ms, t_frame) { self.apply_paint(paint); }
    }

    // ---- recording ----

    pub fn toggle_recording(&mut self, on: bool) -> Result<(), RecordingGuardError> {
        if !on {
            if self.session.is_active() {
                self.finish_recording();
                self.publish();
            }
            return Ok(());
        }
        if self.session.is_active() { return Ok(()); }
        self.check_recording_guard()?;
        self.slots.reset_sessions();
        self.session.start(self.limit_minutes);
        info!(limit_minutes = self.limit_minutes, "recording armed");
        self.publish();
        Ok(())
    }

    fn check_recording_guard(&self) -> Result<(), RecordingGuardError> {
        if self.video.is_none() { return Err(RecordingGuardError::NoVideoLoaded); }
        let assigned: Vec<(usize, BehaviorId, Option<KeyBinding>)> = self.slots.assigned()
            .map(|(i, b)| (i, b, self.slots.slot(i).and_then(|s| s.key())))
            .collect();
        if assigned.is_empty() { return Err(RecordingGuardError::NoAssignedBehavior); }
        for (idx, &(slot, behavior, key)) in assigned.iter().enumerate() {
            let Some(key) = key else { return Err(RecordingGuardError::MissingKeyBinding { slot }); };
            for &(other, other_behavior, other_key) in &assigned[idx + 1..] {
                if other_key.map_or(false, |k| k.conflicts_with(&key)) {
                    return Err(RecordingGuardError::SharedKey { first: slot, second: other });
                }
                if other_behavior == behavior {
                    return Err(RecordingGuardError::SharedBehavior { first: slot, second: other });
                }
            }
        }
        Ok(())
    }

    /// Releases every held slot at the current frame, then ends the session.
    fn finish_recording(&mut self) {
        let (t_ms, t_frame) = (self.now_ms(), self.current_frame);
        for paint in self.slots.release_all(t_ms, t_frame) { self.apply_paint(paint); }
        self.session.stop();
        info!(frame = t_frame, "recording stopped");
    }

    fn apply_paint(&mut self, paint: Paint) {
        debug!(slot = paint.slot, behavior = paint.behavior, from = paint.from_frame, to = paint.to_frame, "paint");
        self.matrix.paint_range(paint.behavior, paint.from_frame as usize, paint.to_frame as usize);
        self.unsaved = true;
    }

    /// Returns `true` when the press opened (or reopened) an interval.
    pub fn key_pressed(&mut self, input: KeyInput) -> bool {
        if input.auto_repeat || !self.session.is_active() { return false; }
        let Some(slot) = self.slots.slot_for_key(input.key) else { return false; };
        let started = self.slots.press_start(slot, self.now_ms(), self.current_frame);
        if started { self.publish(); }
        started
    }

    /// Returns `true` when the release closed an interval.
    pub fn key_released(&mut self, input: KeyInput) -> bool {
        if input.auto_repeat || !self.session.is_active() { return false; }
        let Some(slot) = self.slots.slot_for_key(input.key) else { return false; };
        let Some(paint) = self.slots.press_end(slot, self.now_ms(), self.current_frame) else { return false; };
        self.apply_paint(paint);
        self.publish();
        true
    }

    // ---- label files ----

    pub fn export_csv(&mut self, path: &Path) -> Result<(), ExportIoError> {
        let meta = TableMeta {
            video_name: self.video.as_ref().map(VideoInfo::display_name).unwrap_or_default(),
            fps: self.clock.fps,
        };
        let wrap = |source| ExportIoError { path: path.to_path_buf(), source };
        let file = File::create(path).map_err(wrap)?;
        let mut out = BufWriter::new(file);
        csv::write(&mut out, &meta, &self.behaviors, &self.matrix).map_err(wrap)?;
        out.flush().map_err(wrap)?;
        self.unsaved = false;
        info!(path = %path.display(), frames = self.matrix.total_frames(), "labels exported");
        self.publish();
        Ok(())
    }

    /// Replaces the behavior list and labels from a table. Slot assignments
    /// survive only when the column names match the current list exactly.
    pub fn import_csv(&mut self, path: &Path) -> Result<(), ImportFormatError> {
        let text = fs::read_to_string(path)?;
        let table = csv::decode(&text, self.clock.total_frames as usize)?;
        if self.session.is_active() { self.finish_recording(); }
        if table.behaviors.names() != self.behaviors.names() { self.slots.clear_behaviors(); }
        if let Some(fps) = table.fps.filter(|f| (f - self.clock.fps).abs() > 1e-6) {
            warn!(file_fps = fps, video_fps = self.clock.fps, "label table fps differs from the video");
        }
        info!(path = %path.display(), behaviors = table.behaviors.len(), skipped = table.skipped_rows, "labels imported");
        self.behaviors = table.behaviors;
        self.matrix = table.matrix;
        self.unsaved = false;
        self.publish();
        Ok(())
    }

    // ---- bookmarks ----

    /// Bookmarks the shown frame. `None` without a video.
    pub fn add_bookmark(&mut self) -> Option<u64> {
        self.video.as_ref()?;
        self.bookmarks.insert(self.current_frame);
        self.publish();
        Some(self.current_frame)
    }

    pub fn jump_to_bookmark(&mut self, frame: u64) -> bool {
        if !self.bookmarks.contains(&frame) { return false; }
        self.seek(frame as i64);
        true
    }

    pub fn delete_bookmark(&mut self, frame: u64) -> bool {
        let removed = self.bookmarks.remove(&frame);
        if removed { self.publish(); }
        removed
    }

    pub fn bookmarks(&self) -> impl Iterator<Item = u64> + '_ { self.bookmarks.iter().copied() }

    // ---- worker events ----

    /// Handles every event already queued by the worker.
    pub fn process_events(&mut self) -> Vec<EngineNotice> {
        let mut notices = Vec::new();
        while let Some(ev) = self.worker.try_recv() { notices.extend(self.handle_worker_event(ev)); }
        notices
    }

    /// Waits up to `timeout` for one event, then drains the rest.
    pub fn wait_events(&mut self, timeout: Duration) -> Vec<EngineNotice> {
        let Some(first) = self.worker.recv_timeout(timeout) else { return Vec::new(); };
        let mut notices = self.handle_worker_event(first);
        notices.extend(self.process_events());
        notices
    }

    pub fn handle_worker_event(&mut self, event: WorkerEvent) -> Vec<EngineNotice> {
        let mut notices = Vec::new();
        match event {
            WorkerEvent::FrameDecoded(ev) => {
                let frame = ev.index.min(self.clock.last_frame());
                self.current_frame = frame;
                notices.push(EngineNotice::FrameShown(frame));

                if self.session.latch(frame, &self.clock) {
                    info!(start_frame = frame, limit_frame = ?self.session.limit_frame(), "recording started");
                    notices.push(EngineNotice::RecordingStarted { start_frame: frame });
                }
                if self.session.is_active() && self.playing { self.overwrite_live(frame as usize); }
                if self.playing && self.session.limit_reached(frame) {
                    self.worker.pause();
                    self.playing = false;
                    self.finish_recording();
                    notices.push(EngineNotice::RecordingStopped { auto: true });
                }
            }
            WorkerEvent::PlaybackFinished { .. } => {
                self.playing = false;
                notices.push(EngineNotice::PlaybackFinished);
            }
        }
        self.publish();
        notices
    }

    /// The live frame mirrors what is held right now, for every assigned behavior.
    fn overwrite_live(&mut self, frame: usize) {
        for slot in self.slots.slots() {
            let Some(b) = slot.behavior() else { continue; };
            if self.matrix.set(b, frame, slot.is_pressed()) { self.unsaved = true; }
        }
    }

    // ---- output ----

    pub fn snapshot(&self) -> EngineSnapshot {
        let now = self.now_ms();
        let slots = self.slots.slots().iter().enumerate().map(|(id, s)| SlotStatus {
            id,
            key: s.key(),
            behavior: s.behavior().and_then(|b| self.behaviors.get(b)).map(|b| b.name.clone()),
            pressed: s.is_pressed(),
            accumulated_ms: s.accumulated_ms(),
            live_ms: s.running_ms(now),
        }).collect();
        EngineSnapshot {
            video: self.video.clone(),
            current_frame: self.current_frame,
            current_ms: now,
            playing: self.playing,
            speed: self.speed,
            worker: self.worker.state(),
            recording: RecordingStatus {
                active: self.session.is_active(),
                armed: self.session.is_armed(),
                start_frame: self.session.start_frame(),
                limit_frame: self.session.limit_frame(),
                elapsed_ms: if self.session.is_active() { self.session.elapsed_ms(now) } else { 0 },
            },
            slots,
            behaviors: self.behaviors.names().into_iter().map(String::from).collect(),
            bookmarks: self.bookmarks.iter().copied().collect(),
            unsaved: self.unsaved,
        }
    }

    /// Receives a snapshot now and after every later change.
    /// The feed starts with the current snapshot and afterwards keeps only the newest.
    pub fn subscribe(&mut self) -> SnapshotFeed {
        let (publisher, feed) = SnapshotPublisher::pair();
        publisher.publish(self.snapshot());
        self.subscribers.push(publisher);
        feed
    }

    fn publish(&mut self) {
        if self.subscribers.is_empty() { return; }
        let snap = self.snapshot();
        self.subscribers.retain(|p| p.publish(snap.clone()));
    }

    /// Finalizes recording and stops the worker. The engine stays usable for reads.
    pub fn shutdown(&mut self) {
        if self.session.is_active() { self.finish_recording(); }
        self.playing = false;
        self.worker.stop();
    }
}
