use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use media_io::{DecodedFrame, FrameSource, VideoInfo};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::PlaybackClock;
use crate::config::WorkerConfig;
use crate::error::OpenError;

pub const MIN_SPEED: f32 = 0.1;

/// Events the worker may run ahead of its consumer. Decoding blocks once full.
pub const EVENT_CAPACITY: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerState { Idle, Opening, Ready, Playing, Paused, Seeking, Finished, Stopped }

#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub index: u64,
    pub timestamp_ms: u64,
    pub frame: DecodedFrame,
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    FrameDecoded(FrameEvent),
    /// End of stream reached during the `play` call numbered `generation`.
    PlaybackFinished { generation: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode { Ready, Playing, Paused, Finished }

/// Latest requested controls. Every command overwrites its field, so nothing queues.
struct Control {
    mode: Mode,
    play_requested: bool,
    pending_seek: Option<u64>,
    servicing_seek: bool,
    speed: f32,
    stop: bool,
    /// Bumped by every `play`; finish events from older plays are dropped.
    generation: u64,
}

struct WorkerRuntime {
    handle: Option<thread::JoinHandle<()>>,
    control: Arc<Mutex<Control>>,
    wake_tx: Sender<()>,
    events: Receiver<WorkerEvent>,
    clock: PlaybackClock,
}

impl WorkerRuntime {
    fn wake(&self) { let _ = self.wake_tx.try_send(()); }

    /// A finish from an earlier `play` that a newer `play` has overtaken.
    fn is_stale(&self, ev: &WorkerEvent) -> bool {
        match ev {
            WorkerEvent::PlaybackFinished { generation } => *generation != self.control.lock().generation,
            WorkerEvent::FrameDecoded(_) => false,
        }
    }

    fn shutdown(&mut self) {
        self.control.lock().stop = true;
        self.wake();
        if let Some(h) = self.handle.take() {
            if h.join().is_err() { warn!("decode worker panicked"); }
        }
    }
}

/// Owns the video source on its own thread and turns play/pause/seek/speed
/// controls into an ordered stream of [`WorkerEvent`]s.
pub struct DecodeWorker {
    config: WorkerConfig,
    runtime: Option<WorkerRuntime>,
    speed: f32,
    opening: bool,
    stopped: bool,
}

impl DecodeWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config, runtime: None, speed: 1.0, opening: false, stopped: false }
    }

    /// Replaces any open source. On failure the previous source keeps running.
    pub fn open(&mut self, path: &str) -> Result<VideoInfo, OpenError> {
        if self.stopped { return Err(OpenError::WorkerStopped); }
        self.opening = true;
        let opened = media_io::open_source(path);
        self.opening = false;
        let source = opened.map_err(|e| {
            warn!(path, error = %e, "open failed");
            OpenError::Media(e)
        })?;
        let info = source.info().clone();
        self.release();
        self.runtime = Some(self.spawn(source));
        info!(path, fps = info.fps, total_frames = info.total_frames, "video opened");
        Ok(info)
    }

    fn spawn(&self, source: Box<dyn FrameSource>) -> WorkerRuntime {
        let info = source.info();
        let clock = PlaybackClock::new(info.fps, info.total_frames);
        let control = Arc::new(Mutex::new(Control {
            mode: Mode::Ready,
            play_requested: false,
            pending_seek: None,
            servicing_seek: false,
            speed: self.speed,
            stop: false,
            generation: 0,
        }));
        let (wake_tx, wake_rx) = bounded::<()>(1);
        let (event_tx, events) = bounded::<WorkerEvent>(EVENT_CAPACITY);
        let idle = Duration::from_millis(self.config.idle_poll_ms.max(1));
        let control_for_worker = control.clone();
        let handle = thread::spawn(move || run(source, clock, control_for_worker, wake_rx, event_tx, idle));
        WorkerRuntime { handle: Some(handle), control, wake_tx, events, clock }
    }

    fn release(&mut self) {
        if let Some(mut rt) = self.runtime.take() { rt.shutdown(); }
    }

    fn with_control(&self, f: impl FnOnce(&mut Control, &PlaybackClock)) {
        if let Some(rt) = &self.runtime {
            f(&mut rt.control.lock(), &rt.clock);
            rt.wake();
        }
    }

    pub fn play(&self) {
        self.with_control(|c, _| {
            c.mode = Mode::Playing;
            c.play_requested = true;
            c.generation += 1;
        });
    }

    pub fn pause(&self) {
        if let Some(rt) = &self.runtime {
            {
                let mut c = rt.control.lock();
                if c.mode == Mode::Paused { return; }
                c.mode = Mode::Paused;
                c.play_requested = false;
            }
            rt.wake();
        }
    }

    /// Clamped to the video. Replaces any seek the worker has not serviced yet.
    pub fn seek(&self, frame: i64) {
        self.with_control(|c, clock| c.pending_seek = Some(clock.clamp(frame)));
    }

    /// Returns the speed actually applied.
    pub fn set_speed(&mut self, factor: f32) -> f32 {
        let speed = if factor.is_finite() { factor.max(MIN_SPEED) } else { MIN_SPEED };
        self.speed = speed;
        self.with_control(|c, _| c.speed = speed);
        speed
    }

    /// Idempotent. The worker exits and drops its source before this returns.
    pub fn stop(&mut self) {
        if self.stopped { return; }
        self.release();
        self.stopped = true;
        debug!("decode worker stopped");
    }

    pub fn state(&self) -> WorkerState {
        if self.stopped { return WorkerState::Stopped; }
        if self.opening { return WorkerState::Opening; }
        let Some(rt) = &self.runtime else { return WorkerState::Idle; };
        let c = rt.control.lock();
        if c.pending_seek.is_some() || c.servicing_seek { return WorkerState::Seeking; }
        match c.mode {
            Mode::Ready => WorkerState::Ready,
            Mode::Playing => WorkerState::Playing,
            Mode::Paused => WorkerState::Paused,
            Mode::Finished => WorkerState::Finished,
        }
    }

    pub fn try_recv(&self) -> Option<WorkerEvent> {
        let rt = self.runtime.as_ref()?;
        loop {
            match rt.events.try_recv() {
                Ok(ev) if rt.is_stale(&ev) => continue,
                Ok(ev) => return Some(ev),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        let Some(rt) = self.runtime.as_ref() else {
            thread::sleep(timeout);
            return None;
        };
        let deadline = Instant::now() + timeout;
        loop {
            match rt.events.recv_deadline(deadline) {
                Ok(ev) if rt.is_stale(&ev) => continue,
                Ok(ev) => return Some(ev),
                Err(_) => return None,
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) { self.stop(); }
}

fn pace(fps: f64, speed: f32) -> Duration {
    Duration::from_secs_f64(1.0 / fps / f64::from(speed.max(MIN_SPEED)))
}

/// Blocks while the channel is full. Returns `false` once stopped or disconnected.
fn send(tx: &Sender<WorkerEvent>, control: &Mutex<Control>, mut ev: WorkerEvent, idle: Duration) -> bool {
    loop {
        match tx.send_timeout(ev, idle) {
            Ok(()) => return true,
            Err(SendTimeoutError::Disconnected(_)) => return false,
            Err(SendTimeoutError::Timeout(back)) => {
                if control.lock().stop { return false; }
                ev = back;
            }
        }
    }
}

fn emit(tx: &Sender<WorkerEvent>, control: &Mutex<Control>, frame: DecodedFrame, clock: &PlaybackClock, idle: Duration) -> bool {
    let ev = FrameEvent { index: frame.index, timestamp_ms: clock.frame_to_ms(frame.index), frame };
    send(tx, control, WorkerEvent::FrameDecoded(ev), idle)
}

fn run(
    mut source: Box<dyn FrameSource>,
    clock: PlaybackClock,
    control: Arc<Mutex<Control>>,
    wake_rx: Receiver<()>,
    tx: Sender<WorkerEvent>,
    idle: Duration,
) {
    let mut finished_emitted = false;
    loop {
        let (mut seek, mode, speed, play_requested) = {
            let mut c = control.lock();
            if c.stop { break; }
            let seek = c.pending_seek.take();
            c.servicing_seek = seek.is_some();
            (seek, c.mode, c.speed, std::mem::take(&mut c.play_requested))
        };

        if play_requested && seek.is_none() {
            let at_end = finished_emitted || (clock.total_frames > 0 && source.position() >= clock.total_frames);
            if at_end { seek = Some(0); }
        }

        if let Some(target) = seek {
            finished_emitted = false;
            let sent = match source.seek(target).and_then(|_| source.read_frame()) {
                Ok(Some(frame)) => emit(&tx, &control, frame, &clock, idle),
                Ok(None) => true,
                Err(e) => { warn!(target, error = %e, "seek failed"); true }
            };
            let mut c = control.lock();
            c.servicing_seek = false;
            if c.mode == Mode::Finished { c.mode = Mode::Paused; }
            drop(c);
            debug!(target, "seek serviced");
            if !sent { break; }
            // No pacing after a seek.
            continue;
        }

        if mode == Mode::Playing {
            match source.read_frame() {
                Ok(Some(frame)) => {
                    if !emit(&tx, &control, frame, &clock, idle) { break; }
                    if let Err(RecvTimeoutError::Disconnected) = wake_rx.recv_timeout(pace(clock.fps, speed)) { break; }
                }
                end => {
                    if let Err(e) = end { warn!(error = %e, "read failed during playback"); }
                    let generation = {
                        let mut c = control.lock();
                        // A pending play rewinds on the next pass instead.
                        if c.play_requested { continue; }
                        if c.mode == Mode::Playing { c.mode = Mode::Finished; }
                        c.generation
                    };
                    if !finished_emitted {
                        finished_emitted = true;
                        info!(position = source.position(), generation, "playback finished");
                        if !send(&tx, &control, WorkerEvent::PlaybackFinished { generation }, idle) { break; }
                    }
                }
            }
            continue;
        }

        if let Err(RecvTimeoutError::Disconnected) = wake_rx.recv_timeout(idle) { break; }
    }
    debug!("decode worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use media_io::SyntheticSource;

    fn worker_with(spec: &str) -> DecodeWorker {
        let mut w = DecodeWorker::new(WorkerConfig { idle_poll_ms: 5 });
        w.open(spec).unwrap();
        w
    }

    fn next_frame(w: &DecodeWorker) -> u64 {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(WorkerEvent::FrameDecoded(ev)) = w.recv_timeout(Duration::from_millis(50)) { return ev.index; }
        }
        panic!("no frame delivered");
    }

    fn wait_finished(w: &DecodeWorker) -> Vec<u64> {
        let mut frames = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match w.recv_timeout(Duration::from_millis(50)) {
                Some(WorkerEvent::FrameDecoded(ev)) => frames.push(ev.index),
                Some(WorkerEvent::PlaybackFinished { .. }) => return frames,
                None => {}
            }
        }
        panic!("playback never finished");
    }

    #[test]
    fn test_open_failure_leaves_idle() {
        let mut w = DecodeWorker::new(WorkerConfig::default());
        assert!(w.open("synthetic://nope").is_err());
        assert_eq!(w.state(), WorkerState::Idle);
        w.play();
        assert_eq!(w.state(), WorkerState::Idle);
    }

    #[test]
    fn test_failed_reopen_keeps_previous_source() {
        let mut w = worker_with("synthetic://40@20");
        assert_eq!(next_frame(&w), 0);
        assert!(w.open("synthetic://nope").is_err());
        assert_eq!(w.state(), WorkerState::Ready);
        w.seek(12);
        assert_eq!(next_frame(&w), 12);
    }

    #[test]
    fn test_open_reports_info_and_ready() {
        let w = worker_with("synthetic://40@20");
        assert_eq!(w.state(), WorkerState::Ready);
        assert!(w.try_recv().is_none());
    }

    #[test]
    fn test_seek_is_clamped() {
        let w = worker_with("synthetic://10@100");
        w.seek(-5);
        assert_eq!(next_frame(&w), 0);
        w.seek(15);
        assert_eq!(next_frame(&w), 9);
    }

    #[test]
    fn test_plays_in_order_then_finishes_once() {
        let mut w = worker_with("synthetic://12@1000");
        w.set_speed(4.0);
        w.play();
        let frames = wait_finished(&w);
        assert_eq!(frames, (0..12).collect::<Vec<_>>());
        assert_eq!(w.state(), WorkerState::Finished);
        thread::sleep(Duration::from_millis(30));
        assert!(w.try_recv().is_none());
    }

    #[test]
    fn test_play_at_end_restarts_from_zero() {
        let w = worker_with("synthetic://5@1000");
        w.play();
        wait_finished(&w);
        w.play();
        let frames = wait_finished(&w);
        assert_eq!(frames.first(), Some(&0));
        assert_eq!(frames.len(), 5);
    }

    #[test]
    fn test_seek_rearms_finish() {
        let w = worker_with("synthetic://6@1000");
        w.play();
        wait_finished(&w);
        w.seek(3);
        assert_eq!(next_frame(&w), 3);
        w.play();
        let frames = wait_finished(&w);
        assert_eq!(frames, vec![4, 5]);
    }

    #[test]
    fn test_replay_drops_finish_from_previous_play() {
        let w = worker_with("synthetic://200@20");
        w.seek(198);
        assert_eq!(next_frame(&w), 198);
        w.play();
        let deadline = Instant::now() + Duration::from_secs(5);
        while w.state() != WorkerState::Finished {
            assert!(Instant::now() < deadline, "never reached the end");
            thread::sleep(Duration::from_millis(5));
        }
        // The first finish is still queued, unread.
        w.play();
        let until = Instant::now() + Duration::from_millis(200);
        let mut frames = Vec::new();
        while Instant::now() < until {
            match w.recv_timeout(Duration::from_millis(20)) {
                Some(WorkerEvent::PlaybackFinished { .. }) => panic!("finish from the earlier play was delivered"),
                Some(WorkerEvent::FrameDecoded(ev)) => frames.push(ev.index),
                None => {}
            }
        }
        assert_eq!(frames.first(), Some(&199));
        assert!(frames.contains(&0), "{frames:?}");
        assert_eq!(w.state(), WorkerState::Playing);
    }

    /// Blocks inside `seek` until the test lets it go.
    struct GatedSource {
        inner: SyntheticSource,
        entered: Sender<u64>,
        gate: Receiver<()>,
    }

    impl FrameSource for GatedSource {
        fn info(&self) -> &VideoInfo { self.inner.info() }
        fn read_frame(&mut self) -> media_io::Result<Option<DecodedFrame>> { self.inner.read_frame() }
        fn seek(&mut self, frame: u64) -> media_io::Result<()> {
            let _ = self.entered.send(frame);
            let _ = self.gate.recv();
            self.inner.seek(frame)
        }
        fn position(&self) -> u64 { self.inner.position() }
    }

    #[test]
    fn test_seeks_queued_behind_a_slow_seek_collapse_to_latest() {
        let mut w = DecodeWorker::new(WorkerConfig { idle_poll_ms: 5 });
        let (entered_tx, entered) = crossbeam_channel::unbounded();
        let (gate, gate_rx) = crossbeam_channel::unbounded();
        let source = GatedSource { inner: SyntheticSource::new(100, 1000.0), entered: entered_tx, gate: gate_rx };
        w.runtime = Some(w.spawn(Box::new(source)));

        w.seek(5);
        assert_eq!(entered.recv_timeout(Duration::from_secs(2)), Ok(5));
        assert_eq!(w.state(), WorkerState::Seeking);
        w.seek(10);
        w.seek(20);
        w.seek(30);
        gate.send(()).unwrap();
        gate.send(()).unwrap();

        assert_eq!(next_frame(&w), 5);
        assert_eq!(next_frame(&w), 30);
        assert_eq!(entered.recv_timeout(Duration::from_secs(1)), Ok(30));
        assert!(entered.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(w.recv_timeout(Duration::from_millis(100)).is_none());
        assert_eq!(w.state(), WorkerState::Ready);
    }

    #[test]
    fn test_unread_events_stay_bounded() {
        let mut w = worker_with("synthetic://100000@100000");
        w.set_speed(10.0);
        w.play();
        thread::sleep(Duration::from_millis(100));
        let queued = w.runtime.as_ref().map(|rt| rt.events.len()).unwrap_or(0);
        assert!(queued > 0 && queued <= EVENT_CAPACITY, "{queued} queued");
        // A worker blocked on a full channel still stops promptly.
        let t = Instant::now();
        w.stop();
        assert!(t.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_pause_is_idempotent() {
        let w = worker_with("synthetic://100@10");
        w.pause();
        assert_eq!(w.state(), WorkerState::Paused);
        w.pause();
        assert_eq!(w.state(), WorkerState::Paused);
    }

    #[test]
    fn test_stop_is_idempotent_and_prompt() {
        let mut w = worker_with("synthetic://100000@1");
        w.play();
        next_frame(&w);
        // Mid-sleep at one second per frame; stop must not wait it out.
        let t = Instant::now();
        w.stop();
        assert!(t.elapsed() < Duration::from_millis(500));
        w.stop();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(matches!(w.open("synthetic://3@1"), Err(OpenError::WorkerStopped)));
    }

    #[test]
    fn test_speed_clamped_positive() {
        let mut w = DecodeWorker::new(WorkerConfig::default());
        assert_eq!(w.set_speed(0.0), MIN_SPEED);
        assert_eq!(w.set_speed(-3.0), MIN_SPEED);
        assert_eq!(w.set_speed(f32::NAN), MIN_SPEED);
        assert_eq!(w.set_speed(2.0), 2.0);
    }

    #[test]
    fn test_pace() {
        assert_eq!(pace(10.0, 1.0), Duration::from_millis(100));
        assert_eq!(pace(10.0, 2.0), Duration::from_millis(50));
    }
}
