use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use media_io::VideoInfo;
use parking_lot::Mutex;
use serde::Serialize;

use crate::keys::KeyBinding;
use crate::worker::WorkerState;

/// Immutable view of the engine handed to presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub video: Option<VideoInfo>,
    pub current_frame: u64,
    pub current_ms: u64,
    pub playing: bool,
    pub speed: f32,
    pub worker: WorkerState,
    pub recording: RecordingStatus,
    pub slots: Vec<SlotStatus>,
    pub behaviors: Vec<String>,
    pub bookmarks: Vec<u64>,
    pub unsaved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingStatus {
    pub active: bool,
    pub armed: bool,
    pub start_frame: Option<u64>,
    pub limit_frame: Option<u64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotStatus {
    pub id: usize,
    pub key: Option<KeyBinding>,
    pub behavior: Option<String>,
    pub pressed: bool,
    pub accumulated_ms: u64,
    /// Includes the press currently held.
    pub live_ms: u64,
}

/// Subscriber side of the engine's snapshot stream. Holds at most one
/// snapshot: a newer publish replaces one that was never read.
pub struct SnapshotFeed {
    latest: Arc<Mutex<Option<EngineSnapshot>>>,
    ready: Receiver<()>,
}

impl SnapshotFeed {
    /// Takes the newest unread snapshot.
    pub fn try_latest(&self) -> Option<EngineSnapshot> {
        let _ = self.ready.try_recv();
        self.latest.lock().take()
    }

    pub fn wait(&self, timeout: Duration) -> Option<EngineSnapshot> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snap) = self.latest.lock().take() { return Some(snap); }
            if self.ready.recv_deadline(deadline).is_err() { return None; }
        }
    }
}

pub(crate) struct SnapshotPublisher {
    latest: Arc<Mutex<Option<EngineSnapshot>>>,
    ready: Sender<()>,
}

impl SnapshotPublisher {
    pub(crate) fn pair() -> (Self, SnapshotFeed) {
        let latest = Arc::new(Mutex::new(None));
        let (ready, ready_rx) = bounded(1);
        (Self { latest: latest.clone(), ready }, SnapshotFeed { latest, ready: ready_rx })
    }

    /// Returns `false` once the feed is dropped.
    pub(crate) fn publish(&self, snap: EngineSnapshot) -> bool {
        *self.latest.lock() = Some(snap);
        !matches!(self.ready.try_send(()), Err(TrySendError::Disconnected(_)))
    }
}
