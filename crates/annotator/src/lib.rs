//! Key-driven behavior annotation over a decoded video.
//!
//! [`AnnotationEngine`] is the single owner of labels, slots and the recording
//! session; [`DecodeWorker`] runs the video source on its own thread.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod session;
pub mod slots;
pub mod snapshot;
pub mod worker;

pub use clock::{format_clock, PlaybackClock};
pub use config::AnnotatorConfig;
pub use engine::{AnnotationEngine, EngineNotice, Step};
pub use error::{BindingError, ConfigError, ExportIoError, ImportFormatError, OpenError, RecordingGuardError};
pub use keys::{KeyBinding, KeyInput};
pub use slots::{Interval, SlotMachine, SLOT_COUNT};
pub use snapshot::{EngineSnapshot, SnapshotFeed};
pub use worker::{DecodeWorker, WorkerEvent, WorkerState};

pub use labels::{BehaviorId, BehaviorSet, LabelMatrix};
pub use media_io::VideoInfo;
