use std::io;
use std::path::PathBuf;

use labels::{BehaviorId, LabelError};
use media_io::MediaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("cannot open video: {0}")]
    Media(#[from] MediaError),
    #[error("decode worker has been stopped")]
    WorkerStopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("slot {0} does not exist")]
    InvalidSlot(usize),
    #[error("behavior {0} is not defined")]
    UnknownBehavior(BehaviorId),
    #[error("key for slot {slot} is already bound to slot {owner}")]
    DuplicateKeyBinding { slot: usize, owner: usize },
    #[error("behavior for slot {slot} is already assigned to slot {owner}")]
    DuplicateBehaviorAssignment { slot: usize, owner: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordingGuardError {
    #[error("no video loaded")]
    NoVideoLoaded,
    #[error("no slot has a behavior assigned")]
    NoAssignedBehavior,
    #[error("slot {slot} has a behavior but no key binding")]
    MissingKeyBinding { slot: usize },
    #[error("slots {first} and {second} share a key")]
    SharedKey { first: usize, second: usize },
    #[error("slots {first} and {second} share a behavior")]
    SharedBehavior { first: usize, second: usize },
}

#[derive(Debug, Error)]
#[error("cannot write labels to {}: {source}", path.display())]
pub struct ExportIoError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug, Error)]
pub enum ImportFormatError {
    #[error("label table has no header row starting with `frame`")]
    MissingHeader,
    #[error("label table header names no behaviors")]
    NoBehaviors,
    #[error("label table header has an unusable behavior name {0:?}")]
    InvalidBehaviorName(String),
    #[error("cannot read label table: {0}")]
    Io(#[from] io::Error),
}

impl From<LabelError> for ImportFormatError {
    fn from(e: LabelError) -> Self {
        match e {
            LabelError::MissingHeader => Self::MissingHeader,
            LabelError::EmptyBehaviorList => Self::NoBehaviors,
            LabelError::InvalidName(name) => Self::InvalidBehaviorName(name),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}
