//! Behavior definitions and the frame x behavior label grid.
//!
//! A [`LabelMatrix`] holds one column per behavior, each exactly `total_frames`
//! long, with every cell either 0 or 1. [`csv`] reads and writes the tabular
//! export format.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod csv;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LabelError {
    #[error("no behavior names left after trimming and deduplication")]
    EmptyBehaviorList,
    #[error("missing header row starting with `frame`")]
    MissingHeader,
    #[error("behavior name {0:?} contains a comma, quote or line break")]
    InvalidName(String),
}

/// Characters that would split or corrupt a header field of the label table.
const RESERVED: [char; 4] = [',', '"', '\r', '\n'];

pub type BehaviorId = usize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: BehaviorId,
    pub name: String,
}

/// Ordered, unique, non-empty behavior names. Ids are positions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorSet {
    behaviors: Vec<Behavior>,
}

impl BehaviorSet {
    /// Trims every name, drops empties and keeps the first occurrence of duplicates.
    /// Names holding a table delimiter are rejected.
    pub fn define<I, S>(names: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut behaviors: Vec<Behavior> = Vec::new();
        for raw in names {
            let name = raw.as_ref().trim();
            if name.is_empty() || behaviors.iter().any(|b| b.name == name) { continue; }
            if name.contains(&RESERVED[..]) { return Err(LabelError::InvalidName(name.to_string())); }
            behaviors.push(Behavior { id: behaviors.len(), name: name.to_string() });
        }
        if behaviors.is_empty() { return Err(LabelError::EmptyBehaviorList); }
        Ok(Self { behaviors })
    }

    pub fn len(&self) -> usize { self.behaviors.len() }

    pub fn is_empty(&self) -> bool { self.behaviors.is_empty() }

    pub fn get(&self, id: BehaviorId) -> Option<&Behavior> { self.behaviors.get(id) }

    pub fn iter(&self) -> impl Iterator<Item = &Behavior> { self.behaviors.iter() }

    pub fn names(&self) -> Vec<&str> { self.behaviors.iter().map(|b| b.name.as_str()).collect() }

    pub fn position(&self, name: &str) -> Option<BehaviorId> {
        let name = name.trim();
        self.behaviors.iter().position(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMatrix {
    total_frames: usize,
    columns: Vec<Vec<u8>>,
}

impl LabelMatrix {
    pub fn new(behavior_count: usize, total_frames: usize) -> Self {
        Self { total_frames, columns: vec![vec![0u8; total_frames]; behavior_count] }
    }

    /// Reallocates every column to `total_frames` zeros.
    pub fn reset(&mut self, behavior_count: usize, total_frames: usize) {
        *self = Self::new(behavior_count, total_frames);
    }

    pub fn total_frames(&self) -> usize { self.total_frames }

    pub fn behavior_count(&self) -> usize { self.columns.len() }

    pub fn column(&self, behavior: BehaviorId) -> Option<&[u8]> {
        self.columns.get(behavior).map(|c| c.as_slice())
    }

    pub fn get(&self, behavior: BehaviorId, frame: usize) -> u8 {
        self.columns.get(behavior).and_then(|c| c.get(frame)).copied().unwrap_or(0)
    }

    /// Out-of-range cells are ignored. Returns whether the cell changed.
    pub fn set(&mut self, behavior: BehaviorId, frame: usize, on: bool) -> bool {
        let Some(cell) = self.columns.get_mut(behavior).and_then(|c| c.get_mut(frame)) else { return false; };
        let v = on as u8;
        let changed = *cell != v;
        *cell = v;
        changed
    }

    /// Sets the inclusive range `[a, b]` (either order) to 1, clamped to the column.
    pub fn paint_range(&mut self, behavior: BehaviorId, a: usize, b: usize) {
        let Some(col) = self.columns.get_mut(behavior) else { return; };
        if col.is_empty() { return; }
        let last = col.len() - 1;
        let (lo, hi) = (a.min(b), a.max(b));
        if lo > last { return; }
        col[lo..=hi.min(last)].iter_mut().for_each(|c| *c = 1);
    }

    pub fn count(&self, behavior: BehaviorId) -> usize {
        self.columns.get(behavior).map(|c| c.iter().filter(|&&v| v == 1).count()).unwrap_or(0)
    }

    pub fn is_blank(&self) -> bool { self.columns.iter().all(|c| c.iter().all(|&v| v == 0)) }
}
