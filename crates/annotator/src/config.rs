use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::keys::{codes, KeyBinding};
use crate::slots::SLOT_COUNT;

pub const APP_DIR: &str = "behavior-annotator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotatorConfig {
    /// Initial key per slot; extra entries beyond the slot count are ignored.
    pub slot_keys: Vec<Option<KeyBinding>>,
    /// Recording auto-stops after this many minutes of media time (0 = never).
    pub record_limit_minutes: f64,
    pub speed: f32,
    pub step_seconds: f64,
    pub long_step_seconds: f64,
    pub worker: WorkerConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            slot_keys: vec![
                Some(KeyBinding::new(codes::KEY_F, codes::SCAN_F)),
                Some(KeyBinding::new(codes::KEY_J, codes::SCAN_J)),
                None,
                None,
            ],
            record_limit_minutes: 0.0,
            speed: 1.0,
            step_seconds: 1.0,
            long_step_seconds: 10.0,
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Longest an idle worker waits before rechecking its controls.
    pub idle_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self { Self { idle_poll_ms: 50 } }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.json"))
}

impl AnnotatorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut cfg: Self = serde_json::from_str(&text)?;
        cfg.slot_keys.truncate(SLOT_COUNT);
        debug!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    /// Reads the per-user config when present; a broken file falls back to defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else { return Self::default(); };
        if !path.exists() { return Self::default(); }
        match Self::load(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable config");
                Self::default()
            }
        }
    }
}
