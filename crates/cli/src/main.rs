//! Headless front end: probe videos, replay key scripts into label tables,
//! and summarize exported tables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use annotator::{AnnotationEngine, AnnotatorConfig, EngineNotice, KeyBinding, KeyInput, SLOT_COUNT};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod script;

use script::{Action, Cue};

#[derive(Parser)]
#[command(name = "annotator-cli")]
#[command(about = "Frame-accurate behavior annotation without a window", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stream information as JSON
    Probe {
        video: String,
    },

    /// Play a video while applying a key script, then export the labels
    Replay {
        video: String,

        /// Comma-separated behavior names, assigned to slots in order
        #[arg(short, long, value_delimiter = ',', required = true)]
        behaviors: Vec<String>,

        /// Action script file
        #[arg(short, long)]
        script: PathBuf,

        /// Label table to write
        #[arg(short, long, default_value = "labels.csv")]
        out: PathBuf,

        /// Playback speed factor
        #[arg(long)]
        speed: Option<f32>,

        /// Auto-stop recording after this many minutes (0 = never)
        #[arg(long)]
        limit_minutes: Option<f64>,
    },

    /// Print per-behavior totals of a label table
    Inspect {
        table: PathBuf,
    },
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AnnotatorConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AnnotatorConfig::load_or_default(),
    };

    match cli.command {
        Commands::Probe { video } => probe(&video),
        Commands::Replay { video, behaviors, script, out, speed, limit_minutes } => {
            let mut config = config;
            if let Some(s) = speed { config.speed = s; }
            if let Some(m) = limit_minutes { config.record_limit_minutes = m; }
            replay(config, &video, &behaviors, &script, &out)
        }
        Commands::Inspect { table } => inspect(&table),
    }
}

fn probe(video: &str) -> Result<()> {
    let source = media_io::open_source(video).with_context(|| format!("opening {video}"))?;
    println!("{}", serde_json::to_string_pretty(source.info())?);
    Ok(())
}

/// Key for a slot with no configured binding; outside any real key range.
fn placeholder_key(slot: usize) -> KeyBinding { KeyBinding::new(0x1_0000 + slot as u32, 0) }

fn replay(config: AnnotatorConfig, video: &str, behaviors: &[String], script: &Path, out: &Path) -> Result<()> {
    let text = fs::read_to_string(script).with_context(|| format!("reading {}", script.display()))?;
    let cues = script::parse(&text)?;

    let mut engine = AnnotationEngine::new(config);
    let info = engine.open_video(video)?;
    engine.define_behaviors(behaviors)?;
    let count = engine.behaviors().len();
    if count > SLOT_COUNT {
        bail!("{count} behaviors given but only {SLOT_COUNT} slots exist");
    }
    let mut keys = Vec::with_capacity(count);
    for slot in 0..count {
        let key = match engine.slots().slot(slot).and_then(|s| s.key()) {
            Some(k) => k,
            None => {
                let k = placeholder_key(slot);
                engine.bind_slot_key(slot, k)?;
                k
            }
        };
        engine.assign_slot_behavior(slot, Some(slot))?;
        keys.push(key);
    }
    info!(video = %info.path, frames = info.total_frames, fps = info.fps, cues = cues.len(), "replaying");

    // The frame delivered after open.
    engine.wait_events(Duration::from_secs(2));
    let mut pending = cues.into_iter().peekable();
    // Cues after a seek wait until the target frame is shown.
    let mut awaiting: Option<u64> = None;
    engine.play();
    loop {
        let notices = engine.wait_events(Duration::from_millis(100));
        if let Some(target) = awaiting {
            if notices.is_empty() || notices.contains(&EngineNotice::FrameShown(target)) { awaiting = None; }
        }
        while awaiting.is_none() {
            let frame = engine.current_frame();
            let Some(cue) = pending.next_if(|c| c.frame <= frame) else { break; };
            awaiting = apply(&mut engine, &keys, cue)?;
        }

        let finished = notices.contains(&EngineNotice::PlaybackFinished);
        if awaiting.is_none() && !engine.is_playing() && (finished || notices.is_empty()) {
            match pending.next() {
                Some(cue) => awaiting = apply(&mut engine, &keys, cue)?,
                None => break,
            }
        }
    }

    engine.toggle_recording(false)?;
    engine.export_csv(out)?;
    for b in engine.behaviors().iter() {
        println!("{}\t{} frames", b.name, engine.matrix().count(b.id));
    }
    println!("wrote {}", out.display());
    engine.shutdown();
    Ok(())
}

/// Returns the frame to wait for after a seek.
fn apply(engine: &mut AnnotationEngine, keys: &[KeyBinding], cue: Cue) -> Result<Option<u64>> {
    debug!(frame = cue.frame, at = engine.current_frame(), action = ?cue.action, "cue");
    let key = |slot: usize| keys.get(slot).copied().with_context(|| format!("slot {slot} has no behavior"));
    match cue.action {
        Action::Press(slot) => { engine.key_pressed(KeyInput::new(key(slot)?)); }
        Action::Release(slot) => { engine.key_released(KeyInput::new(key(slot)?)); }
        Action::Seek(frame) => {
            engine.seek(frame);
            return Ok(Some(engine.clock().clamp(frame)));
        }
        Action::Record(on) => engine.toggle_recording(on)?,
        Action::Pause => engine.pause(),
        Action::Play => engine.play(),
        Action::Bookmark => { engine.add_bookmark(); }
    }
    Ok(None)
}

#[derive(Serialize)]
struct BehaviorTotal {
    name: String,
    frames: usize,
    seconds: f64,
}

#[derive(Serialize)]
struct TableSummary {
    video_name: Option<String>,
    fps: Option<f64>,
    skipped_rows: usize,
    behaviors: Vec<BehaviorTotal>,
}

fn inspect(table: &Path) -> Result<()> {
    let text = fs::read_to_string(table).with_context(|| format!("reading {}", table.display()))?;
    // Rows cannot outnumber lines.
    let parsed = labels::csv::decode(&text, text.lines().count())
        .map_err(annotator::ImportFormatError::from)
        .with_context(|| format!("parsing {}", table.display()))?;
    let fps = parsed.fps.unwrap_or(media_io::DEFAULT_FPS);
    let behaviors = parsed.behaviors.iter().map(|b| {
        let frames = parsed.matrix.count(b.id);
        BehaviorTotal { name: b.name.clone(), frames, seconds: labels::csv::round3(frames as f64 / fps) }
    }).collect();
    let summary = TableSummary {
        video_name: parsed.video_name,
        fps: parsed.fps,
        skipped_rows: parsed.skipped_rows,
        behaviors,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
