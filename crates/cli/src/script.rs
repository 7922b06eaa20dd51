//! Frame-keyed action scripts for `replay`.
//!
//! One action per line, `<frame> <action> [arg]`:
//!
//! ```text
//! 12 press 0
//! 30 release 0
//! 30 seek 5
//! 0 record on
//! 90 pause
//! ```
//!
//! Blank lines and `#` comments are ignored.

use anyhow::{anyhow, bail, Context, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Press(usize),
    Release(usize),
    Seek(i64),
    Record(bool),
    Pause,
    Play,
    Bookmark,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cue {
    pub frame: u64,
    pub action: Action,
}

pub fn parse(text: &str) -> Result<Vec<Cue>> {
    let mut cues = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() { continue; }
        let cue = parse_line(line).with_context(|| format!("script line {}: `{}`", n + 1, raw.trim()))?;
        cues.push(cue);
    }
    // Stable: cues on the same frame keep file order.
    cues.sort_by_key(|c| c.frame);
    Ok(cues)
}

fn parse_line(line: &str) -> Result<Cue> {
    let mut parts = line.split_whitespace();
    let frame: u64 = parts.next().ok_or_else(|| anyhow!("missing frame"))?.parse().context("bad frame")?;
    let verb = parts.next().ok_or_else(|| anyhow!("missing action"))?;
    let arg = parts.next();
    let action = match verb {
        "press" => Action::Press(slot_arg(arg)?),
        "release" => Action::Release(slot_arg(arg)?),
        "seek" => Action::Seek(arg.ok_or_else(|| anyhow!("seek needs a frame"))?.parse().context("bad seek frame")?),
        "record" => match arg {
            Some("on") => Action::Record(true),
            Some("off") => Action::Record(false),
            _ => bail!("record needs on|off"),
        },
        "pause" => Action::Pause,
        "play" => Action::Play,
        "bookmark" => Action::Bookmark,
        other => bail!("unknown action `{other}`"),
    };
    if let Some(extra) = parts.next() { bail!("unexpected `{extra}`"); }
    Ok(Cue { frame, action })
}

fn slot_arg(arg: Option<&str>) -> Result<usize> {
    arg.ok_or_else(|| anyhow!("missing slot"))?.parse().context("bad slot")
}
