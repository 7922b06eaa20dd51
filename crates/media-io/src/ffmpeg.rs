use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{sanitize_fps, DecodedFrame, FrameSource, MediaError, Result, VideoInfo};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// "30000/1001" or "25" to frames per second; 0.0 when unparseable.
fn parse_rate(s: &str) -> f64 {
    match s.split_once('/') {
        Some((n, d)) => {
            let n = n.trim().parse::<f64>().unwrap_or(0.0);
            let d = d.trim().parse::<f64>().unwrap_or(0.0);
            if d > 0.0 { n / d } else { 0.0 }
        }
        None => s.trim().parse::<f64>().unwrap_or(0.0),
    }
}

fn info_from_probe(path: &str, probe: &ProbeOutput) -> Result<VideoInfo> {
    let stream = probe.streams.first().ok_or_else(|| MediaError::Probe(format!("no video stream in {path}")))?;
    let raw_fps = stream.avg_frame_rate.as_deref().map(parse_rate).filter(|r| *r > 0.0)
        .or_else(|| stream.r_frame_rate.as_deref().map(parse_rate))
        .unwrap_or(0.0);
    let fps = sanitize_fps(raw_fps);
    let total_frames = stream.nb_frames.as_deref().and_then(|n| n.trim().parse::<u64>().ok())
        .or_else(|| {
            let secs = stream.duration.as_deref()?.trim().parse::<f64>().ok()?;
            (secs.is_finite() && secs > 0.0).then(|| (secs * fps).floor() as u64)
        })
        .unwrap_or(0);
    Ok(VideoInfo {
        path: path.to_string(),
        fps,
        total_frames,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

/// Decodes through an `ffmpeg` child process emitting packed RGB24 on stdout.
/// Seeking restarts the child at the target timestamp.
pub struct FfmpegSource {
    info: VideoInfo,
    ffmpeg: PathBuf,
    child: Option<(Child, ChildStdout)>,
    position: u64,
}

impl FfmpegSource {
    pub fn open(path: &str) -> Result<Self> {
        if !Path::new(path).exists() { return Err(MediaError::NotFound(path.to_string())); }
        let ffprobe = which::which("ffprobe").map_err(|_| MediaError::ToolMissing("ffprobe"))?;
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::ToolMissing("ffmpeg"))?;

        let out = Command::new(&ffprobe)
            .args(["-v", "error", "-select_streams", "v:0", "-show_entries"])
            .arg("stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration")
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| MediaError::Spawn { tool: "ffprobe", source })?;
        if !out.status.success() {
            return Err(MediaError::Probe(String::from_utf8_lossy(&out.stderr).trim().to_string()));
        }
        let probe: ProbeOutput = serde_json::from_slice(&out.stdout)?;
        let info = info_from_probe(path, &probe)?;
        debug!(path, fps = info.fps, total_frames = info.total_frames, "probed video");
        Ok(Self { info, ffmpeg, child: None, position: 0 })
    }

    fn frame_bytes(&self) -> usize { self.info.width as usize * self.info.height as usize * 3 }

    fn spawn_at(&mut self, frame: u64) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-v", "error", "-nostdin"]);
        if frame > 0 { cmd.arg("-ss").arg(format!("{:.6}", frame as f64 / self.info.fps)); }
        cmd.arg("-i").arg(&self.info.path)
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| MediaError::Spawn { tool: "ffmpeg", source })?;
        let stdout = child.stdout.take().ok_or_else(|| MediaError::Probe("ffmpeg stdout unavailable".into()))?;
        self.child = Some((child, stdout));
        Ok(())
    }

    fn kill_child(&mut self) {
        if let Some((mut child, _)) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo { &self.info }

    fn read_frame(&mut self) -> Result<Option<DecodedFrame>> {
        let len = self.frame_bytes();
        if len == 0 { return Ok(None); }
        if self.child.is_none() { self.spawn_at(self.position)?; }
        let Some((_, stdout)) = self.child.as_mut() else { return Ok(None); };
        let mut buf = vec![0u8; len];
        match stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.kill_child();
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "ffmpeg read failed");
                self.kill_child();
                return Err(e.into());
            }
        }
        let index = self.position;
        self.position += 1;
        Ok(Some(DecodedFrame { index, width: self.info.width, height: self.info.height, data: Arc::from(buf.into_boxed_slice()) }))
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if frame != self.position || self.child.is_none() {
            self.kill_child();
            self.position = frame;
        }
        Ok(())
    }

    fn position(&self) -> u64 { self.position }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) { self.kill_child(); }
}
