//! Video file and stream playback through the `ffmpeg` command-line tool.
//!
//! A worker process decodes to raw RGBA on a pipe; [`VideoPlayer`] paces the
//! decoded frames against wall-clock time and loops at end of stream.
//! YouTube and Twitch URLs are resolved to a direct stream first through
//! `yt-dlp` and `streamlink`.

use crate::frame::{PixelFormat, VideoFrame};
use crate::media::FrameSource;
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamingPlatform {
    YouTube,
    Twitch,
}

fn detect_streaming_platform(input: &str) -> Option<StreamingPlatform> {
    let parsed = Url::parse(input).ok()?;
    let host = parsed.host_str()?;
    match host.strip_prefix("www.").unwrap_or(host) {
        "youtube.com" | "youtu.be" => Some(StreamingPlatform::YouTube),
        "twitch.tv" => Some(StreamingPlatform::Twitch),
        _ => None,
    }
}

/// Runs a resolver tool and returns the first line it prints.
fn first_output_line(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {}", program))?;
    if !output.status.success() {
        return Err(anyhow!("{} failed: {}", program, String::from_utf8_lossy(&output.stderr)));
    }
    String::from_utf8(output.stdout)?
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .ok_or_else(|| anyhow!("{} returned no URL", program))
}

/// Turns a page URL of a known platform into a URL ffmpeg can read.
fn resolve_input(input: &str) -> Result<String> {
    match detect_streaming_platform(input) {
        Some(StreamingPlatform::YouTube) => {
            info!("Resolving YouTube stream via yt-dlp");
            first_output_line(
                "yt-dlp",
                &["-g", "-f", "bestvideo[height<=1080][vcodec^=avc1]/bestvideo[height<=1080]/best", input],
            )
        }
        Some(StreamingPlatform::Twitch) => {
            info!("Resolving Twitch stream via streamlink");
            first_output_line("streamlink", &["--stream-url", input, "best"])
        }
        None => Ok(input.to_string()),
    }
}

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
    width: u32,
    height: u32,
    duration: Option<f32>,
    fps: f32,
}

fn parse_fps(s: &str) -> Option<f32> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num: f32 = num.parse().ok()?;
            let den: f32 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => s.parse().ok(),
    }
}

/// Parses `width,height,<duration|rate>,<rate|duration>` as printed by
/// `ffprobe -of csv=p=0`. Rates are the fields containing a slash.
fn parse_stream_info(csv: &str) -> Result<StreamInfo> {
    let parts: Vec<&str> = csv.trim().split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(anyhow!("Invalid ffprobe output: {:?}", csv));
    }
    let width = parts[0].parse().context("Invalid stream width")?;
    let height = parts[1].parse().context("Invalid stream height")?;

    let mut duration = None;
    let mut fps = None;
    for field in &parts[2..] {
        if field.contains('/') {
            fps = fps.or_else(|| parse_fps(field));
        } else if let Ok(seconds) = field.parse::<f32>() {
            duration = duration.or(Some(seconds));
        }
    }

    Ok(StreamInfo {
        width,
        height,
        duration,
        fps: fps.filter(|f| *f > 0.0).unwrap_or(30.0),
    })
}

fn stream_info(input: &str) -> Result<StreamInfo> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,duration,r_frame_rate",
            "-of",
            "csv=p=0",
            input,
        ])
        .output()
        .context("Failed to run ffprobe")?;
    if !output.status.success() {
        return Err(anyhow!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr)));
    }
    parse_stream_info(&String::from_utf8(output.stdout)?)
}

fn spawn_ffmpeg(input: &str) -> Result<Child> {
    let mut args: Vec<&str> = Vec::new();
    if input.starts_with("http://") || input.starts_with("https://") {
        args.extend_from_slice(&[
            "-reconnect",
            "1",
            "-reconnect_streamed",
            "1",
            "-reconnect_delay_max",
            "5",
            "-thread_queue_size",
            "512",
        ]);
    }
    args.extend_from_slice(&["-i", input, "-f", "image2pipe", "-pix_fmt", "rgba", "-vcodec", "rawvideo", "-"]);

    Command::new("ffmpeg")
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("Failed to spawn ffmpeg")
}

/// Forwards ffmpeg's error lines to the log.
fn log_stderr(mut stderr: impl Read + Send + 'static) {
    thread::spawn(move || {
        let mut buf = [0u8; 1024];
        while let Ok(n) = stderr.read(&mut buf) {
            if n == 0 {
                break;
            }
            for line in String::from_utf8_lossy(&buf[..n]).lines() {
                if line.contains("rror") || line.contains("failed") {
                    error!("ffmpeg: {}", line);
                }
            }
        }
    });
}

/// Decodes `input` forever, restarting ffmpeg at end of stream.
fn decode_loop(input: String, info: StreamInfo, tx: SyncSender<VideoFrame>, stop: Arc<AtomicBool>) {
    let frame_size = info.width as usize * info.height as usize * 4;
    let frame_us = (1_000_000.0 / info.fps) as u64;
    let mut offset_us = 0;

    while !stop.load(Ordering::Relaxed) {
        let mut child = match spawn_ffmpeg(&input) {
            Ok(child) => child,
            Err(e) => {
                error!("{:#}", e);
                thread::sleep(Duration::from_secs(1));
                continue;
            }
        };
        if let Some(stderr) = child.stderr.take() {
            log_stderr(stderr);
        }
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            return;
        };

        let mut frames = 0u64;
        loop {
            if stop.load(Ordering::Relaxed) {
                let _ = child.kill();
                return;
            }
            let mut data = vec![0u8; frame_size];
            if let Err(e) = stdout.read_exact(&mut data) {
                if e.kind() != std::io::ErrorKind::UnexpectedEof {
                    warn!("Error reading from ffmpeg: {}", e);
                }
                break;
            }

            let mut frame = VideoFrame::from_data(info.width, info.height, PixelFormat::Rgba, data);
            frame.timestamp_us = Some(offset_us + frames * frame_us);
            frames += 1;
            // bounded channel: blocks while the player is ahead
            if tx.send(frame).is_err() {
                let _ = child.kill();
                return;
            }
        }

        let _ = child.wait();
        offset_us += frames * frame_us;
        if frames == 0 {
            thread::sleep(Duration::from_secs(1));
        }
        info!("Video loop restarting");
    }
}

/// A video file or stream decoded in the background and presented in real time.
pub struct VideoPlayer {
    frames: Receiver<VideoFrame>,
    current: Option<VideoFrame>,
    next: Option<VideoFrame>,
    started: Option<Instant>,
    pub width: u32,
    pub height: u32,
    pub duration: Option<f32>,
    pub fps: f32,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl VideoPlayer {
    /// Opens `input` (a path or URL) and starts decoding.
    pub fn open(input: &str) -> Result<Self> {
        let resolved = resolve_input(input)?;
        let stream = stream_info(&resolved)?;
        info!(
            "Video {}: {}x{}, {:.1} fps, duration {:?}",
            input, stream.width, stream.height, stream.fps, stream.duration
        );

        let (tx, frames) = mpsc::sync_channel(5);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name("vgl-video".to_string())
            .spawn(move || decode_loop(resolved, stream, tx, worker_stop))?;

        Ok(Self::from_receiver(frames, stream, stop, Some(worker)))
    }

    fn from_receiver(
        frames: Receiver<VideoFrame>,
        stream: StreamInfo,
        stop: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            frames,
            current: None,
            next: None,
            started: None,
            width: stream.width,
            height: stream.height,
            duration: stream.duration,
            fps: stream.fps,
            stop,
            worker,
        }
    }

    /// Advances to the newest frame due at `elapsed` since playback start,
    /// dropping frames when decoding is behind.
    fn advance(&mut self, elapsed: Duration) {
        let now_us = elapsed.as_micros() as u64;
        let due = |frame: &VideoFrame| frame.timestamp_us.unwrap_or(0) <= now_us;

        if let Some(next) = self.next.take() {
            if !due(&next) {
                self.next = Some(next);
                return;
            }
            self.current = Some(next);
        }
        loop {
            match self.frames.try_recv() {
                Ok(frame) if due(&frame) => self.current = Some(frame),
                Ok(frame) => {
                    self.next = Some(frame);
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl FrameSource for VideoPlayer {
    fn has_current_data(&mut self) -> bool {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.advance(started.elapsed());
        self.current.is_some()
    }

    fn current_frame(&mut self) -> Option<&VideoFrame> {
        self.current.as_ref()
    }
}

impl Drop for VideoPlayer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // free a decoder blocked on the full channel
        while self.frames.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamInfo {
        StreamInfo {
            width: 2,
            height: 2,
            duration: None,
            fps: 10.0,
        }
    }

    fn frame(timestamp_us: u64) -> VideoFrame {
        let mut frame = VideoFrame::new(2, 2, PixelFormat::Rgba);
        frame.timestamp_us = Some(timestamp_us);
        frame
    }

    #[test]
    fn test_detects_streaming_platforms() {
        assert_eq!(
            detect_streaming_platform("https://www.youtube.com/watch?v=abc"),
            Some(StreamingPlatform::YouTube)
        );
        assert_eq!(detect_streaming_platform("https://twitch.tv/foo"), Some(StreamingPlatform::Twitch));
        assert_eq!(detect_streaming_platform("clip.mp4"), None);
        assert_eq!(detect_streaming_platform("https://example.com/a.mp4"), None);
    }

    #[test]
    fn test_parses_stream_fields_in_any_order() {
        let info = parse_stream_info("1920,1080,12.5,30000/1001\n").unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.duration, Some(12.5));
        assert!((info.fps - 29.97).abs() < 0.01);

        let info = parse_stream_info("640,360,25/1,N/A").unwrap();
        assert_eq!(info.duration, None);
        assert_eq!(info.fps, 25.0);

        assert!(parse_stream_info("garbage").is_err());
    }

    #[test]
    fn test_frames_are_paced_by_timestamp() {
        let (tx, rx) = mpsc::sync_channel(5);
        for ts in [0, 100_000, 200_000] {
            tx.send(frame(ts)).unwrap();
        }
        let mut player = VideoPlayer::from_receiver(rx, stream(), Arc::new(AtomicBool::new(false)), None);

        player.advance(Duration::from_millis(50));
        assert_eq!(player.current.as_ref().and_then(|f| f.timestamp_us), Some(0));

        player.advance(Duration::from_millis(250));
        assert_eq!(player.current.as_ref().and_then(|f| f.timestamp_us), Some(200_000));
    }

    #[test]
    fn test_not_ready_before_first_frame() {
        let (_tx, rx) = mpsc::sync_channel(1);
        let mut player = VideoPlayer::from_receiver(rx, stream(), Arc::new(AtomicBool::new(false)), None);
        assert!(!player.has_current_data());
        assert!(player.current_frame().is_none());
    }
}
