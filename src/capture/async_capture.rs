use super::{CaptureBackend, CaptureConfig, NokhwaCapture};
use crate::frame::VideoFrame;
use crate::media::FrameSource;
use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Camera capture on a worker thread.
///
/// The worker keeps at most one undelivered frame; frames captured while
/// the consumer is behind are dropped, so polling always yields the newest.
pub struct AsyncCapture {
    frames: Receiver<VideoFrame>,
    latest: Option<VideoFrame>,
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AsyncCapture {
    /// Opens the camera described by `config` through nokhwa.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Self::spawn(move || NokhwaCapture::open(config))
    }

    /// Opens a backend on the worker thread and waits until it is streaming.
    pub fn spawn<B, F>(open: F) -> Result<Self>
    where
        B: CaptureBackend,
        F: FnOnce() -> Result<B> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(u32, u32)>>();
        let (frame_tx, frames) = mpsc::sync_channel(1);
        let running = Arc::new(AtomicBool::new(true));
        let worker_running = Arc::clone(&running);

        let worker = thread::Builder::new()
            .name("vgl-capture".to_string())
            .spawn(move || {
                let mut backend = match open() {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(backend.frame_size()));

                while worker_running.load(Ordering::Relaxed) {
                    match backend.capture_frame() {
                        Ok(frame) => match frame_tx.try_send(frame) {
                            Ok(()) | Err(TrySendError::Full(_)) => {}
                            Err(TrySendError::Disconnected(_)) => break,
                        },
                        Err(e) => {
                            warn!("Capture failed: {}", e);
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
                debug!("Capture worker stopped");
            })?;

        let (width, height) = ready_rx
            .recv()
            .map_err(|_| anyhow!("Capture worker exited during startup"))??;
        info!("Async capture running at {}x{}", width, height);

        Ok(Self {
            frames,
            latest: None,
            width,
            height,
            running,
            worker: Some(worker),
        })
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Newest frame received so far, without blocking.
    pub fn get_latest_frame(&mut self) -> Option<&VideoFrame> {
        self.poll();
        self.latest.as_ref()
    }

    fn poll(&mut self) {
        while let Ok(frame) = self.frames.try_recv() {
            self.latest = Some(frame);
        }
    }
}

impl FrameSource for AsyncCapture {
    fn has_current_data(&mut self) -> bool {
        self.poll();
        self.latest.is_some()
    }

    fn current_frame(&mut self) -> Option<&VideoFrame> {
        self.get_latest_frame()
    }
}

impl Drop for AsyncCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        // unblock a worker waiting on a full channel
        while self.frames.try_recv().is_ok() {}
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CameraInfo;
    use crate::frame::PixelFormat;
    use std::time::Instant;

    struct FakeCamera {
        captured: u64,
    }

    impl CaptureBackend for FakeCamera {
        fn list_devices() -> Result<Vec<CameraInfo>> {
            Ok(Vec::new())
        }

        fn open(_config: CaptureConfig) -> Result<Self> {
            Ok(Self { captured: 0 })
        }

        fn capture_frame(&mut self) -> Result<VideoFrame> {
            thread::sleep(Duration::from_millis(1));
            self.captured += 1;
            let mut frame = VideoFrame::new(4, 2, PixelFormat::Rgb);
            frame.timestamp_us = Some(self.captured);
            Ok(frame)
        }

        fn frame_size(&self) -> (u32, u32) {
            (4, 2)
        }
    }

    #[test]
    fn test_frames_arrive_from_worker() {
        let mut capture = AsyncCapture::spawn(|| FakeCamera::open(CaptureConfig::default())).unwrap();
        assert_eq!(capture.frame_size(), (4, 2));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !capture.has_current_data() {
            assert!(Instant::now() < deadline, "no frame captured");
            thread::sleep(Duration::from_millis(1));
        }
        let first = capture.current_frame().and_then(|f| f.timestamp_us).unwrap();

        thread::sleep(Duration::from_millis(20));
        let later = capture.get_latest_frame().and_then(|f| f.timestamp_us).unwrap();
        assert!(later > first);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let result = AsyncCapture::spawn(|| -> Result<FakeCamera> { Err(anyhow!("no camera")) });
        assert_eq!(result.err().map(|e| e.to_string()), Some("no camera".to_string()));
    }
}
