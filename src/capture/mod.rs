//! Webcam capture.
//!
//! [`NokhwaCapture`] talks to the camera synchronously; [`AsyncCapture`]
//! runs it on a worker thread and exposes the newest frame as a
//! [`FrameSource`](crate::media::FrameSource).

mod async_capture;
mod nokhwa_backend;

pub use async_capture::AsyncCapture;
pub use nokhwa_backend::NokhwaCapture;

use crate::frame::VideoFrame;
use anyhow::Result;

/// A blocking camera backend.
pub trait CaptureBackend {
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    fn open(config: CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Blocks until the next frame arrives.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    fn frame_size(&self) -> (u32, u32);
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Requested capture mode. Backends pick the closest mode the device offers.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}
