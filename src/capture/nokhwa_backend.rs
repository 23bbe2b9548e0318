use super::{CameraInfo, CaptureBackend, CaptureConfig};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use tracing::{info, warn};

/// Capture through nokhwa. NV12 and YUYV frames are handed on undecoded
/// and converted at upload; anything else is decoded to packed RGB.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

/// Modes tried in order until one opens a stream. Built-in laptop cameras
/// usually only offer NV12/YUYV, USB cameras need MJPEG for high resolutions.
fn candidate_formats(config: &CaptureConfig) -> Vec<CameraFormat> {
    let mut resolutions = vec![(config.width, config.height)];
    for fallback in [(1920, 1080), (1280, 720)] {
        if !resolutions.contains(&fallback) {
            resolutions.push(fallback);
        }
    }
    let mut rates = vec![config.fps];
    for fallback in [30, 25, 15] {
        if !rates.contains(&fallback) {
            rates.push(fallback);
        }
    }

    let mut formats = Vec::new();
    for &(width, height) in &resolutions {
        for &fps in &rates {
            for format in [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG] {
                formats.push(CameraFormat::new(Resolution::new(width, height), format, fps));
            }
        }
    }
    for format in [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG] {
        formats.push(CameraFormat::new(Resolution::new(640, 480), format, 30));
    }
    formats
}

/// Ranks a device mode against the request: exact size first, then pixel
/// count, then frame rate, then the cheaper-to-decode formats.
fn format_score(format: &CameraFormat, config: &CaptureConfig) -> i64 {
    let mut score = 0;
    if format.width() == config.width && format.height() == config.height {
        score += 1 << 40;
    }
    score += format.width() as i64 * format.height() as i64 * 1_000;
    score += format.frame_rate().min(config.fps.max(1)) as i64 * 10;
    score += match format.format() {
        FrameFormat::NV12 => 3,
        FrameFormat::YUYV => 2,
        FrameFormat::MJPEG => 1,
        _ => 0,
    };
    score
}

fn requested(format: CameraFormat) -> RequestedFormat<'static> {
    RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
}

impl NokhwaCapture {
    fn connect(config: &CaptureConfig) -> Result<(Camera, CameraFormat)> {
        for format in candidate_formats(config) {
            let Ok(mut camera) = Camera::new(CameraIndex::Index(config.device_index), requested(format)) else {
                continue;
            };
            // some drivers accept the request and only fail when streaming
            if camera.open_stream().is_ok() {
                info!("Camera accepted format {:?}", format);
                return Ok((camera, format));
            }
        }
        Err(anyhow!(
            "Could not open a stream on camera {} with any candidate format",
            config.device_index
        ))
    }

    /// Switches to the best advertised mode, falling back to `working`.
    fn upgrade(camera: &mut Camera, config: &CaptureConfig, working: CameraFormat) {
        let formats = match camera.compatible_camera_formats() {
            Ok(formats) if !formats.is_empty() => formats,
            _ => {
                warn!("Device reported no supported formats, keeping {:?}", working);
                return;
            }
        };
        let Some(best) = formats.into_iter().max_by_key(|f| format_score(f, config)) else {
            return;
        };
        if best == working {
            return;
        }

        info!("Switching camera to {:?}", best);
        let _ = camera.stop_stream();
        let switched = camera.set_camera_requset(requested(best)).is_ok() && camera.open_stream().is_ok();
        if !switched {
            warn!("Camera rejected {:?}, reverting to {:?}", best, working);
            let _ = camera.set_camera_requset(requested(working));
            let _ = camera.open_stream();
        }
    }
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> Result<Self> {
        let (mut camera, working) = Self::connect(&config)?;
        Self::upgrade(&mut camera, &config, working);

        let resolution = camera.resolution();
        info!("Camera {} streaming at {}", config.device_index, resolution);
        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }

    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let buffer = self.camera.frame()?;
        let resolution = buffer.resolution();
        let (width, height) = (resolution.width(), resolution.height());
        let raw = match buffer.source_frame_format() {
            FrameFormat::NV12 => Some(PixelFormat::Nv12),
            FrameFormat::YUYV => Some(PixelFormat::Yuyv),
            _ => None,
        };
        if let Some(format) = raw {
            if buffer.buffer().len() >= format.frame_len(width, height) {
                return Ok(VideoFrame::from_data(width, height, format, buffer.buffer().to_vec()));
            }
        }

        let decoded = buffer.decode_image::<RgbFormat>()?;
        let (width, height) = decoded.dimensions();
        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
