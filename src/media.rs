//! Frame sources feeding the first pass of a pipeline.

use crate::frame::{PixelFormat, VideoFrame};
use crate::pipeline::Dimensions;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Anything that can hand the executor a current video frame.
pub trait FrameSource {
    /// True once a frame is available for the current refresh. Sources fed
    /// by a background producer poll it here.
    fn has_current_data(&mut self) -> bool;

    /// The latest frame, pulling from the underlying producer if needed.
    fn current_frame(&mut self) -> Option<&VideoFrame>;
}

impl FrameSource for Option<VideoFrame> {
    fn has_current_data(&mut self) -> bool {
        self.is_some()
    }

    fn current_frame(&mut self) -> Option<&VideoFrame> {
        self.as_ref()
    }
}

/// Media plus its optional metadata.
///
/// `width` and `height` only take effect when both are present; they then
/// become the explicit dimensions of the pipeline.
pub struct MediaSource {
    pub media: Box<dyn FrameSource>,
    pub kind: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaSource {
    pub fn new(media: impl FrameSource + 'static) -> Self {
        Self {
            media: Box::new(media),
            kind: None,
            width: None,
            height: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        match (self.width, self.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => Some(Dimensions { width, height }),
            _ => None,
        }
    }
}

impl From<Box<dyn FrameSource>> for MediaSource {
    fn from(media: Box<dyn FrameSource>) -> Self {
        Self {
            media,
            kind: None,
            width: None,
            height: None,
        }
    }
}

/// A single decoded image, always ready.
pub struct StillImage {
    frame: VideoFrame,
}

impl StillImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to open image {:?}", path))?
            .to_rgba8();
        let (width, height) = image.dimensions();
        info!("Loaded image {:?} ({}x{})", path, width, height);
        Ok(Self::from_frame(VideoFrame::from_data(
            width,
            height,
            PixelFormat::Rgba,
            image.into_raw(),
        )))
    }

    pub fn from_frame(frame: VideoFrame) -> Self {
        Self { frame }
    }
}

impl FrameSource for StillImage {
    fn has_current_data(&mut self) -> bool {
        true
    }

    fn current_frame(&mut self) -> Option<&VideoFrame> {
        Some(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_need_both_sides() {
        let source = MediaSource::new(None::<VideoFrame>);
        assert_eq!(source.dimensions(), None);

        let mut partial = MediaSource::new(None::<VideoFrame>);
        partial.width = Some(640);
        assert_eq!(partial.dimensions(), None);

        let full = MediaSource::new(None::<VideoFrame>).with_size(640, 360).with_kind("video");
        assert_eq!(full.dimensions(), Some(Dimensions { width: 640, height: 360 }));
        assert_eq!(full.kind.as_deref(), Some("video"));
    }

    #[test]
    fn test_still_image_is_always_ready() {
        let mut still = StillImage::from_frame(VideoFrame::new(2, 2, PixelFormat::Rgba));
        assert!(still.has_current_data());
        assert_eq!(still.current_frame().map(|f| f.width), Some(2));
    }
}
