//! Decoded video frames and conversion to the RGBA layout textures expect.

use anyhow::{anyhow, bail, Result};

/// Pixel layouts a frame source may hand over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB.
    Rgb,
    /// Packed 8-bit RGBA, the upload format.
    Rgba,
    /// Packed 4:2:2, byte order Y0 U Y1 V.
    Yuyv,
    /// Packed 4:2:2, byte order U Y0 V Y1.
    Uyvy,
    /// Full-resolution Y plane followed by an interleaved half-resolution UV plane.
    Nv12,
}

impl PixelFormat {
    /// Bytes a tightly packed `width` x `height` frame occupies.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Rgb => pixels * 3,
            PixelFormat::Rgba => pixels * 4,
            PixelFormat::Yuyv | PixelFormat::Uyvy => pixels * 2,
            PixelFormat::Nv12 => pixels + 2 * (width as usize).div_ceil(2) * (height as usize).div_ceil(2),
        }
    }

    /// Row stride of packed formats; `None` for planar ones.
    fn packed_stride(self, width: u32) -> Option<usize> {
        let bytes = match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
            PixelFormat::Yuyv | PixelFormat::Uyvy => 2,
            PixelFormat::Nv12 => return None,
        };
        Some(width as usize * bytes)
    }
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Presentation time, when the producer knows it.
    pub timestamp_us: Option<u64>,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// A zero-filled frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self::from_data(width, height, format, vec![0; format.frame_len(width, height)])
    }

    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    fn with_data(&self, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width: self.width,
            height: self.height,
            format,
            timestamp_us: self.timestamp_us,
            data,
        }
    }

    /// Converts to packed RGBA with opaque alpha. Fails when the buffer is
    /// shorter than the format requires.
    pub fn to_rgba(&self) -> Result<VideoFrame> {
        let expected = self.format.frame_len(self.width, self.height);
        if self.data.len() < expected {
            bail!(
                "{:?} frame of {}x{} holds {} bytes, needs {}",
                self.format,
                self.width,
                self.height,
                self.data.len(),
                expected
            );
        }

        let rgba = match self.format {
            PixelFormat::Rgba => return Ok(self.clone()),
            PixelFormat::Rgb => self.data[..expected]
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
            PixelFormat::Yuyv => self.convert_yuv(ezk_image::PixelFormat::YUYV, &self.data[..expected])?,
            PixelFormat::Nv12 => self.convert_yuv(ezk_image::PixelFormat::NV12, &self.data[..expected])?,
            PixelFormat::Uyvy => {
                // swap each byte pair into YUYV order
                let yuyv: Vec<u8> = self.data[..expected]
                    .chunks_exact(2)
                    .flat_map(|pair| [pair[1], pair[0]])
                    .collect();
                self.convert_yuv(ezk_image::PixelFormat::YUYV, &yuyv)?
            }
        };
        Ok(self.with_data(PixelFormat::Rgba, rgba))
    }

    fn convert_yuv(&self, layout: ezk_image::PixelFormat, data: &[u8]) -> Result<Vec<u8>> {
        yuv_to_rgba(layout, data, self.width, self.height)
            .map_err(|e| anyhow!("{:?} to RGBA conversion failed: {}", self.format, e))
    }

    /// Copy with the row order reversed, for backends whose textures start
    /// at the bottom-left. Planar frames are converted to RGBA first.
    pub fn flipped_vertically(&self) -> Result<VideoFrame> {
        let Some(stride) = self.format.packed_stride(self.width) else {
            return self.to_rgba()?.flipped_vertically();
        };
        if stride == 0 {
            return Ok(self.clone());
        }
        let rows = self.height as usize;
        let data = self.data[..(stride * rows).min(self.data.len())]
            .chunks_exact(stride)
            .rev()
            .flatten()
            .copied()
            .collect();
        Ok(self.with_data(self.format, data))
    }
}

/// Limited-range BT.709, which is what webcams deliver in practice.
fn yuv_to_rgba(layout: ezk_image::PixelFormat, data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let (width, height) = (width as usize, height as usize);
    let mut rgba = vec![0u8; width * height * 4];

    let source_color = ezk_image::ColorInfo::YUV(ezk_image::YuvColorInfo {
        transfer: ezk_image::ColorTransfer::Linear,
        primaries: ezk_image::ColorPrimaries::BT709,
        space: ezk_image::ColorSpace::BT709,
        full_range: false,
    });
    let target_color = ezk_image::ColorInfo::RGB(ezk_image::RgbColorInfo {
        transfer: ezk_image::ColorTransfer::Linear,
        primaries: ezk_image::ColorPrimaries::BT709,
    });

    let source = ezk_image::Image::from_buffer(layout, data, None, width, height, source_color)
        .map_err(|e| anyhow!("cannot read source buffer: {:?}", e))?;
    let mut target =
        ezk_image::Image::from_buffer(ezk_image::PixelFormat::RGBA, &mut rgba[..], None, width, height, target_color)
            .map_err(|e| anyhow!("cannot wrap RGBA buffer: {:?}", e))?;
    ezk_image::convert(&source, &mut target).map_err(|e| anyhow!("{:?}", e))?;
    drop(target);
    Ok(rgba)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_gains_opaque_alpha() {
        let frame = VideoFrame::from_data(2, 1, PixelFormat::Rgb, vec![255, 0, 0, 0, 0, 255]);
        let rgba = frame.to_rgba().unwrap();

        assert_eq!(rgba.format, PixelFormat::Rgba);
        assert_eq!(rgba.data, vec![255, 0, 0, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        assert!(VideoFrame::from_data(2, 2, PixelFormat::Rgb, vec![0; 5]).to_rgba().is_err());
        assert!(VideoFrame::from_data(2, 2, PixelFormat::Nv12, vec![0; 5]).to_rgba().is_err());
    }

    #[test]
    fn test_nv12_length_covers_chroma_plane() {
        assert_eq!(PixelFormat::Nv12.frame_len(4, 2), 12);
        assert_eq!(PixelFormat::Nv12.frame_len(3, 3), 9 + 8);
        assert_eq!(VideoFrame::new(4, 2, PixelFormat::Yuyv).data.len(), 16);
    }

    #[test]
    fn test_flip_reverses_rows() {
        let frame = VideoFrame::from_data(1, 3, PixelFormat::Rgba, vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3]);
        let flipped = frame.flipped_vertically().unwrap();

        assert_eq!(flipped.data, vec![3, 3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
        assert_eq!(flipped.flipped_vertically().unwrap().data, frame.data);
    }
}
