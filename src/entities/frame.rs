//! Decoded frame images with multi-format pixel buffers (U8, F16, F32)
//!
//! **Why**: Decoders hand back different precisions:
//! - GIF/WebP/PNG/JPEG: 8-bit RGBA (u8)
//! - HDR-capable sources: 16-bit half float or 32-bit float RGBA
//!
//! **Used by**: Frame sources (produce), FrameBuffer (byte accounting),
//! frame handlers (consume pixels for rendering)
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: 4 bytes/pixel
//! - `PixelBuffer::F16`: 8 bytes/pixel
//! - `PixelBuffer::F32`: 16 bytes/pixel
//!
//! Frames are immutable once decoded. Cloning a `FrameImage` only bumps a
//! reference count, so the buffer, the player and every handler can hold the
//! same pixels.

use std::sync::Arc;

use half::f16 as F16;

/// Pixel buffer format - stores different precision levels
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),   // 8-bit per channel
    F16(Vec<F16>), // half-precision per channel
    F32(Vec<f32>), // full-precision per channel
}

/// Pixel format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    RgbaF16,
    RgbaF32,
}

impl PixelFormat {
    /// Bytes used by one RGBA pixel
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::RgbaF16 => 8,
            PixelFormat::RgbaF32 => 16,
        }
    }
}

impl PixelBuffer {
    fn format(&self) -> PixelFormat {
        match self {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F16(_) => PixelFormat::RgbaF16,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }

    fn channels(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F16(v) => v.len(),
            PixelBuffer::F32(v) => v.len(),
        }
    }
}

/// Single decoded frame image
#[derive(Debug, Clone)]
pub struct FrameImage {
    buffer: Arc<PixelBuffer>,
    width: usize,
    height: usize,
}

impl FrameImage {
    /// Wrap an RGBA pixel buffer.
    ///
    /// Returns None when the buffer length does not match `width * height * 4`
    /// channels.
    pub fn new(buffer: PixelBuffer, width: usize, height: usize) -> Option<Self> {
        if buffer.channels() != width * height * 4 {
            return None;
        }
        Some(Self {
            buffer: Arc::new(buffer),
            width,
            height,
        })
    }

    /// Create frame from 8-bit RGBA bytes
    pub fn from_u8_buffer(pixels: Vec<u8>, width: usize, height: usize) -> Option<Self> {
        Self::new(PixelBuffer::U8(pixels), width, height)
    }

    /// Create frame filled with a single 8-bit RGBA color
    pub fn solid(width: usize, height: usize, rgba: [u8; 4]) -> Self {
        let mut pixels = vec![0u8; width * height * 4];
        for px in pixels.chunks_mut(4) {
            px.copy_from_slice(&rgba);
        }
        Self {
            buffer: Arc::new(PixelBuffer::U8(pixels)),
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.buffer.format()
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Resident size in bytes (width x height x bytes-per-pixel)
    pub fn byte_size(&self) -> usize {
        self.width * self.height * self.pixel_format().bytes_per_pixel()
    }

    /// 8-bit pixels, if this frame is stored as U8
    pub fn as_rgba8(&self) -> Option<&[u8]> {
        match &*self.buffer {
            PixelBuffer::U8(v) => Some(v),
            _ => None,
        }
    }

    /// True when both handles share the same pixel storage
    pub fn ptr_eq(&self, other: &FrameImage) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_size_by_format() {
        let u8_frame = FrameImage::solid(4, 2, [255, 0, 0, 255]);
        assert_eq!(u8_frame.byte_size(), 4 * 2 * 4);
        assert_eq!(u8_frame.pixel_format(), PixelFormat::Rgba8);

        let f16_frame =
            FrameImage::new(PixelBuffer::F16(vec![F16::from_f32(0.5); 3 * 3 * 4]), 3, 3).unwrap();
        assert_eq!(f16_frame.byte_size(), 3 * 3 * 8);

        let f32_frame = FrameImage::new(PixelBuffer::F32(vec![1.0; 2 * 2 * 4]), 2, 2).unwrap();
        assert_eq!(f32_frame.byte_size(), 2 * 2 * 16);
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        assert!(FrameImage::from_u8_buffer(vec![0u8; 10], 2, 2).is_none());
    }

    #[test]
    fn test_clone_shares_pixels() {
        let frame = FrameImage::solid(8, 8, [0, 100, 0, 255]);
        let clone = frame.clone();
        assert!(frame.ptr_eq(&clone));
        assert_eq!(clone.as_rgba8().unwrap()[..4], [0, 100, 0, 255]);
    }
}
