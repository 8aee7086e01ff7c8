//! Sequential GIF/WebP readers producing full RGBA canvases.
//!
//! Frames of both containers are drawn over their predecessors, so a reader
//! can only move forward. [`CodedAnimation`](super::CodedAnimation) keeps one
//! reader open between decodes: playing forward continues the stream, only a
//! backward jump reopens it.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use gif::{DisposalMethod, Repeat};
use image_webp::{LoopCount, WebPDecoder};

use super::source::AnimatedFormat;
use crate::error::{PlayerError, Result};

type Bytes = Cursor<Arc<[u8]>>;

/// Container metadata: per-frame delays and loop count (0 = infinite)
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub delays: Vec<Duration>,
    pub loop_count: usize,
}

/// Read delays and loop count without keeping any pixels.
///
/// A GIF without a NETSCAPE2.0 block plays once. A still WebP reports a
/// single frame.
pub fn scan(data: &Arc<[u8]>, format: AnimatedFormat) -> Result<StreamInfo> {
    match format {
        AnimatedFormat::Gif => {
            let mut options = gif::DecodeOptions::new();
            options.skip_frame_decoding(true);
            let mut reader = options.read_info(Cursor::new(Arc::clone(data)))?;
            let mut delays = Vec::new();
            while let Some(frame) = reader.read_next_frame()? {
                delays.push(gif_delay(frame.delay));
            }
            let loop_count = match reader.repeat() {
                Repeat::Infinite => 0,
                Repeat::Finite(0) => 1,
                Repeat::Finite(n) => usize::from(n),
            };
            Ok(StreamInfo { delays, loop_count })
        }
        AnimatedFormat::WebP => {
            let decoder = WebPDecoder::new(Cursor::new(Arc::clone(data)))?;
            if !decoder.is_animated() {
                return Ok(StreamInfo {
                    delays: vec![Duration::ZERO],
                    loop_count: 1,
                });
            }
            let loop_count = match decoder.loop_count() {
                LoopCount::Forever => 0,
                LoopCount::Times(n) => usize::from(n.get()),
            };
            let mut stream = WebPStream::from_decoder(decoder)?;
            let mut delays = Vec::new();
            while let Some(frame) = stream.next_frame()? {
                delays.push(frame.delay);
            }
            Ok(StreamInfo { delays, loop_count })
        }
    }
}

fn gif_delay(centis: u16) -> Duration {
    Duration::from_millis(u64::from(centis) * 10)
}

/// One composited frame
#[derive(Debug, Clone)]
pub struct StreamFrame {
    pub rgba: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub delay: Duration,
}

/// Forward-only frame reader
pub enum AnimationStream {
    Gif(GifStream),
    WebP(WebPStream),
}

impl AnimationStream {
    pub fn open(data: Arc<[u8]>, format: AnimatedFormat) -> Result<Self> {
        Ok(match format {
            AnimatedFormat::Gif => AnimationStream::Gif(GifStream::open(data)?),
            AnimatedFormat::WebP => AnimationStream::WebP(WebPStream::open(data)?),
        })
    }

    /// Index of the frame the next `next_frame()` returns
    pub fn position(&self) -> usize {
        match self {
            AnimationStream::Gif(s) => s.position,
            AnimationStream::WebP(s) => s.position,
        }
    }

    /// Next frame, None at the end of the stream
    pub fn next_frame(&mut self) -> Result<Option<StreamFrame>> {
        match self {
            AnimationStream::Gif(s) => s.next_frame(),
            AnimationStream::WebP(s) => s.next_frame(),
        }
    }

    /// Skip forward to `index` and decode it
    pub fn frame_at(&mut self, index: usize) -> Result<Option<StreamFrame>> {
        while self.position() < index {
            if self.next_frame()?.is_none() {
                return Ok(None);
            }
        }
        self.next_frame()
    }
}

impl std::fmt::Debug for AnimationStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationStream")
            .field("position", &self.position())
            .finish()
    }
}

// ============================================================================
// GIF
// ============================================================================

/// Clipped frame rectangle on the logical screen
#[derive(Debug, Clone, Copy)]
struct Rect {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
}

/// What to do with the canvas before the next frame is drawn
struct Disposal {
    method: DisposalMethod,
    rect: Rect,
    /// Canvas before the frame, for `DisposalMethod::Previous`
    previous: Option<Vec<u8>>,
}

pub struct GifStream {
    reader: gif::Decoder<Bytes>,
    width: usize,
    height: usize,
    canvas: Vec<u8>,
    disposal: Option<Disposal>,
    position: usize,
}

impl GifStream {
    fn open(data: Arc<[u8]>) -> Result<Self> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let reader = options.read_info(Cursor::new(data))?;
        let (width, height) = (usize::from(reader.width()), usize::from(reader.height()));
        Ok(Self {
            reader,
            width,
            height,
            canvas: vec![0; width * height * 4],
            disposal: None,
            position: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<StreamFrame>> {
        if let Some(disposal) = self.disposal.take() {
            self.dispose(disposal);
        }

        let Some(frame) = self.reader.read_next_frame()? else {
            return Ok(None);
        };

        let left = usize::from(frame.left).min(self.width);
        let top = usize::from(frame.top).min(self.height);
        let rect = Rect {
            left,
            top,
            width: usize::from(frame.width).min(self.width - left),
            height: usize::from(frame.height).min(self.height - top),
        };
        let previous = (frame.dispose == DisposalMethod::Previous).then(|| self.canvas.clone());

        // Transparent pixels keep what is underneath
        let stride = usize::from(frame.width) * 4;
        for y in 0..rect.height {
            for x in 0..rect.width {
                let src = y * stride + x * 4;
                let Some(pixel) = frame.buffer.get(src..src + 4) else {
                    continue;
                };
                if pixel[3] == 0 {
                    continue;
                }
                let dst = ((rect.top + y) * self.width + rect.left + x) * 4;
                self.canvas[dst..dst + 4].copy_from_slice(pixel);
            }
        }

        let delay = gif_delay(frame.delay);
        self.disposal = Some(Disposal {
            method: frame.dispose,
            rect,
            previous,
        });
        self.position += 1;

        Ok(Some(StreamFrame {
            rgba: self.canvas.clone(),
            width: self.width,
            height: self.height,
            delay,
        }))
    }

    fn dispose(&mut self, disposal: Disposal) {
        match disposal.method {
            DisposalMethod::Background => {
                let rect = disposal.rect;
                for y in rect.top..rect.top + rect.height {
                    let start = (y * self.width + rect.left) * 4;
                    self.canvas[start..start + rect.width * 4].fill(0);
                }
            }
            DisposalMethod::Previous => {
                if let Some(previous) = disposal.previous {
                    self.canvas = previous;
                }
            }
            DisposalMethod::Any | DisposalMethod::Keep => {}
        }
    }
}

// ============================================================================
// WebP
// ============================================================================

pub struct WebPStream {
    decoder: WebPDecoder<Bytes>,
    width: usize,
    height: usize,
    scratch: Vec<u8>,
    position: usize,
}

impl WebPStream {
    fn open(data: Arc<[u8]>) -> Result<Self> {
        Self::from_decoder(WebPDecoder::new(Cursor::new(data))?)
    }

    fn from_decoder(decoder: WebPDecoder<Bytes>) -> Result<Self> {
        if !decoder.is_animated() {
            return Err(PlayerError::Decode("WebP is not animated".to_string()));
        }
        let size = decoder
            .output_buffer_size()
            .ok_or_else(|| PlayerError::Decode("WebP canvas too large".to_string()))?;
        let (width, height) = decoder.dimensions();
        Ok(Self {
            decoder,
            width: width as usize,
            height: height as usize,
            scratch: vec![0; size],
            position: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<StreamFrame>> {
        let millis = match self.decoder.read_frame(&mut self.scratch) {
            Ok(millis) => millis,
            Err(image_webp::DecodingError::NoMoreFrames) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.position += 1;

        let rgba = if self.decoder.has_alpha() {
            self.scratch.clone()
        } else {
            self.scratch
                .chunks_exact(3)
                .flat_map(|rgb| [rgb[0], rgb[1], rgb[2], 255])
                .collect()
        };
        Ok(Some(StreamFrame {
            rgba,
            width: self.width,
            height: self.height,
            delay: Duration::from_millis(u64::from(millis)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::{GifEncoder, Repeat as EncoderRepeat};
    use image::{Delay, Frame, Rgba, RgbaImage};

    fn gif(repeat: Option<EncoderRepeat>, frames: usize) -> Arc<[u8]> {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            if let Some(repeat) = repeat {
                encoder.set_repeat(repeat).unwrap();
            }
            let frames = (0..frames).map(|i| {
                let img = RgbaImage::from_pixel(3, 2, Rgba([(i * 50) as u8, 0, 0, 255]));
                Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(30, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        Arc::from(bytes)
    }

    #[test]
    fn test_scan_reads_repeat_count() {
        let finite = scan(&gif(Some(EncoderRepeat::Finite(2)), 3), AnimatedFormat::Gif).unwrap();
        assert_eq!(finite.loop_count, 2);
        assert_eq!(finite.delays, vec![Duration::from_millis(30); 3]);

        let forever = scan(&gif(Some(EncoderRepeat::Infinite), 2), AnimatedFormat::Gif).unwrap();
        assert_eq!(forever.loop_count, 0);

        let once = scan(&gif(None, 2), AnimatedFormat::Gif).unwrap();
        assert_eq!(once.loop_count, 1);
    }

    #[test]
    fn test_stream_moves_forward() {
        let mut stream = AnimationStream::open(gif(None, 4), AnimatedFormat::Gif).unwrap();
        assert_eq!(stream.position(), 0);

        let third = stream.frame_at(2).unwrap().unwrap();
        assert_eq!((third.width, third.height), (3, 2));
        assert_eq!(third.rgba[0], 100);
        assert_eq!(stream.position(), 3);

        let fourth = stream.next_frame().unwrap().unwrap();
        assert_eq!(fourth.rgba[0], 150);
        assert!(stream.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        let data: Arc<[u8]> = Arc::from(&b"definitely not a gif"[..]);
        assert!(scan(&data, AnimatedFormat::Gif).is_err());
        assert!(AnimationStream::open(Arc::from(&b"RIFF"[..]), AnimatedFormat::WebP).is_err());
    }
}
