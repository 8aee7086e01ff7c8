//! Frame sources - anything that can produce the frame image for an index.
//!
//! The player never caches source metadata for long: frame and loop counts
//! are re-read on every access so that progressive sources can grow while
//! they are being played.
//!
//! Built-in variants:
//! - [`StaticSource`]: fixed list of already decoded frames
//! - [`ProgressiveSource`]: frames appended while data arrives
//! - [`CodedAnimation`]: encoded GIF/WebP bytes decoded on demand
//!
//! Custom sources implement [`FrameSource`] directly and are passed to the
//! player as `Arc<dyn FrameSource>`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use enum_dispatch::enum_dispatch;
use image::ImageFormat;
use log::{debug, trace};
use uuid::Uuid;

use super::frame::FrameImage;
use super::stream::{self, AnimationStream};
use crate::error::{PlayerError, Result};

/// Display time used when a source has nothing better to offer
pub const DEFAULT_FRAME_DURATION: Duration = Duration::from_millis(100);

/// Capability interface for frame suppliers.
///
/// `frame()` is called from decode worker threads.
#[enum_dispatch]
pub trait FrameSource: Send + Sync {
    /// Stable identity (registry key for shared players)
    fn uuid(&self) -> Uuid;

    /// Number of frames currently available
    fn frame_count(&self) -> usize;

    /// Loop count, 0 = infinite
    fn loop_count(&self) -> usize;

    /// Decoded frame at index, None if unavailable (yet)
    fn frame(&self, index: usize) -> Option<FrameImage>;

    /// How long frame `index` stays on screen at rate 1.0
    fn frame_duration(&self, _index: usize) -> Duration {
        DEFAULT_FRAME_DURATION
    }
}

/// Built-in source variants (static dispatch)
#[enum_dispatch(FrameSource)]
pub enum FrameSourceKind {
    StaticSource,
    ProgressiveSource,
    CodedAnimation,
}

impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    fn uuid(&self) -> Uuid {
        (**self).uuid()
    }

    fn frame_count(&self) -> usize {
        (**self).frame_count()
    }

    fn loop_count(&self) -> usize {
        (**self).loop_count()
    }

    fn frame(&self, index: usize) -> Option<FrameImage> {
        (**self).frame(index)
    }

    fn frame_duration(&self, index: usize) -> Duration {
        (**self).frame_duration(index)
    }
}

// ============================================================================
// StaticSource
// ============================================================================

/// Fixed list of decoded frames
#[derive(Debug, Clone)]
pub struct StaticSource {
    uuid: Uuid,
    frames: Vec<FrameImage>,
    durations: Vec<Duration>,
    loop_count: usize,
}

impl StaticSource {
    /// All frames share one duration, loops forever
    pub fn new(frames: Vec<FrameImage>, frame_duration: Duration) -> Self {
        let durations = vec![frame_duration; frames.len()];
        Self {
            uuid: Uuid::new_v4(),
            frames,
            durations,
            loop_count: 0,
        }
    }

    /// Per-frame durations; missing entries fall back to the default
    pub fn with_durations(frames: Vec<FrameImage>, mut durations: Vec<Duration>) -> Self {
        durations.resize(frames.len(), DEFAULT_FRAME_DURATION);
        Self {
            uuid: Uuid::new_v4(),
            frames,
            durations,
            loop_count: 0,
        }
    }

    pub fn with_loop_count(mut self, loop_count: usize) -> Self {
        self.loop_count = loop_count;
        self
    }
}

impl FrameSource for StaticSource {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn loop_count(&self) -> usize {
        self.loop_count
    }

    fn frame(&self, index: usize) -> Option<FrameImage> {
        self.frames.get(index).cloned()
    }

    fn frame_duration(&self, index: usize) -> Duration {
        self.durations
            .get(index)
            .copied()
            .unwrap_or(DEFAULT_FRAME_DURATION)
    }
}

// ============================================================================
// ProgressiveSource
// ============================================================================

/// Frames arrive incrementally (e.g. while the file is still downloading).
///
/// `frame_count()` grows with every `push_frame()`; a player built on this
/// source picks the new count up on its next tick.
#[derive(Debug)]
pub struct ProgressiveSource {
    uuid: Uuid,
    frames: RwLock<Vec<(FrameImage, Duration)>>,
    loop_count: usize,
    finished: AtomicBool,
}

impl ProgressiveSource {
    pub fn new(loop_count: usize) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            frames: RwLock::new(Vec::new()),
            loop_count,
            finished: AtomicBool::new(false),
        }
    }

    /// Append next frame. Ignored once the source is finished.
    pub fn push_frame(&self, frame: FrameImage, duration: Duration) {
        if self.is_finished() {
            debug!("ProgressiveSource {}: push after finish ignored", self.uuid);
            return;
        }
        let mut frames = self.frames.write().unwrap_or_else(|e| e.into_inner());
        frames.push((frame, duration));
        trace!("ProgressiveSource {}: {} frames", self.uuid, frames.len());
    }

    /// Mark the data as complete
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

impl FrameSource for ProgressiveSource {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn frame_count(&self) -> usize {
        self.frames.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn loop_count(&self) -> usize {
        self.loop_count
    }

    fn frame(&self, index: usize) -> Option<FrameImage> {
        let frames = self.frames.read().unwrap_or_else(|e| e.into_inner());
        frames.get(index).map(|(frame, _)| frame.clone())
    }

    fn frame_duration(&self, index: usize) -> Duration {
        let frames = self.frames.read().unwrap_or_else(|e| e.into_inner());
        frames
            .get(index)
            .map(|(_, duration)| *duration)
            .unwrap_or(DEFAULT_FRAME_DURATION)
    }
}

// ============================================================================
// CodedAnimation
// ============================================================================

/// Container formats with animation support
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatedFormat {
    Gif,
    WebP,
}

impl AnimatedFormat {
    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Gif => Some(AnimatedFormat::Gif),
            ImageFormat::WebP => Some(AnimatedFormat::WebP),
            _ => None,
        }
    }
}

/// Encoded animation decoded frame-by-frame on demand.
///
/// Only the encoded bytes and per-frame delays stay resident; pixels are
/// produced by `frame()` on a decode worker. GIF/WebP frames depend on their
/// predecessors, so one stream stays open between calls: sequential requests
/// continue it, a request behind its position reopens it.
#[derive(Debug)]
pub struct CodedAnimation {
    uuid: Uuid,
    data: Arc<[u8]>,
    format: AnimatedFormat,
    durations: Vec<Duration>,
    loop_count: usize,
    stream: Mutex<Option<AnimationStream>>,
}

impl CodedAnimation {
    /// Scan the stream once for frame count, delays and loop count.
    ///
    /// Delays shorter than `min_duration` are replaced with
    /// `fallback_duration` (many GIFs declare 0 ms and expect browser timing).
    pub fn new(
        data: Arc<[u8]>,
        format: AnimatedFormat,
        min_duration: Duration,
        fallback_duration: Duration,
    ) -> Result<Self> {
        let info = stream::scan(&data, format)?;
        if info.delays.is_empty() {
            return Err(PlayerError::NoFrames);
        }
        let durations: Vec<Duration> = info
            .delays
            .into_iter()
            .map(|delay| {
                if delay < min_duration {
                    fallback_duration
                } else {
                    delay
                }
            })
            .collect();

        debug!(
            "CodedAnimation: {:?}, {} frames, loops {}, {} bytes",
            format,
            durations.len(),
            info.loop_count,
            data.len()
        );

        Ok(Self {
            uuid: Uuid::new_v4(),
            data,
            format,
            durations,
            loop_count: info.loop_count,
            stream: Mutex::new(None),
        })
    }

    /// Override the loop count stored in the file (0 = infinite)
    pub fn with_loop_count(mut self, loop_count: usize) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn format(&self) -> AnimatedFormat {
        self.format
    }

    /// Position of the open stream (next index it yields), None if closed
    pub fn stream_position(&self) -> Option<usize> {
        self.stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(AnimationStream::position)
    }
}

impl FrameSource for CodedAnimation {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn frame_count(&self) -> usize {
        self.durations.len()
    }

    fn loop_count(&self) -> usize {
        self.loop_count
    }

    fn frame(&self, index: usize) -> Option<FrameImage> {
        if index >= self.durations.len() {
            return None;
        }

        let mut slot = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_none_or(|s| s.position() > index) {
            trace!("CodedAnimation {}: opening stream for frame {}", self.uuid, index);
            match AnimationStream::open(Arc::clone(&self.data), self.format) {
                Ok(stream) => *slot = Some(stream),
                Err(e) => {
                    debug!("CodedAnimation {}: reopen failed: {}", self.uuid, e);
                    return None;
                }
            }
        }
        let stream = slot.as_mut()?;

        match stream.frame_at(index) {
            Ok(Some(frame)) => FrameImage::from_u8_buffer(frame.rgba, frame.width, frame.height),
            Ok(None) => {
                debug!("CodedAnimation {}: stream ended before frame {}", self.uuid, index);
                *slot = None;
                None
            }
            Err(e) => {
                debug!("CodedAnimation {}: frame {} failed: {}", self.uuid, index, e);
                *slot = None;
                None
            }
        }
    }

    fn frame_duration(&self, index: usize) -> Duration {
        self.durations
            .get(index)
            .copied()
            .unwrap_or(DEFAULT_FRAME_DURATION)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// N solid 2x2 frames, each with a distinct red channel value
    pub(crate) fn numbered_frames(count: usize) -> Vec<FrameImage> {
        (0..count)
            .map(|i| FrameImage::solid(2, 2, [i as u8, 0, 0, 255]))
            .collect()
    }

    #[test]
    fn test_static_source_counts_and_durations() {
        let source = StaticSource::with_durations(
            numbered_frames(3),
            vec![Duration::from_millis(40), Duration::from_millis(80)],
        )
        .with_loop_count(2);

        assert_eq!(source.frame_count(), 3);
        assert_eq!(source.loop_count(), 2);
        assert_eq!(source.frame_duration(0), Duration::from_millis(40));
        assert_eq!(source.frame_duration(1), Duration::from_millis(80));
        assert_eq!(source.frame_duration(2), DEFAULT_FRAME_DURATION);
        assert_eq!(source.frame(1).unwrap().as_rgba8().unwrap()[0], 1);
        assert!(source.frame(3).is_none());
    }

    #[test]
    fn test_progressive_source_grows() {
        let source = ProgressiveSource::new(0);
        assert_eq!(source.frame_count(), 0);

        source.push_frame(FrameImage::solid(1, 1, [1, 2, 3, 4]), Duration::from_millis(50));
        source.push_frame(FrameImage::solid(1, 1, [5, 6, 7, 8]), Duration::from_millis(60));
        assert_eq!(source.frame_count(), 2);
        assert_eq!(source.frame_duration(1), Duration::from_millis(60));

        source.finish();
        source.push_frame(FrameImage::solid(1, 1, [0, 0, 0, 0]), Duration::from_millis(10));
        assert_eq!(source.frame_count(), 2);
    }

    #[test]
    fn test_kind_dispatches_to_variant() {
        let kind: FrameSourceKind = StaticSource::new(numbered_frames(4), DEFAULT_FRAME_DURATION).into();
        assert_eq!(kind.frame_count(), 4);
        assert!(kind.frame(2).is_some());
    }

    fn gif_bytes(frames: usize) -> Arc<[u8]> {
        use image::codecs::gif::{GifEncoder, Repeat};
        use image::{Delay, Frame, Rgba, RgbaImage};

        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            encoder.set_repeat(Repeat::Finite(3)).unwrap();
            let frames = (0..frames).map(|i| {
                let img = RgbaImage::from_pixel(2, 2, Rgba([(i * 40) as u8, 0, 0, 255]));
                Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(40, 1))
            });
            encoder.encode_frames(frames).unwrap();
        }
        Arc::from(bytes)
    }

    #[test]
    fn test_coded_animation_continues_stream() {
        let animation = CodedAnimation::new(
            gif_bytes(5),
            AnimatedFormat::Gif,
            Duration::from_millis(20),
            DEFAULT_FRAME_DURATION,
        )
        .unwrap();
        assert_eq!(animation.loop_count(), 3);
        assert_eq!(animation.stream_position(), None);

        for index in 0..5 {
            let frame = animation.frame(index).unwrap();
            assert_eq!(frame.as_rgba8().unwrap()[0], (index * 40) as u8);
            assert_eq!(animation.stream_position(), Some(index + 1));
        }

        // Going back reopens from the start
        assert_eq!(animation.frame(1).unwrap().as_rgba8().unwrap()[0], 40);
        assert_eq!(animation.stream_position(), Some(2));
        assert!(animation.frame(5).is_none());
    }

    #[test]
    fn test_coded_animation_rejects_garbage() {
        let data: Arc<[u8]> = Arc::from(&b"definitely not a gif"[..]);
        let result = CodedAnimation::new(
            data,
            AnimatedFormat::Gif,
            Duration::from_millis(20),
            DEFAULT_FRAME_DURATION,
        );
        assert!(matches!(result, Err(PlayerError::Decode(_))));
    }
}
