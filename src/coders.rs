//! Decoder chain: turn encoded bytes into frames or a frame source
//!
//! Coders are asked most-recently-added first, so an application can put its
//! own coder in front of the built-in one. The first coder that accepts the
//! data and succeeds wins; a failing coder hands over to the next.
//!
//! The built-in [`ImageCrateCoder`] covers PNG/JPEG stills via the `image`
//! crate and animated GIF/WebP through streaming `gif`/`image-webp` readers,
//! including the loop count stored in the file.

use log::{debug, trace};
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::config::PlayerSettings;
use crate::entities::{
    AnimatedFormat, CodedAnimation, DEFAULT_FRAME_DURATION, FrameImage, FrameSource, StaticSource,
};
use crate::error::{PlayerError, Result};

static SHARED: Lazy<Arc<CoderChain>> = Lazy::new(|| Arc::new(CoderChain::with_defaults()));

/// One image decoder
pub trait ImageCoder: Send + Sync {
    /// Unique name, used by `CoderChain::remove_coder`
    fn name(&self) -> &str;

    /// Cheap sniff of the header bytes
    fn can_decode(&self, data: &[u8]) -> bool;

    /// Decode the first (or only) frame
    fn decode(&self, data: &[u8]) -> Result<FrameImage>;

    /// Decode what has arrived so far.
    ///
    /// Ok(None) means "not enough data yet"; once `finished` is true a
    /// failure is a real error.
    fn incremental_decode(&self, data: &[u8], finished: bool) -> Result<Option<FrameImage>> {
        match self.decode(data) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) if !finished => {
                trace!("{}: partial data not decodable yet: {}", self.name(), e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Multi-frame source for animated data, None for stills
    fn animated_source(&self, _data: Arc<[u8]>) -> Result<Option<Arc<dyn FrameSource>>> {
        Ok(None)
    }
}

/// `image` crate backed coder
#[derive(Debug, Clone, Copy)]
pub struct ImageCrateCoder {
    /// Coded delays below this use `fallback_duration`
    min_frame_duration: Duration,
    fallback_duration: Duration,
}

impl Default for ImageCrateCoder {
    fn default() -> Self {
        Self::from_settings(&PlayerSettings::default())
    }
}

impl ImageCrateCoder {
    pub fn from_settings(settings: &PlayerSettings) -> Self {
        Self {
            min_frame_duration: settings.min_frame_duration(),
            fallback_duration: settings.default_frame_duration(),
        }
    }

    fn format_of(data: &[u8]) -> Option<image::ImageFormat> {
        image::guess_format(data).ok()
    }
}

impl ImageCoder for ImageCrateCoder {
    fn name(&self) -> &str {
        "image"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        use image::ImageFormat::*;
        matches!(Self::format_of(data), Some(Png | Jpeg | Gif | WebP))
    }

    fn decode(&self, data: &[u8]) -> Result<FrameImage> {
        let rgba = image::load_from_memory(data)?.to_rgba8();
        let (width, height) = (rgba.width() as usize, rgba.height() as usize);
        FrameImage::from_u8_buffer(rgba.into_raw(), width, height)
            .ok_or_else(|| PlayerError::Decode(format!("bad pixel buffer {}x{}", width, height)))
    }

    fn animated_source(&self, data: Arc<[u8]>) -> Result<Option<Arc<dyn FrameSource>>> {
        let Some(format) = Self::format_of(&data).and_then(AnimatedFormat::from_image_format) else {
            return Ok(None);
        };
        let animation = CodedAnimation::new(data, format, self.min_frame_duration, self.fallback_duration)?;
        if animation.frame_count() < 2 {
            // Single-frame GIF/WebP: treat as a still
            return Ok(None);
        }
        Ok(Some(Arc::new(animation)))
    }
}

/// Ordered set of coders
pub struct CoderChain {
    coders: RwLock<Vec<Arc<dyn ImageCoder>>>,
}

impl Default for CoderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl CoderChain {
    /// Empty chain
    pub fn new() -> Self {
        Self {
            coders: RwLock::new(Vec::new()),
        }
    }

    /// Chain holding the built-in coder
    pub fn with_defaults() -> Self {
        let chain = Self::new();
        chain.add_coder(Arc::new(ImageCrateCoder::default()));
        chain
    }

    /// Process-wide chain with the built-in coder
    pub fn shared() -> Arc<CoderChain> {
        Arc::clone(&SHARED)
    }

    /// Add a coder; it is consulted before every coder added earlier
    pub fn add_coder(&self, coder: Arc<dyn ImageCoder>) {
        debug!("Coder '{}' added", coder.name());
        self.coders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(coder);
    }

    /// Remove every coder named `name`. Returns false if none matched.
    pub fn remove_coder(&self, name: &str) -> bool {
        let mut coders = self.coders.write().unwrap_or_else(|e| e.into_inner());
        let before = coders.len();
        coders.retain(|c| c.name() != name);
        before != coders.len()
    }

    /// Coders in consultation order (most recently added first)
    pub fn coders(&self) -> Vec<Arc<dyn ImageCoder>> {
        let coders = self.coders.read().unwrap_or_else(|e| e.into_inner());
        coders.iter().rev().cloned().collect()
    }

    fn candidates(&self, data: &[u8]) -> Vec<Arc<dyn ImageCoder>> {
        self.coders()
            .into_iter()
            .filter(|c| c.can_decode(data))
            .collect()
    }

    pub fn can_decode(&self, data: &[u8]) -> bool {
        !self.candidates(data).is_empty()
    }

    /// First frame from the first coder that succeeds
    pub fn decode(&self, data: &[u8]) -> Result<FrameImage> {
        let mut last_err = None;
        for coder in self.candidates(data) {
            match coder.decode(data) {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    debug!("Coder '{}' failed: {}", coder.name(), e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(no_coder))
    }

    /// Progressive decode of partial data
    pub fn incremental_decode(&self, data: &[u8], finished: bool) -> Result<Option<FrameImage>> {
        let candidates = self.candidates(data);
        if candidates.is_empty() {
            // Header may not be complete yet
            return if finished { Err(no_coder()) } else { Ok(None) };
        }

        let mut last_err = None;
        for coder in candidates {
            match coder.incremental_decode(data, finished) {
                Ok(Some(frame)) => return Ok(Some(frame)),
                Ok(None) => {}
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) if finished => Err(e),
            _ => Ok(None),
        }
    }

    /// Frame source for encoded bytes: animated when a coder offers one,
    /// otherwise a single still frame.
    pub fn frame_source(&self, data: Arc<[u8]>) -> Result<Arc<dyn FrameSource>> {
        let mut last_err = None;
        for coder in self.candidates(&data) {
            match coder.animated_source(Arc::clone(&data)) {
                Ok(Some(source)) => {
                    debug!(
                        "Coder '{}': animated source, {} frames",
                        coder.name(),
                        source.frame_count()
                    );
                    return Ok(source);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("Coder '{}' animation failed: {}", coder.name(), e);
                    last_err = Some(e);
                    continue;
                }
            }
            match coder.decode(&data) {
                Ok(frame) => {
                    return Ok(Arc::new(StaticSource::new(vec![frame], DEFAULT_FRAME_DURATION)));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(no_coder))
    }
}

fn no_coder() -> PlayerError {
    PlayerError::Decode("no coder accepts this data".to_string())
}
