//! Library error type.
//!
//! Only conditions a caller can act on are errors. Decode misses (frame not
//! decoded yet) and stale decode deliveries are steady-state events and are
//! never surfaced here.

use thiserror::Error;

/// Errors returned by player construction, seeking and source setup.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Frame source reported fewer than one frame.
    #[error("frame source has no frames")]
    NoFrames,

    /// Seek target outside the current frame/loop bounds.
    #[error(
        "invalid seek to frame {index} loop {loop_count} (frames: {total_frames}, loops: {total_loops})"
    )]
    InvalidSeek {
        index: usize,
        loop_count: usize,
        total_frames: usize,
        total_loops: usize,
    },

    /// No coder in the chain could turn the bytes into a frame source.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("settings error: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for PlayerError {
    fn from(e: image::ImageError) -> Self {
        PlayerError::Decode(e.to_string())
    }
}

impl From<gif::DecodingError> for PlayerError {
    fn from(e: gif::DecodingError) -> Self {
        PlayerError::Decode(format!("gif: {}", e))
    }
}

impl From<image_webp::DecodingError> for PlayerError {
    fn from(e: image_webp::DecodingError) -> Self {
        PlayerError::Decode(format!("webp: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
