//! ANIMPLAY - Animated image playback engine
//!
//! Re-exports all modules for use by the binary target.

// Core engine (buffer, player, coordinator, registry, workers)
pub mod core;

pub mod cli;
pub mod coders;
pub mod config;
pub mod entities;
pub mod error;
pub mod paths;

// Re-export commonly used types from core
pub use core::coordinator::{Coordinator, SyncPolicy};
pub use core::player::{AnimatedPlayer, PlayerContext};
pub use core::playback::{PlaybackMode, PlaybackStatus};
pub use core::registry::Registry;

// Re-export entities
pub use coders::{CoderChain, ImageCoder, ImageCrateCoder};
pub use config::PlayerSettings;
pub use entities::{FrameImage, FrameSource, ProgressiveSource, StaticSource};
pub use error::{PlayerError, Result};
