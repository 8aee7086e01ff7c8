//! Playback modes and frame traversal.
//!
//! `next_position()` is the pure step function behind every tick: given the
//! current index, mode and travel direction it returns the next index and
//! whether a loop was completed.

use serde::{Deserialize, Serialize};

use super::frame_buffer::Direction;

/// Frame traversal pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackMode {
    /// First to last, then wrap
    #[default]
    Normal,
    /// Last to first, then wrap
    Reverse,
    /// First to last and back again
    Bounce,
    /// Last to first and back again
    ReversedBounce,
}

impl PlaybackMode {
    /// Index playback starts from
    pub fn start_index(self, total_frames: usize) -> usize {
        match self {
            PlaybackMode::Normal | PlaybackMode::Bounce => 0,
            PlaybackMode::Reverse | PlaybackMode::ReversedBounce => total_frames.saturating_sub(1),
        }
    }

    /// Initial travel direction
    pub fn start_direction(self) -> Direction {
        match self {
            PlaybackMode::Normal | PlaybackMode::Bounce => Direction::Forward,
            PlaybackMode::Reverse | PlaybackMode::ReversedBounce => Direction::Backward,
        }
    }
}

impl std::str::FromStr for PlaybackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "normal" => Ok(PlaybackMode::Normal),
            "reverse" => Ok(PlaybackMode::Reverse),
            "bounce" => Ok(PlaybackMode::Bounce),
            "reversedbounce" => Ok(PlaybackMode::ReversedBounce),
            other => Err(format!("unknown playback mode: {}", other)),
        }
    }
}

/// Player state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Result of one traversal step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub direction: Direction,
    /// True if this step completed a loop
    pub wrapped: bool,
}

/// Next frame for `mode`, starting at `index` travelling in `direction`.
///
/// An index past the end (frame count lowered mid-playback) is treated as
/// the last frame. Bounce modes flip direction at either end and complete a
/// loop when they arrive back at their starting end.
pub fn next_position(index: usize, total: usize, mode: PlaybackMode, direction: Direction) -> Step {
    if total <= 1 {
        return Step {
            index: 0,
            direction,
            wrapped: true,
        };
    }

    let last = total - 1;
    let index = index.min(last);

    match mode {
        PlaybackMode::Normal => {
            if index >= last {
                Step { index: 0, direction: Direction::Forward, wrapped: true }
            } else {
                Step { index: index + 1, direction: Direction::Forward, wrapped: false }
            }
        }
        PlaybackMode::Reverse => {
            if index == 0 {
                Step { index: last, direction: Direction::Backward, wrapped: true }
            } else {
                Step { index: index - 1, direction: Direction::Backward, wrapped: false }
            }
        }
        PlaybackMode::Bounce | PlaybackMode::ReversedBounce => {
            // Turn around at the ends
            let direction = match direction {
                Direction::Forward if index >= last => Direction::Backward,
                Direction::Backward if index == 0 => Direction::Forward,
                d => d,
            };
            let next = match direction {
                Direction::Forward => index + 1,
                Direction::Backward => index - 1,
            };
            let home = mode.start_index(total);
            let wrapped = next == home;
            Step { index: next, direction, wrapped }
        }
    }
}
