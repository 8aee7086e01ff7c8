//! Core engine modules - buffer, player, coordination, workers
//!
//! These modules form the playback engine, independent of any UI.

pub mod cache_man;
pub mod clock;
pub mod coordinator;
pub mod event_bus;
pub mod frame_buffer;
pub mod playback;
pub mod player;
pub mod registry;
pub mod workers;

// Re-exports for convenience
pub use cache_man::{AutoBufferPolicy, UNBOUNDED};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use coordinator::{Coordinator, SyncPolicy};
pub use event_bus::{EventBus, FrameChanged, HandlerId, LoopChanged};
pub use frame_buffer::{BufferStats, Direction, FrameBuffer};
pub use playback::{PlaybackMode, PlaybackStatus};
pub use player::{AnimatedPlayer, PlayerContext};
pub use registry::Registry;
pub use workers::{InlinePool, Workers};
