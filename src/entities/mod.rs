//! Entities - frame images, frame sources and the abstract traits the
//! engine consumes.

pub mod frame;
pub mod source;
pub mod stream;
pub mod traits;

pub use frame::{FrameImage, PixelBuffer, PixelFormat};
pub use source::{
    AnimatedFormat, CodedAnimation, DEFAULT_FRAME_DURATION, FrameSource, FrameSourceKind,
    ProgressiveSource, StaticSource,
};
pub use traits::{Job, WorkerPool};
