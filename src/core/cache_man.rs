//! Frame buffer budget: byte limit, resident-byte tracking and generation counter
//!
//! **Why**: Software-decoded formats (animated WebP, big GIFs) can be expensive
//! per frame, while decoded frames are large. The budget decides how much of
//! that trade-off a single player makes:
//! - `0`: automatic, derived from current system memory and frame size
//! - `1`: keep only the frame on screen (lowest memory, highest CPU)
//! - `UNBOUNDED`: keep every decoded frame (lowest CPU, highest memory)
//! - anything else: byte ceiling
//!
//! Automatic budgets split the memory share between them and are recomputed
//! every [`AUTO_REFRESH_INSERTS`] inserts, or as soon as a larger frame shows
//! up, so they follow memory pressure while playing.
//!
//! The generation counter is bumped by `FrameBuffer::clear()` so decodes that
//! were started before the clear are recognized as stale.
//!
//! **Used by**: FrameBuffer

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

/// Cache every decoded frame
pub const UNBOUNDED: usize = usize::MAX;

/// Inserts between automatic limit refreshes
pub const AUTO_REFRESH_INSERTS: u64 = 32;

/// Budgets currently in automatic mode
static AUTO_BUDGETS: AtomicUsize = AtomicUsize::new(0);

/// Automatic budget factors (fractions of system memory)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoBufferPolicy {
    /// Fraction of total physical memory
    pub total_fraction: f64,
    /// Fraction of currently available memory
    pub available_fraction: f64,
}

impl Default for AutoBufferPolicy {
    fn default() -> Self {
        Self {
            total_fraction: 0.2,
            available_fraction: 0.6,
        }
    }
}

impl AutoBufferPolicy {
    /// Byte limit for given memory figures.
    ///
    /// The share `min(total * tf, available * af)` is split evenly between
    /// `sharers` automatic budgets, then rounded down to whole frames of
    /// `frame_bytes`, never below one frame. `frame_bytes == 0` (size not
    /// known yet) skips the rounding.
    pub fn limit_for(&self, total: u64, available: u64, frame_bytes: usize, sharers: usize) -> usize {
        let by_total = total as f64 * self.total_fraction.clamp(0.0, 1.0);
        let by_available = available as f64 * self.available_fraction.clamp(0.0, 1.0);
        let share = by_total.min(by_available) / sharers.max(1) as f64;
        if frame_bytes == 0 {
            return share as usize;
        }
        let frames = ((share / frame_bytes as f64) as usize).max(1);
        frames.saturating_mul(frame_bytes)
    }

    /// Limit from the live system memory state
    pub fn system_limit(&self, frame_bytes: usize, sharers: usize) -> usize {
        let mut sys = System::new();
        sys.refresh_memory();
        self.limit_for(sys.total_memory(), sys.available_memory(), frame_bytes, sharers)
    }
}

/// Byte budget and bookkeeping shared by a frame buffer and its decode jobs
#[derive(Debug)]
pub struct BufferBudget {
    /// Requested size (0 = auto, UNBOUNDED = all)
    max_buffer_size: AtomicUsize,
    /// Limit computed for auto mode
    auto_limit: AtomicUsize,
    /// Atomically tracked resident bytes
    resident: AtomicUsize,
    /// Largest frame inserted so far
    frame_bytes: AtomicUsize,
    inserts: AtomicU64,
    /// Generation counter for discarding stale decodes
    generation: Arc<AtomicU64>,
    policy: AutoBufferPolicy,
}

impl BufferBudget {
    pub fn new(max_buffer_size: usize, policy: AutoBufferPolicy) -> Self {
        let budget = Self {
            max_buffer_size: AtomicUsize::new(max_buffer_size),
            auto_limit: AtomicUsize::new(0),
            resident: AtomicUsize::new(0),
            frame_bytes: AtomicUsize::new(0),
            inserts: AtomicU64::new(0),
            generation: Arc::new(AtomicU64::new(0)),
            policy,
        };
        if max_buffer_size == 0 {
            AUTO_BUDGETS.fetch_add(1, Ordering::Relaxed);
            budget.refresh_auto_limit();
        }
        budget
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size.load(Ordering::Relaxed)
    }

    pub fn set_max_buffer_size(&self, bytes: usize) {
        let old = self.max_buffer_size.swap(bytes, Ordering::Relaxed);
        if old != bytes {
            debug!("Max buffer size: {} -> {}", describe(old), describe(bytes));
            match (old, bytes) {
                (0, _) => {
                    AUTO_BUDGETS.fetch_sub(1, Ordering::Relaxed);
                }
                (_, 0) => {
                    AUTO_BUDGETS.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            }
        }
        if bytes == 0 {
            self.refresh_auto_limit();
        }
    }

    /// Recompute the automatic limit from memory pressure, frame size and
    /// the number of automatic budgets alive
    pub fn refresh_auto_limit(&self) -> usize {
        let frame_bytes = self.frame_bytes.load(Ordering::Relaxed);
        let sharers = AUTO_BUDGETS.load(Ordering::Relaxed);
        let limit = self.policy.system_limit(frame_bytes, sharers);
        let old = self.auto_limit.swap(limit, Ordering::Relaxed);
        if old != limit {
            debug!(
                "Auto buffer limit: {} MB ({} bytes/frame, {} sharers)",
                limit / 1024 / 1024,
                frame_bytes,
                sharers
            );
        }
        limit
    }

    /// Record an inserted frame; refreshes the automatic limit when due
    pub fn note_insert(&self, byte_size: usize) {
        let largest = self.frame_bytes.fetch_max(byte_size, Ordering::Relaxed);
        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if self.max_buffer_size() == 0
            && (byte_size > largest || inserts % AUTO_REFRESH_INSERTS == 0)
        {
            self.refresh_auto_limit();
        }
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes.load(Ordering::Relaxed)
    }

    /// Effective byte limit, None = unbounded
    pub fn limit(&self) -> Option<usize> {
        match self.max_buffer_size() {
            UNBOUNDED => None,
            0 => Some(self.auto_limit.load(Ordering::Relaxed)),
            bytes => Some(bytes),
        }
    }

    /// True if `resident` bytes exceed the limit
    pub fn exceeds(&self, resident: usize) -> bool {
        self.limit().is_some_and(|limit| resident > limit)
    }

    // === Resident tracking ===

    pub fn add_memory(&self, bytes: usize) {
        self.resident.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Saturating subtraction to prevent underflow
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .resident
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::Relaxed)
    }

    // === Generation ===

    /// Increment generation and return new value
    pub fn increment_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Buffer generation incremented: {}", generation);
        generation
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Shared generation counter (for epoch-checked worker jobs)
    pub fn generation_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.generation)
    }
}

impl Drop for BufferBudget {
    fn drop(&mut self) {
        if self.max_buffer_size() == 0 {
            AUTO_BUDGETS.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

fn describe(bytes: usize) -> String {
    match bytes {
        0 => "auto".to_string(),
        UNBOUNDED => "unbounded".to_string(),
        n => format!("{} bytes", n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_policy_takes_smaller_bound() {
        let policy = AutoBufferPolicy::default();
        // total-bound: 1000 * 0.2 = 200, available-bound: 100 * 0.6 = 60
        assert_eq!(policy.limit_for(1000, 100, 0, 1), 60);
        // total-bound wins when plenty is free
        assert_eq!(policy.limit_for(1000, 1000, 0, 1), 200);
    }

    #[test]
    fn test_auto_limit_follows_frame_size() {
        let policy = AutoBufferPolicy::default();
        // Share of 200 bytes: three 64-byte frames
        assert_eq!(policy.limit_for(1000, 1000, 64, 1), 192);
        assert_eq!(policy.limit_for(1000, 1000, 50, 1), 200);
        // Frames bigger than the share still get one slot
        assert_eq!(policy.limit_for(1000, 1000, 300, 1), 300);
        // Memory pressure shrinks the frame count
        assert_eq!(policy.limit_for(1000, 120, 64, 1), 64);
    }

    #[test]
    fn test_auto_share_is_split() {
        let policy = AutoBufferPolicy::default();
        assert_eq!(policy.limit_for(1000, 1000, 0, 4), 50);
        assert_eq!(policy.limit_for(1000, 1000, 20, 4), 40);
        assert_eq!(policy.limit_for(1000, 1000, 20, 0), 200);
    }

    #[test]
    fn test_insert_refreshes_auto_limit() {
        let budget = BufferBudget::new(0, AutoBufferPolicy::default());
        budget.note_insert(4096);
        assert_eq!(budget.frame_bytes(), 4096);
        let limit = budget.limit().unwrap();
        assert!(limit >= 4096);
        assert_eq!(limit % 4096, 0);

        // Fixed budgets ignore the frame size
        let fixed = BufferBudget::new(1000, AutoBufferPolicy::default());
        fixed.note_insert(4096);
        assert_eq!(fixed.limit(), Some(1000));
    }

    #[test]
    fn test_limit_modes() {
        let budget = BufferBudget::new(4096, AutoBufferPolicy::default());
        assert_eq!(budget.limit(), Some(4096));
        assert!(budget.exceeds(4097));
        assert!(!budget.exceeds(4096));

        budget.set_max_buffer_size(UNBOUNDED);
        assert_eq!(budget.limit(), None);
        assert!(!budget.exceeds(usize::MAX));

        budget.set_max_buffer_size(0);
        assert!(budget.limit().is_some());
    }

    #[test]
    fn test_memory_tracking_saturates() {
        let budget = BufferBudget::new(UNBOUNDED, AutoBufferPolicy::default());
        budget.add_memory(1024);
        budget.free_memory(512);
        assert_eq!(budget.resident(), 512);
        budget.free_memory(4096);
        assert_eq!(budget.resident(), 0);
    }

    #[test]
    fn test_generation_increment() {
        let budget = BufferBudget::new(UNBOUNDED, AutoBufferPolicy::default());
        assert_eq!(budget.generation(), 0);
        assert_eq!(budget.increment_generation(), 1);
        assert_eq!(budget.generation_ref().load(Ordering::Acquire), 1);
    }
}
