//! Frame buffer: bounded cache of decoded frames keyed by index
//!
//! - Misses schedule one background decode per index (coalesced)
//! - Byte budget from [`BufferBudget`](super::cache_man::BufferBudget)
//! - Directional eviction tuned for sequential playback
//! - Completed decodes are announced to the player's tick context through a
//!   channel of indices
//!
//! # Eviction
//!
//! Every cached index gets a distance ahead of the playhead (the anchor) in
//! the current travel direction, modulo the frame count. The frame with the
//! largest distance sits right behind the playhead and is needed last, so it
//! goes first. Ties go to the lowest index. The frame just inserted is never
//! evicted by its own insertion, so at least one frame always stays.
//!
//! # Hand-off
//!
//! The last index missed by `request_frame()` is the one the player waits
//! for. When its decode lands, the image is also parked in a one-slot
//! hand-off, so it can still be shown after a tiny budget evicted it again.
//! Nothing else is held outside the budget.
//!
//! # Generations
//!
//! `clear()` bumps the generation. A decode started under an older generation
//! is dropped when it finishes: not inserted, not reported.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::cache_man::{AutoBufferPolicy, BufferBudget};
use crate::entities::{FrameImage, FrameSource, WorkerPool};

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time buffer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub resident_bytes: usize,
}

impl BufferStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Travel direction used for eviction distances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Cached decoded frame
#[derive(Debug, Clone)]
pub struct FrameBufferEntry {
    pub index: usize,
    pub image: FrameImage,
    pub byte_size: usize,
}

/// Decode completion message
#[derive(Debug, Clone, Copy)]
struct Completed {
    index: usize,
    /// Generation the decode was started under
    generation: u64,
}

#[derive(Debug, Default)]
struct BufferState {
    entries: HashMap<usize, FrameBufferEntry>,
    /// Indices with a decode in flight
    pending: HashSet<usize>,
    /// Playhead the eviction distances are measured from
    anchor: usize,
    direction: Direction,
    /// Frame count used for wrap-around distances (0 = unknown)
    span: usize,
    /// Last missed index
    awaited: Option<usize>,
    /// Decoded image of `awaited`, kept until drained
    handoff: Option<(usize, FrameImage)>,
}

impl BufferState {
    /// Entry to evict next, never `keep`
    fn eviction_candidate(&self, keep: Option<usize>) -> Option<usize> {
        let max_key = self.entries.keys().copied().max().unwrap_or(0);
        let span = self.span.max(max_key + 1).max(self.anchor + 1);
        let anchor = self.anchor;
        let direction = self.direction;

        self.entries
            .keys()
            .copied()
            .filter(|&idx| Some(idx) != keep)
            .max_by_key(|&idx| {
                let distance = match direction {
                    Direction::Forward => (idx + span - anchor) % span,
                    Direction::Backward => (anchor + span - idx) % span,
                };
                (distance, Reverse(idx))
            })
    }
}

/// Everything decode jobs need after the buffer itself is gone
struct Shared {
    state: Mutex<BufferState>,
    budget: BufferBudget,
    stats: CacheStats,
    completed_tx: Sender<Completed>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert decoded frame and evict down to budget (lock held by caller)
    fn insert_locked(&self, state: &mut BufferState, index: usize, image: FrameImage) {
        let byte_size = image.byte_size();
        let entry = FrameBufferEntry {
            index,
            image,
            byte_size,
        };
        if let Some(old) = state.entries.insert(index, entry) {
            self.budget.free_memory(old.byte_size);
        }
        self.budget.add_memory(byte_size);
        self.budget.note_insert(byte_size);
        trace!("Buffered frame {} ({} bytes)", index, byte_size);

        self.evict_locked(state, Some(index));
    }

    /// Evict until within budget, always leaving one entry
    fn evict_locked(&self, state: &mut BufferState, keep: Option<usize>) {
        while state.entries.len() > 1 && self.budget.exceeds(self.budget.resident()) {
            let Some(victim) = state.eviction_candidate(keep) else {
                break;
            };
            if let Some(evicted) = state.entries.remove(&victim) {
                self.budget.free_memory(evicted.byte_size);
                self.stats.record_eviction();
                trace!("Evicted frame {} (anchor {})", victim, state.anchor);
            }
        }
    }
}

/// Bounded decoded-frame cache for one player
pub struct FrameBuffer {
    shared: Arc<Shared>,
    source: Arc<dyn FrameSource>,
    pool: Arc<dyn WorkerPool>,
    completed_rx: Receiver<Completed>,
}

impl FrameBuffer {
    /// Create buffer decoding from `source` on `pool`
    ///
    /// # Arguments
    /// * `max_buffer_size` - byte budget (0 = auto, 1 = one frame, UNBOUNDED = all)
    /// * `policy` - factors for the automatic budget
    pub fn new(
        source: Arc<dyn FrameSource>,
        pool: Arc<dyn WorkerPool>,
        max_buffer_size: usize,
        policy: AutoBufferPolicy,
    ) -> Self {
        let (completed_tx, completed_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BufferState::default()),
                budget: BufferBudget::new(max_buffer_size, policy),
                stats: CacheStats::new(),
                completed_tx,
            }),
            source,
            pool,
            completed_rx,
        }
    }

    /// Look up frame; on miss schedule a decode and return None.
    ///
    /// The requested index becomes the eviction anchor.
    pub fn request_frame(&self, index: usize) -> Option<FrameImage> {
        {
            let mut state = self.shared.lock();
            state.anchor = index;
            if let Some(entry) = state.entries.get(&index) {
                self.shared.stats.record_hit();
                let image = entry.image.clone();
                state.awaited = None;
                state.handoff = None;
                return Some(image);
            }
            state.awaited = Some(index);
            if state.handoff.as_ref().is_some_and(|(i, _)| *i != index) {
                state.handoff = None;
            }
        }
        self.shared.stats.record_miss();
        trace!("Buffer miss: frame {}", index);
        self.schedule(index);
        None
    }

    /// Schedule decode without touching stats or the anchor
    pub fn prefetch(&self, index: usize) {
        self.schedule(index);
    }

    fn schedule(&self, index: usize) {
        let generation = {
            let mut state = self.shared.lock();
            if state.entries.contains_key(&index) || !state.pending.insert(index) {
                return;
            }
            self.shared.budget.generation()
        }; // lock released: inline pools run the job right here

        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);
        self.pool.execute_with_epoch(
            self.shared.budget.generation_ref(),
            generation,
            Box::new(move || {
                let image = source.frame(index);

                let mut state = shared.lock();
                if shared.budget.generation() != generation {
                    // Cleared while decoding
                    return;
                }
                state.pending.remove(&index);
                match image {
                    Some(image) => {
                        if state.awaited == Some(index) {
                            state.handoff = Some((index, image.clone()));
                        }
                        shared.insert_locked(&mut state, index, image);
                        drop(state);
                        // Receiver may be gone with its player
                        let _ = shared.completed_tx.send(Completed { index, generation });
                    }
                    None => trace!("Source returned no frame for index {}", index),
                }
            }),
        );
    }

    /// Completed decodes of the current generation since the last call,
    /// with their images.
    ///
    /// The awaited frame comes from the hand-off slot; other indices are
    /// reported only while still buffered.
    pub fn drain_completed(&self) -> Vec<(usize, FrameImage)> {
        let generation = self.shared.budget.generation();
        let mut indices: Vec<usize> = Vec::new();
        for done in self.completed_rx.try_iter() {
            if done.generation == generation && !indices.contains(&done.index) {
                indices.push(done.index);
            }
        }
        if indices.is_empty() {
            return Vec::new();
        }

        let mut state = self.shared.lock();
        let mut completed = Vec::with_capacity(indices.len());
        for index in indices {
            let image = match state.handoff.take_if(|(i, _)| *i == index) {
                Some((_, image)) => {
                    state.awaited = None;
                    Some(image)
                }
                None => state.entries.get(&index).map(|entry| entry.image.clone()),
            };
            if let Some(image) = image {
                completed.push((index, image));
            }
        }
        completed
    }

    /// Update eviction anchor, direction and wrap-around span
    pub fn set_cursor(&self, index: usize, direction: Direction, frame_count: usize) {
        let mut state = self.shared.lock();
        state.anchor = index;
        state.direction = direction;
        state.span = frame_count;
    }

    pub fn max_buffer_size(&self) -> usize {
        self.shared.budget.max_buffer_size()
    }

    /// Change budget and evict immediately if it shrank
    pub fn set_max_buffer_size(&self, bytes: usize) {
        self.shared.budget.set_max_buffer_size(bytes);
        let mut state = self.shared.lock();
        let anchor = state.anchor;
        self.shared.evict_locked(&mut state, Some(anchor));
    }

    /// Drop all entries; in-flight decodes become stale
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        let count = state.entries.len();
        for entry in state.entries.values() {
            self.shared.budget.free_memory(entry.byte_size);
        }
        state.entries.clear();
        state.pending.clear();
        state.awaited = None;
        state.handoff = None;
        self.shared.budget.increment_generation();
        debug!("Frame buffer cleared ({} frames)", count);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.shared.lock().entries.contains_key(&index)
    }

    pub fn is_pending(&self, index: usize) -> bool {
        self.shared.lock().pending.contains(&index)
    }

    /// Cached indices, ascending
    pub fn cached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.shared.lock().entries.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resident_bytes(&self) -> usize {
        self.shared.budget.resident()
    }

    /// Bytes held by the buffer: resident frames plus the hand-off slot
    pub fn retained_bytes(&self) -> usize {
        let handoff = self
            .shared
            .lock()
            .handoff
            .as_ref()
            .map_or(0, |(_, image)| image.byte_size());
        self.resident_bytes() + handoff
    }

    pub fn generation(&self) -> u64 {
        self.shared.budget.generation()
    }

    pub fn stats(&self) -> BufferStats {
        let stats = &self.shared.stats;
        BufferStats {
            hits: stats.hits(),
            misses: stats.misses(),
            evictions: stats.evictions(),
            entries: self.len(),
            resident_bytes: self.resident_bytes(),
        }
    }
}
