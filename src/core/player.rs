//! Playback engine: per-tick frame selection over a frame source
//!
//! **Architecture**: the player owns its [`FrameBuffer`] and reads frames only
//! through it. Decoding happens on a worker pool; a frame that is not decoded
//! yet does not hold playback back. Counters keep advancing and the frame is
//! shown out of band once its decode lands (on a later `tick()`/`update()`).
//!
//! **Used by**: host render loops directly, or through a
//! [`Coordinator`](super::coordinator::Coordinator) when several consumers
//! share one player via the [`Registry`](super::registry::Registry).
//!
//! # Timing Model
//!
//! Each frame has its own duration (`FrameSource::frame_duration`). `update()`
//! polls the injected [`Clock`] and ticks once the current frame's duration
//! divided by the playback rate has elapsed. At most one tick per call; a
//! stalled host does not get a burst of frames.
//!
//! # States
//!
//! `Stopped` (initial) -> `start_playing()` -> `Playing` <-> `Paused`.
//! `stop_playing()` from anywhere resets index and loop count. Seeking never
//! changes the state.
//!
//! # Notifications
//!
//! Frame and loop handlers are collected while the state lock is held and
//! fired after it is released, on the thread that called the operation. A
//! handler may call back into the player.

use log::{debug, info, trace, warn};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use uuid::Uuid;

use super::clock::{Clock, FrameTimer, MonotonicClock};
use super::event_bus::{EventBus, FrameChanged, HandlerId, LoopChanged};
use super::frame_buffer::{BufferStats, Direction, FrameBuffer};
use super::playback::{PlaybackMode, PlaybackStatus, next_position};
use super::registry::{PlayerKey, Registry};
use super::workers::Workers;
use crate::config::PlayerSettings;
use crate::entities::{FrameImage, FrameSource, WorkerPool};
use crate::error::{PlayerError, Result};

/// Collaborators a player is built with
#[derive(Clone)]
pub struct PlayerContext {
    pub clock: Arc<dyn Clock>,
    pub pool: Arc<dyn WorkerPool>,
    pub settings: PlayerSettings,
}

impl PlayerContext {
    /// Wall clock, decode pool sized from `settings.worker_threads`
    /// (0 = process-wide shared pool)
    pub fn from_settings(settings: PlayerSettings) -> Self {
        let pool: Arc<dyn WorkerPool> = if settings.worker_threads > 0 {
            Arc::new(Workers::new(settings.worker_threads))
        } else {
            Workers::shared()
        };
        Self {
            clock: Arc::new(MonotonicClock::new()),
            pool,
            settings,
        }
    }
}

impl Default for PlayerContext {
    fn default() -> Self {
        Self::from_settings(PlayerSettings::default())
    }
}

/// Mutable playback state, guarded by the player's mutex
#[derive(Debug)]
struct PlaybackState {
    status: PlaybackStatus,
    current_frame_index: usize,
    current_loop_count: usize,
    current_frame: Option<FrameImage>,
    mode: PlaybackMode,
    direction: Direction,
    rate: f64,
    /// Consumer overrides of the source's counts
    total_frame_count: Option<usize>,
    total_loop_count: Option<usize>,
    /// Current index was a miss; show it when its decode lands
    needs_display: bool,
    timer: FrameTimer,
}

/// Notification queued under the lock, fired after it
enum Notice {
    Frame(FrameChanged),
    Loop(LoopChanged),
}

/// Set by the registry for players it hands out
struct Registration {
    registry: Weak<Registry>,
    key: PlayerKey,
}

/// Animated image playback engine
pub struct AnimatedPlayer {
    id: Uuid,
    source: Arc<dyn FrameSource>,
    buffer: FrameBuffer,
    state: Mutex<PlaybackState>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    default_duration: Duration,
    registration: Mutex<Option<Registration>>,
}

impl std::fmt::Debug for AnimatedPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("AnimatedPlayer")
            .field("id", &self.id)
            .field("source", &self.source.uuid())
            .field("status", &state.status)
            .field("index", &state.current_frame_index)
            .field("loop", &state.current_loop_count)
            .finish()
    }
}

/// Negative and NaN rates stop advancing instead of failing
fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_nan() || rate < 0.0 {
        warn!("Playback rate {} clamped to 0", rate);
        0.0
    } else {
        rate
    }
}

impl AnimatedPlayer {
    /// Player on the shared decode pool and wall clock
    pub fn new(source: Arc<dyn FrameSource>) -> Result<Self> {
        Self::with_context(source, PlayerContext::default())
    }

    /// Player with explicit clock, pool and settings.
    ///
    /// Fails with [`PlayerError::NoFrames`] if the source has no frames yet.
    pub fn with_context(source: Arc<dyn FrameSource>, ctx: PlayerContext) -> Result<Self> {
        let frame_count = source.frame_count();
        if frame_count < 1 {
            return Err(PlayerError::NoFrames);
        }

        let settings = &ctx.settings;
        let mode = settings.playback_mode;
        let buffer = FrameBuffer::new(
            Arc::clone(&source),
            ctx.pool,
            settings.max_buffer_size,
            settings.auto_buffer_policy(),
        );
        let state = PlaybackState {
            status: PlaybackStatus::Stopped,
            current_frame_index: mode.start_index(frame_count),
            current_loop_count: 0,
            current_frame: None,
            mode,
            direction: mode.start_direction(),
            rate: sanitize_rate(settings.playback_rate),
            total_frame_count: None,
            total_loop_count: None,
            needs_display: false,
            timer: FrameTimer::new(),
        };

        let id = Uuid::new_v4();
        info!(
            "Player {} created: source {}, {} frames, loops {}, mode {:?}",
            id,
            source.uuid(),
            frame_count,
            source.loop_count(),
            mode
        );

        Ok(Self {
            id,
            source,
            buffer,
            state: Mutex::new(state),
            events: EventBus::new(),
            clock: ctx.clock,
            default_duration: settings.default_frame_duration(),
            registration: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn FrameSource> {
        &self.source
    }

    // ========================================================================
    // Control
    // ========================================================================

    /// Start from the mode's first frame, or resume when paused.
    /// No-op while playing.
    pub fn start_playing(&self) {
        let mut notices = Vec::new();
        {
            let mut st = self.lock();
            match st.status {
                PlaybackStatus::Playing => return,
                PlaybackStatus::Paused => {
                    st.status = PlaybackStatus::Playing;
                    st.timer.reset(self.clock.now());
                    debug!("Player {}: resumed at frame {}", self.id, st.current_frame_index);
                }
                PlaybackStatus::Stopped => {
                    let total = self.total_frames(&st);
                    st.current_frame_index = st.mode.start_index(total);
                    st.current_loop_count = 0;
                    st.direction = st.mode.start_direction();
                    st.status = PlaybackStatus::Playing;
                    st.timer.reset(self.clock.now());
                    debug!("Player {}: started at frame {}", self.id, st.current_frame_index);
                    self.show_locked(&mut st, total, &mut notices);
                }
            }
        }
        self.dispatch(notices);
    }

    /// Freeze at the current frame. Idempotent.
    pub fn pause_playing(&self) {
        let mut st = self.lock();
        if st.status == PlaybackStatus::Playing {
            st.status = PlaybackStatus::Paused;
            st.timer.halt();
            debug!("Player {}: paused at frame {}", self.id, st.current_frame_index);
        }
    }

    /// Reset to the mode's start and drop the current frame. The frame buffer
    /// is kept.
    pub fn stop_playing(&self) {
        let mut st = self.lock();
        let total = self.total_frames(&st);
        self.stop_locked(&mut st, total);
        debug!("Player {}: stopped", self.id);
    }

    /// Jump to `index` in loop `loop_count` without changing play status.
    ///
    /// Out-of-range targets are rejected and leave the state untouched.
    pub fn seek_to_frame(&self, index: usize, loop_count: usize) -> Result<()> {
        let mut notices = Vec::new();
        {
            let mut st = self.lock();
            let total_frames = self.total_frames(&st);
            let total_loops = self.total_loops(&st);
            if index >= total_frames || (total_loops != 0 && loop_count >= total_loops) {
                return Err(PlayerError::InvalidSeek {
                    index,
                    loop_count,
                    total_frames,
                    total_loops,
                });
            }

            st.current_frame_index = index;
            st.current_loop_count = loop_count;
            if st.status == PlaybackStatus::Playing {
                st.timer.reset(self.clock.now());
            }
            debug!("Player {}: seek to frame {} loop {}", self.id, index, loop_count);
            self.show_locked(&mut st, total_frames, &mut notices);
        }
        self.dispatch(notices);
        Ok(())
    }

    /// Drop every decoded frame. Decodes in flight are discarded on arrival;
    /// a frame still waiting to be shown is requested again.
    pub fn clear_frame_buffer(&self) {
        let st = self.lock();
        self.buffer.clear();
        if st.needs_display && st.status != PlaybackStatus::Stopped {
            let _ = self.buffer.request_frame(st.current_frame_index);
        }
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Advance one frame now, regardless of elapsed time.
    ///
    /// Returns the new index, None if nothing advanced (not playing, rate 0,
    /// or the last loop just finished).
    pub fn tick(&self) -> Option<usize> {
        let mut notices = Vec::new();
        let advanced = {
            let mut st = self.lock();
            self.deliver_completed_locked(&mut st, &mut notices);
            self.advance_locked(&mut st, &mut notices)
        };
        self.dispatch(notices);
        advanced
    }

    /// Call from the host loop. Shows late decodes and advances once the
    /// current frame has been on screen long enough.
    pub fn update(&self) -> Option<usize> {
        let mut notices = Vec::new();
        let advanced = {
            let mut st = self.lock();
            self.deliver_completed_locked(&mut st, &mut notices);
            if st.status != PlaybackStatus::Playing {
                None
            } else {
                let duration = self.frame_duration(st.current_frame_index);
                let rate = st.rate;
                let now = self.clock.now();
                if st.timer.poll(now, duration, rate) {
                    self.advance_locked(&mut st, &mut notices)
                } else {
                    None
                }
            }
        };
        self.dispatch(notices);
        advanced
    }

    fn frame_duration(&self, index: usize) -> Duration {
        let duration = self.source.frame_duration(index);
        if duration.is_zero() {
            self.default_duration
        } else {
            duration
        }
    }

    /// Show the frame whose decode just landed, if it is still wanted
    fn deliver_completed_locked(&self, st: &mut PlaybackState, notices: &mut Vec<Notice>) {
        let completed = self.buffer.drain_completed();
        if completed.is_empty() || st.status == PlaybackStatus::Stopped || !st.needs_display {
            return;
        }

        let index = st.current_frame_index;
        if let Some((_, frame)) = completed.into_iter().rev().find(|(i, _)| *i == index) {
            trace!("Player {}: late frame {} delivered", self.id, index);
            st.current_frame = Some(frame.clone());
            st.needs_display = false;
            notices.push(Notice::Frame(FrameChanged { index, frame }));
        }
    }

    fn advance_locked(&self, st: &mut PlaybackState, notices: &mut Vec<Notice>) -> Option<usize> {
        if st.status != PlaybackStatus::Playing || st.rate <= 0.0 {
            return None;
        }
        let total = self.total_frames(st);
        if total == 0 {
            return None;
        }

        let step = next_position(st.current_frame_index, total, st.mode, st.direction);
        let mut loop_count = st.current_loop_count;
        if step.wrapped {
            loop_count += 1;
            let total_loops = self.total_loops(st);
            if total_loops != 0 && loop_count >= total_loops {
                info!("Player {}: finished {} loops", self.id, loop_count);
                notices.push(Notice::Loop(LoopChanged { loop_count }));
                self.stop_locked(st, total);
                return None;
            }
        }

        st.current_frame_index = step.index;
        st.direction = step.direction;
        st.current_loop_count = loop_count;
        trace!("Player {}: tick -> frame {} loop {}", self.id, step.index, loop_count);

        self.show_locked(st, total, notices);
        if step.wrapped {
            notices.push(Notice::Loop(LoopChanged { loop_count }));
        }
        Some(step.index)
    }

    /// Request the current frame; emit on hit, otherwise wait for the decode.
    /// While playing, the following frame is prefetched.
    fn show_locked(&self, st: &mut PlaybackState, total: usize, notices: &mut Vec<Notice>) {
        let index = st.current_frame_index;
        self.buffer.set_cursor(index, st.direction, total);

        match self.buffer.request_frame(index) {
            Some(frame) => {
                st.current_frame = Some(frame.clone());
                st.needs_display = false;
                notices.push(Notice::Frame(FrameChanged { index, frame }));
            }
            None => {
                trace!("Player {}: frame {} not decoded yet", self.id, index);
                st.needs_display = true;
            }
        }

        if st.status == PlaybackStatus::Playing && total > 1 {
            let next = next_position(index, total, st.mode, st.direction);
            self.buffer.prefetch(next.index);
        }
    }

    fn stop_locked(&self, st: &mut PlaybackState, total: usize) {
        st.status = PlaybackStatus::Stopped;
        st.current_frame_index = st.mode.start_index(total);
        st.current_loop_count = 0;
        st.direction = st.mode.start_direction();
        st.current_frame = None;
        st.needs_display = false;
        st.timer.halt();
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        for notice in notices {
            match notice {
                Notice::Frame(event) => self.events.emit(&event),
                Notice::Loop(event) => self.events.emit(&event),
            }
        }
    }

    fn total_frames(&self, st: &PlaybackState) -> usize {
        st.total_frame_count.unwrap_or_else(|| self.source.frame_count())
    }

    fn total_loops(&self, st: &PlaybackState) -> usize {
        st.total_loop_count.unwrap_or_else(|| self.source.loop_count())
    }

    // ========================================================================
    // State access
    // ========================================================================

    pub fn status(&self) -> PlaybackStatus {
        self.lock().status
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    /// Last frame shown, None when stopped or nothing decoded yet
    pub fn current_frame(&self) -> Option<FrameImage> {
        self.lock().current_frame.clone()
    }

    pub fn current_frame_index(&self) -> usize {
        self.lock().current_frame_index
    }

    pub fn current_loop_count(&self) -> usize {
        self.lock().current_loop_count
    }

    pub fn playback_rate(&self) -> f64 {
        self.lock().rate
    }

    /// Speed multiplier; 0 holds the current frame while staying `Playing`
    pub fn set_playback_rate(&self, rate: f64) {
        let rate = sanitize_rate(rate);
        let mut st = self.lock();
        if st.rate != rate {
            debug!("Player {}: rate {} -> {}", self.id, st.rate, rate);
            st.rate = rate;
        }
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        self.lock().mode
    }

    /// Takes effect from the next tick; the index is kept.
    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        let mut st = self.lock();
        if st.mode != mode {
            debug!("Player {}: mode {:?} -> {:?}", self.id, st.mode, mode);
            st.mode = mode;
            st.direction = mode.start_direction();
        }
    }

    /// Frame count in effect (override or live source count)
    pub fn total_frame_count(&self) -> usize {
        let st = self.lock();
        self.total_frames(&st)
    }

    /// Play only the first `count` frames; 0 restores the source's count
    pub fn set_total_frame_count(&self, count: usize) {
        let mut st = self.lock();
        st.total_frame_count = (count > 0).then_some(count);
        debug!("Player {}: total frames {}", self.id, self.total_frames(&st));
    }

    /// Loop count in effect, 0 = infinite
    pub fn total_loop_count(&self) -> usize {
        let st = self.lock();
        self.total_loops(&st)
    }

    /// Override the source's loop count (0 = loop forever)
    pub fn set_total_loop_count(&self, count: usize) {
        self.lock().total_loop_count = Some(count);
        debug!("Player {}: total loops {}", self.id, count);
    }

    /// Go back to the loop count the source declares
    pub fn reset_total_loop_count(&self) {
        self.lock().total_loop_count = None;
    }

    pub fn max_buffer_size(&self) -> usize {
        self.buffer.max_buffer_size()
    }

    /// Byte budget: 0 = auto, 1 = one frame, `UNBOUNDED` = everything
    pub fn set_max_buffer_size(&self, bytes: usize) {
        self.buffer.set_max_buffer_size(bytes);
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// True if frame `index` is decoded and resident
    pub fn is_frame_buffered(&self, index: usize) -> bool {
        self.buffer.contains(index)
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Called with (index, frame) whenever a frame is shown
    pub fn add_frame_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(usize, &FrameImage) + Send + Sync + 'static,
    {
        self.events
            .subscribe::<FrameChanged, _>(move |e| handler(e.index, &e.frame))
    }

    /// Called with the new loop count whenever a loop completes
    pub fn add_loop_handler<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events
            .subscribe::<LoopChanged, _>(move |e| handler(e.loop_count))
    }

    /// Returns false if the handler was not registered
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Raw event bus, for typed subscriptions
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // Registry bookkeeping
    // ========================================================================

    pub(crate) fn set_registration(&self, registry: Weak<Registry>, key: PlayerKey) {
        *self.registration.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(Registration { registry, key });
    }
}

impl Drop for AnimatedPlayer {
    fn drop(&mut self) {
        let registration = self
            .registration
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(Registration { registry, key }) = registration
            && let Some(registry) = registry.upgrade()
        {
            registry.release(&key);
        }
        trace!("Player {} dropped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_man::UNBOUNDED;
    use crate::core::clock::ManualClock;
    use crate::core::workers::InlinePool;
    use crate::entities::source::tests::numbered_frames;
    use crate::entities::{Job, ProgressiveSource, StaticSource};

    const FRAME: Duration = Duration::from_millis(100);

    #[derive(Default)]
    struct DeferredPool {
        jobs: Mutex<Vec<Job>>,
    }

    impl DeferredPool {
        fn run_all(&self) {
            let jobs: Vec<Job> = std::mem::take(&mut *self.jobs.lock().unwrap());
            for job in jobs {
                job();
            }
        }
    }

    impl WorkerPool for DeferredPool {
        fn execute(&self, job: Job) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    fn settings(mode: PlaybackMode) -> PlayerSettings {
        PlayerSettings {
            playback_mode: mode,
            max_buffer_size: UNBOUNDED,
            ..Default::default()
        }
    }

    fn build(
        source: Arc<dyn FrameSource>,
        pool: Arc<dyn WorkerPool>,
        settings: PlayerSettings,
    ) -> (AnimatedPlayer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let ctx = PlayerContext {
            clock: clock.clone(),
            pool,
            settings,
        };
        (AnimatedPlayer::with_context(source, ctx).unwrap(), clock)
    }

    fn player(frames: usize, mode: PlaybackMode) -> (AnimatedPlayer, Arc<ManualClock>) {
        let source = Arc::new(StaticSource::new(numbered_frames(frames), FRAME));
        build(source, Arc::new(InlinePool), settings(mode))
    }

    /// Records every frame index and loop count a player reports
    fn record(player: &AnimatedPlayer) -> (Arc<Mutex<Vec<usize>>>, Arc<Mutex<Vec<usize>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let loops = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&frames);
        player.add_frame_handler(move |index, _| f.lock().unwrap().push(index));
        let l = Arc::clone(&loops);
        player.add_loop_handler(move |count| l.lock().unwrap().push(count));
        (frames, loops)
    }

    #[test]
    fn test_empty_source_rejected() {
        let source = Arc::new(ProgressiveSource::new(0));
        let ctx = PlayerContext {
            clock: Arc::new(ManualClock::new()),
            pool: Arc::new(InlinePool),
            settings: PlayerSettings::default(),
        };
        assert!(matches!(
            AnimatedPlayer::with_context(source, ctx),
            Err(PlayerError::NoFrames)
        ));
    }

    #[test]
    fn test_seek_reads_back_every_index() {
        let (player, _) = player(6, PlaybackMode::Normal);
        for index in 0..6 {
            player.seek_to_frame(index, 0).unwrap();
            assert_eq!(player.current_frame_index(), index);
            assert_eq!(player.current_loop_count(), 0);
        }
        // Every frame is decoded now, so a seek shows it immediately
        for index in 0..6 {
            player.seek_to_frame(index, 0).unwrap();
            let frame = player.current_frame().unwrap();
            assert_eq!(frame.as_rgba8().unwrap()[0], index as u8);
        }
        assert_eq!(player.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_invalid_seek_leaves_state() {
        let (player, _) = player(4, PlaybackMode::Normal);
        player.set_total_loop_count(3);
        player.seek_to_frame(2, 1).unwrap();

        let err = player.seek_to_frame(4, 0).unwrap_err();
        assert!(matches!(err, PlayerError::InvalidSeek { index: 4, total_frames: 4, .. }));
        assert!(player.seek_to_frame(0, 3).is_err());

        assert_eq!(player.current_frame_index(), 2);
        assert_eq!(player.current_loop_count(), 1);
    }

    #[test]
    fn test_normal_full_cycle() {
        let (player, _) = player(5, PlaybackMode::Normal);
        let (frames, loops) = record(&player);
        player.start_playing();
        for _ in 0..5 {
            player.tick();
        }
        assert_eq!(player.current_frame_index(), 0);
        assert_eq!(player.current_loop_count(), 1);
        assert_eq!(*frames.lock().unwrap(), vec![0, 1, 2, 3, 4, 0]);
        assert_eq!(*loops.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_bounce_sequence() {
        let (player, _) = player(3, PlaybackMode::Bounce);
        let (frames, loops) = record(&player);
        player.start_playing();
        for _ in 0..6 {
            player.tick();
        }
        assert_eq!(*frames.lock().unwrap(), vec![0, 1, 2, 1, 0, 1, 2]);
        assert_eq!(*loops.lock().unwrap(), vec![1]);

        player.tick();
        player.tick();
        assert_eq!(*loops.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_reverse_starts_at_last() {
        let (player, _) = player(4, PlaybackMode::Reverse);
        player.start_playing();
        assert_eq!(player.current_frame_index(), 3);
        assert_eq!(player.tick(), Some(2));
    }

    #[test]
    fn test_finite_loops_stop() {
        let (player, _) = player(3, PlaybackMode::Normal);
        player.set_total_loop_count(2);
        let (frames, loops) = record(&player);
        player.start_playing();

        let mut ticks = 0;
        while player.is_playing() && ticks < 20 {
            player.tick();
            ticks += 1;
        }
        assert_eq!(ticks, 6);
        assert_eq!(player.status(), PlaybackStatus::Stopped);
        assert_eq!(*loops.lock().unwrap(), vec![1, 2]);

        let shown = frames.lock().unwrap().len();
        assert_eq!(player.tick(), None);
        assert_eq!(frames.lock().unwrap().len(), shown);
    }

    #[test]
    fn test_frame_handler_fires_before_loop_handler() {
        let (player, _) = player(2, PlaybackMode::Normal);
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        player.add_loop_handler(move |count| l.lock().unwrap().push(format!("loop {}", count)));
        let l = Arc::clone(&log);
        player.add_frame_handler(move |index, _| l.lock().unwrap().push(format!("frame {}", index)));

        player.start_playing();
        player.tick();
        player.tick();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["frame 0", "frame 1", "frame 0", "loop 1"]
        );
    }

    #[test]
    fn test_single_frame_buffer_keeps_one() {
        let source = Arc::new(StaticSource::new(numbered_frames(8), FRAME));
        let settings = PlayerSettings {
            max_buffer_size: 1,
            ..Default::default()
        };
        let (player, _) = build(source, Arc::new(InlinePool), settings);

        player.seek_to_frame(0, 0).unwrap();
        assert!(player.is_frame_buffered(0));
        player.seek_to_frame(5, 0).unwrap();
        assert!(player.is_frame_buffered(5));
        assert!(!player.is_frame_buffered(0));
        assert_eq!(player.buffer_stats().entries, 1);
    }

    #[test]
    fn test_single_frame_buffer_still_plays() {
        let source = Arc::new(StaticSource::new(numbered_frames(4), FRAME));
        let settings = PlayerSettings {
            max_buffer_size: 1,
            ..Default::default()
        };
        let (player, _) = build(source, Arc::new(InlinePool), settings);
        let (frames, _) = record(&player);

        player.start_playing();
        for _ in 0..4 {
            player.tick();
        }
        assert_eq!(*frames.lock().unwrap(), vec![0, 1, 2, 3, 0]);
        assert_eq!(player.buffer_stats().entries, 1);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let (player, _) = player(5, PlaybackMode::Normal);
        player.start_playing();
        player.tick();
        player.tick();

        player.pause_playing();
        player.pause_playing();
        assert_eq!(player.status(), PlaybackStatus::Paused);
        assert_eq!(player.current_frame_index(), 2);
        assert_eq!(player.tick(), None);

        player.start_playing();
        assert_eq!(player.tick(), Some(3));
    }

    #[test]
    fn test_stop_resets_without_notification() {
        let (player, _) = player(5, PlaybackMode::Normal);
        player.start_playing();
        player.tick();
        player.tick();

        let (frames, loops) = record(&player);
        player.stop_playing();
        assert_eq!(player.status(), PlaybackStatus::Stopped);
        assert_eq!(player.current_frame_index(), 0);
        assert_eq!(player.current_loop_count(), 0);
        assert!(player.current_frame().is_none());
        assert!(frames.lock().unwrap().is_empty());
        assert!(loops.lock().unwrap().is_empty());
        // Buffer survives stop
        assert!(player.is_frame_buffered(2));
    }

    #[test]
    fn test_update_follows_clock() {
        let (player, clock) = player(5, PlaybackMode::Normal);
        player.start_playing();

        clock.advance(Duration::from_millis(60));
        assert_eq!(player.update(), None);
        clock.advance(Duration::from_millis(40));
        assert_eq!(player.update(), Some(1));

        player.set_playback_rate(2.0);
        clock.advance(Duration::from_millis(50));
        assert_eq!(player.update(), Some(2));
    }

    #[test]
    fn test_per_frame_durations() {
        let durations = vec![Duration::from_millis(30), Duration::from_millis(200)];
        let source = Arc::new(StaticSource::with_durations(numbered_frames(2), durations));
        let (player, clock) = build(source, Arc::new(InlinePool), settings(PlaybackMode::Normal));
        player.start_playing();

        clock.advance(Duration::from_millis(30));
        assert_eq!(player.update(), Some(1));
        clock.advance(Duration::from_millis(100));
        assert_eq!(player.update(), None);
        clock.advance(Duration::from_millis(100));
        assert_eq!(player.update(), Some(0));
    }

    #[test]
    fn test_zero_rate_holds_frame() {
        let (player, clock) = player(5, PlaybackMode::Normal);
        player.start_playing();
        player.set_playback_rate(0.0);

        clock.advance(Duration::from_secs(10));
        assert_eq!(player.update(), None);
        assert_eq!(player.tick(), None);
        assert!(player.is_playing());
        assert_eq!(player.current_frame_index(), 0);
    }

    #[test]
    fn test_vanishing_rate_holds_frame() {
        let (player, clock) = player(3, PlaybackMode::Normal);
        player.start_playing();
        player.set_playback_rate(1e-25);
        assert_eq!(player.playback_rate(), 1e-25);

        clock.advance(Duration::from_millis(16));
        assert_eq!(player.update(), None);
        clock.advance(Duration::from_secs(60));
        assert_eq!(player.update(), None);
        assert!(player.is_playing());
        assert_eq!(player.current_frame_index(), 0);
    }

    #[test]
    fn test_negative_rate_clamped() {
        let (player, _) = player(3, PlaybackMode::Normal);
        player.set_playback_rate(-1.5);
        assert_eq!(player.playback_rate(), 0.0);
        player.set_playback_rate(f64::NAN);
        assert_eq!(player.playback_rate(), 0.0);
    }

    #[test]
    fn test_total_frame_override() {
        let (player, _) = player(5, PlaybackMode::Normal);
        player.set_total_frame_count(3);
        assert_eq!(player.total_frame_count(), 3);
        player.start_playing();
        assert_eq!(player.tick(), Some(1));
        assert_eq!(player.tick(), Some(2));
        assert_eq!(player.tick(), Some(0));
        assert!(player.seek_to_frame(4, 0).is_err());

        player.set_total_frame_count(0);
        assert_eq!(player.total_frame_count(), 5);
        player.seek_to_frame(4, 0).unwrap();
    }

    #[test]
    fn test_late_decode_delivered_out_of_band() {
        let source = Arc::new(StaticSource::new(numbered_frames(4), FRAME));
        let pool = Arc::new(DeferredPool::default());
        let (player, _) = build(source, pool.clone(), settings(PlaybackMode::Normal));
        let (frames, _) = record(&player);

        player.start_playing();
        assert!(frames.lock().unwrap().is_empty());

        // Counters advance even though nothing is decoded
        assert_eq!(player.tick(), Some(1));
        assert!(frames.lock().unwrap().is_empty());

        pool.run_all();
        assert_eq!(player.tick(), Some(2));
        // Frame 0 is no longer current and is never shown
        assert_eq!(*frames.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_clear_discards_in_flight_decodes() {
        let source = Arc::new(StaticSource::new(numbered_frames(4), FRAME));
        let pool = Arc::new(DeferredPool::default());
        let (player, _) = build(source, pool.clone(), settings(PlaybackMode::Normal));
        let (frames, _) = record(&player);

        player.start_playing();
        player.clear_frame_buffer();
        pool.run_all();

        player.tick();
        assert_eq!(*frames.lock().unwrap(), vec![0]);
        assert!(!player.is_frame_buffered(1));
    }

    #[test]
    fn test_stopped_player_ignores_late_decode() {
        let source = Arc::new(StaticSource::new(numbered_frames(4), FRAME));
        let pool = Arc::new(DeferredPool::default());
        let (player, _) = build(source, pool.clone(), settings(PlaybackMode::Normal));
        let (frames, _) = record(&player);

        player.start_playing();
        player.stop_playing();
        pool.run_all();
        player.tick();
        assert!(frames.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progressive_source_grows_during_playback() {
        let source = Arc::new(ProgressiveSource::new(0));
        source.push_frame(FrameImage::solid(2, 2, [0, 0, 0, 255]), FRAME);
        let (player, _) = build(source.clone(), Arc::new(InlinePool), settings(PlaybackMode::Normal));

        player.start_playing();
        assert_eq!(player.tick(), Some(0));
        assert_eq!(player.current_loop_count(), 1);

        source.push_frame(FrameImage::solid(2, 2, [1, 0, 0, 255]), FRAME);
        source.push_frame(FrameImage::solid(2, 2, [2, 0, 0, 255]), FRAME);
        assert_eq!(player.total_frame_count(), 3);
        assert_eq!(player.tick(), Some(1));
        assert_eq!(player.tick(), Some(2));
    }

    #[test]
    fn test_handler_can_pause_from_callback() {
        let (player, _) = player(5, PlaybackMode::Normal);
        let player = Arc::new(player);
        let weak = Arc::downgrade(&player);
        player.add_frame_handler(move |index, _| {
            if index == 2
                && let Some(p) = weak.upgrade()
            {
                p.pause_playing();
            }
        });

        player.start_playing();
        player.tick();
        player.tick();
        assert_eq!(player.status(), PlaybackStatus::Paused);
    }

    #[test]
    fn test_removed_handler_not_called() {
        let (player, _) = player(3, PlaybackMode::Normal);
        let (frames, _) = record(&player);
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        let id = player.add_frame_handler(move |_, _| *c.lock().unwrap() += 1);
        assert!(player.remove_handler(id));

        player.start_playing();
        player.tick();
        assert_eq!(*count.lock().unwrap(), 0);
        assert_eq!(frames.lock().unwrap().len(), 2);
    }
}
