//! Coordinator: one consumer's handle on a (possibly shared) player
//!
//! Every consumer (a view, a window, a thumbnail) gets its own coordinator.
//! Coordinators with the same `group` tag form a group inside a
//! [`Registry`]; actions can be broadcast to the whole group:
//!
//! - [`SyncPolicy::None`]: only this coordinator's player
//! - [`SyncPolicy::All`]: every player in the group, right away
//! - [`SyncPolicy::Last`]: first to arrive starts, last to leave stops.
//!   Start acts at once; pause waits until every member asked for pause or
//!   stop; stop waits until every member asked for stop; seek waits until
//!   every member asked for a seek (the final caller's target wins).
//!
//! A coordinator never owns its player: it holds a `Weak` and republishes
//! index, loop and play state, falling back to the last seen values once the
//! player is gone.

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

use super::player::AnimatedPlayer;
use super::registry::Registry;
use crate::error::Result;

/// How far an action reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPolicy {
    #[default]
    None,
    All,
    Last,
}

impl std::str::FromStr for SyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(SyncPolicy::None),
            "all" => Ok(SyncPolicy::All),
            "last" => Ok(SyncPolicy::Last),
            other => Err(format!("unknown sync policy: {}", other)),
        }
    }
}

/// Last request made through a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Pause,
    Stop,
    Seek { index: usize, loop_count: usize },
}

/// Republished player state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Snapshot {
    frame_index: usize,
    loop_count: usize,
    playing: bool,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    player: Weak<AnimatedPlayer>,
    last_action: Option<Action>,
    snapshot: Snapshot,
}

/// Group member as seen by the registry
#[derive(Debug)]
pub(crate) struct CoordinatorInner {
    id: Uuid,
    group: String,
    state: Mutex<CoordinatorState>,
}

impl CoordinatorInner {
    pub(crate) fn group(&self) -> &str {
        &self.group
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn player(&self) -> Option<Arc<AnimatedPlayer>> {
        self.lock().player.upgrade()
    }

    fn last_action(&self) -> Option<Action> {
        self.lock().last_action
    }
}

/// Per-consumer control point; leaves its group when dropped
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.inner.id)
            .field("group", &self.inner.group)
            .finish()
    }
}

impl Coordinator {
    /// Join `group` in `registry`
    pub fn new(registry: &Arc<Registry>, group: impl Into<String>) -> Self {
        let inner = Arc::new(CoordinatorInner {
            id: Uuid::new_v4(),
            group: group.into(),
            state: Mutex::new(CoordinatorState::default()),
        });
        registry.join(&inner);
        trace!("Coordinator {} joined group '{}'", inner.id, inner.group);
        Self {
            inner,
            registry: Arc::clone(registry),
        }
    }

    /// Member of `group` in the process-wide registry
    pub fn with_group(group: impl Into<String>) -> Self {
        Self::new(&Registry::shared(), group)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Live player, None once every owner released it
    pub fn player(&self) -> Option<Arc<AnimatedPlayer>> {
        self.inner.player()
    }

    /// Point this coordinator at `player` (weakly)
    pub fn attach(&self, player: &Arc<AnimatedPlayer>) {
        let snapshot = snapshot_of(player);
        let mut st = self.inner.lock();
        st.player = Arc::downgrade(player);
        st.snapshot = snapshot;
        debug!("Coordinator {}: attached player {}", self.inner.id, player.id());
    }

    pub fn detach(&self) {
        self.inner.lock().player = Weak::new();
    }

    // ========================================================================
    // Actions
    // ========================================================================

    pub fn start_playing(&self, policy: SyncPolicy) {
        for player in self.targets(policy, Action::Start) {
            player.start_playing();
        }
        self.refresh();
    }

    pub fn pause_playing(&self, policy: SyncPolicy) {
        for player in self.targets(policy, Action::Pause) {
            player.pause_playing();
        }
        self.refresh();
    }

    pub fn stop_playing(&self, policy: SyncPolicy) {
        for player in self.targets(policy, Action::Stop) {
            player.stop_playing();
        }
        self.refresh();
    }

    /// Seek the targeted players. Returns the first rejection; players that
    /// accept the target are still moved.
    ///
    /// Under `Last` a seek that is still waiting for other members is not
    /// validated and returns Ok.
    pub fn seek_to_frame(&self, index: usize, loop_count: usize, policy: SyncPolicy) -> Result<()> {
        let mut result = Ok(());
        for player in self.targets(policy, Action::Seek { index, loop_count }) {
            if let Err(e) = player.seek_to_frame(index, loop_count) {
                warn!("Coordinator {}: seek rejected by player {}: {}", self.inner.id, player.id(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        self.refresh();
        result
    }

    /// Record the action, then pick the players it applies to
    fn targets(&self, policy: SyncPolicy, action: Action) -> Vec<Arc<AnimatedPlayer>> {
        self.inner.lock().last_action = Some(action);

        let targets = match policy {
            SyncPolicy::None => self.player().into_iter().collect(),
            SyncPolicy::All => self.group_players(),
            SyncPolicy::Last if self.group_agrees(action) => self.group_players(),
            SyncPolicy::Last => {
                debug!(
                    "Coordinator {}: {:?} waits for the rest of group '{}'",
                    self.inner.id, action, self.inner.group
                );
                Vec::new()
            }
        };
        trace!(
            "Coordinator {}: {:?} ({:?}) -> {} player(s)",
            self.inner.id,
            action,
            policy,
            targets.len()
        );
        targets
    }

    /// Distinct live players of the group, this coordinator's first
    fn group_players(&self) -> Vec<Arc<AnimatedPlayer>> {
        let mut players: Vec<Arc<AnimatedPlayer>> = self.player().into_iter().collect();
        for member in self.registry.members(&self.inner.group) {
            if let Some(player) = member.player()
                && !players.iter().any(|p| Arc::ptr_eq(p, &player))
            {
                players.push(player);
            }
        }
        players
    }

    /// True if every live member's last request lets `action` go through
    fn group_agrees(&self, action: Action) -> bool {
        self.registry
            .members(&self.inner.group)
            .iter()
            .all(|member| {
                let last = member.last_action();
                match action {
                    Action::Start => true,
                    Action::Pause => matches!(last, Some(Action::Pause | Action::Stop)),
                    Action::Stop => matches!(last, Some(Action::Stop)),
                    Action::Seek { .. } => matches!(last, Some(Action::Seek { .. })),
                }
            })
    }

    // ========================================================================
    // Republished state
    // ========================================================================

    fn refresh(&self) -> Snapshot {
        let fresh = self.player().map(|player| snapshot_of(&player));
        let mut st = self.inner.lock();
        if let Some(snapshot) = fresh {
            st.snapshot = snapshot;
        }
        st.snapshot
    }

    pub fn current_frame_index(&self) -> usize {
        self.refresh().frame_index
    }

    pub fn current_loop_count(&self) -> usize {
        self.refresh().loop_count
    }

    pub fn is_playing(&self) -> bool {
        self.refresh().playing
    }
}

fn snapshot_of(player: &AnimatedPlayer) -> Snapshot {
    Snapshot {
        frame_index: player.current_frame_index(),
        loop_count: player.current_loop_count(),
        playing: player.is_playing(),
    }
}
