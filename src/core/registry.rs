//! Registry: one shared player per (source, group)
//!
//! Consumers that show the same animation in the same group get the same
//! [`AnimatedPlayer`], so the frames are decoded once and every view shows
//! the same frame. The registry holds players weakly: a player lives as long
//! as some consumer holds its `Arc`, and removes its own entry when dropped.
//!
//! Coordinator group membership is tracked here as well (also weakly).
//!
//! One mutex serializes lookups, so concurrent callers asking for the same
//! key never build two players.

use log::{debug, info, trace};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

use super::coordinator::{Coordinator, CoordinatorInner};
use super::player::{AnimatedPlayer, PlayerContext};
use crate::entities::FrameSource;
use crate::error::Result;

static SHARED: Lazy<Arc<Registry>> = Lazy::new(|| Registry::new(PlayerContext::default()));

/// Registry key: source identity plus coordinator group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlayerKey {
    pub source: Uuid,
    pub group: String,
}

#[derive(Default)]
struct RegistryState {
    players: HashMap<PlayerKey, Weak<AnimatedPlayer>>,
    groups: HashMap<String, Vec<Weak<CoordinatorInner>>>,
}

/// Shared-player lookup and coordinator groups
pub struct Registry {
    state: Mutex<RegistryState>,
    /// Clock, pool and settings for players built here
    context: PlayerContext,
}

impl Registry {
    pub fn new(context: PlayerContext) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RegistryState::default()),
            context,
        })
    }

    /// Process-wide registry (shared decode pool, wall clock)
    pub fn shared() -> Arc<Registry> {
        Arc::clone(&SHARED)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn context(&self) -> &PlayerContext {
        &self.context
    }

    /// New coordinator in `group`
    pub fn coordinator(self: &Arc<Self>, group: impl Into<String>) -> Coordinator {
        Coordinator::new(self, group)
    }

    /// Live player for `(source, coordinator.group())`, built on first use.
    ///
    /// The player is attached to `coordinator`. The caller owns the returned
    /// `Arc`; when the last one is dropped the entry goes away.
    pub fn shared_player(
        self: &Arc<Self>,
        source: Arc<dyn FrameSource>,
        coordinator: &Coordinator,
    ) -> Result<Arc<AnimatedPlayer>> {
        let key = PlayerKey {
            source: source.uuid(),
            group: coordinator.group().to_string(),
        };

        let player = {
            let mut state = self.lock();
            match state.players.get(&key).and_then(Weak::upgrade) {
                Some(player) => {
                    trace!("Registry: reusing player {} for {:?}", player.id(), key);
                    player
                }
                None => {
                    let player = Arc::new(AnimatedPlayer::with_context(source, self.context.clone())?);
                    player.set_registration(Arc::downgrade(self), key.clone());
                    info!("Registry: new player {} for {:?}", player.id(), key);
                    state.players.insert(key, Arc::downgrade(&player));
                    player
                }
            }
        };

        coordinator.attach(&player);
        Ok(player)
    }

    /// Drop the entry for `key` unless a live player took its place
    pub(crate) fn release(&self, key: &PlayerKey) {
        let mut state = self.lock();
        let dead = state
            .players
            .get(key)
            .is_some_and(|weak| weak.strong_count() == 0);
        if dead {
            state.players.remove(key);
            debug!("Registry: released {:?}", key);
        }
    }

    pub(crate) fn join(&self, member: &Arc<CoordinatorInner>) {
        let mut state = self.lock();
        let group = state.groups.entry(member.group().to_string()).or_default();
        group.retain(|weak| weak.strong_count() > 0);
        group.push(Arc::downgrade(member));
    }

    /// Live coordinators of `group`; dead ones are pruned on the way
    pub(crate) fn members(&self, group: &str) -> Vec<Arc<CoordinatorInner>> {
        let mut state = self.lock();
        let Some(weak_members) = state.groups.get_mut(group) else {
            return Vec::new();
        };
        weak_members.retain(|weak| weak.strong_count() > 0);
        let members: Vec<_> = weak_members.iter().filter_map(Weak::upgrade).collect();
        if weak_members.is_empty() {
            state.groups.remove(group);
        }
        members
    }

    /// Number of live shared players
    pub fn player_count(&self) -> usize {
        self.lock()
            .players
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of live coordinators in `group`
    pub fn group_size(&self, group: &str) -> usize {
        self.lock()
            .groups
            .get(group)
            .map(|members| members.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}
