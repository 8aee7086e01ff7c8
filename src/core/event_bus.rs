//! Typed pub/sub for player notifications.
//!
//! Architecture:
//! - Handlers subscribe to an event type and get a [`HandlerId`] back
//! - `emit()` invokes every handler of that type synchronously on the
//!   emitting thread
//!
//! Callback order: FIFO (first-subscribed, first-called) within the same
//! event type. Handlers may subscribe/unsubscribe from inside a callback; the
//! change applies from the next emit.

use indexmap::IndexMap;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::entities::FrameImage;

/// Marker trait for events. Events must be Send + Sync + 'static.
pub trait Event: Any + Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
}

// Blanket impl for all qualifying types
impl<T: Any + Send + Sync + 'static> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Current frame changed (index + decoded image)
#[derive(Debug, Clone)]
pub struct FrameChanged {
    pub index: usize,
    pub frame: FrameImage,
}

/// A loop finished; carries the new loop count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopChanged {
    pub loop_count: usize,
}

/// Registration handle for `unsubscribe()`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

/// Type-erased callback
type Callback = Arc<dyn Fn(&dyn Any) + Send + Sync>;

/// Per-event-type ordered handler lists
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<TypeId, IndexMap<HandlerId, Callback>>>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_types", &self.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type E.
    ///
    /// # Example
    /// ```ignore
    /// let id = bus.subscribe::<LoopChanged, _>(|e| println!("loop {}", e.loop_count));
    /// bus.unsubscribe(id);
    /// ```
    pub fn subscribe<E, F>(&self, callback: F) -> HandlerId
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let wrapped: Callback = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .insert(id, wrapped);
        id
    }

    /// Remove one handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: HandlerId) -> bool {
        let mut subscribers = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subscribers
            .values_mut()
            .any(|handlers| handlers.shift_remove(&id).is_some())
    }

    /// Clear subscribers for type E
    pub fn unsubscribe_all<E: Event>(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    /// Invoke handlers of E in registration order.
    ///
    /// Handlers run after the subscriber lock is released.
    pub fn emit<E: Event>(&self, event: &E) {
        let handlers: Vec<Callback> = {
            let subscribers = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            match subscribers.get(&TypeId::of::<E>()) {
                Some(handlers) => handlers.values().cloned().collect(),
                None => return,
            }
        };
        for handler in handlers {
            handler(event.as_any());
        }
    }

    /// Check if there are subscribers for event type E
    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| !v.is_empty())
            .unwrap_or(false)
    }

    /// Number of handlers for event type E
    pub fn subscriber_count<E: Event>(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .map(|v| v.len())
            .unwrap_or(0)
    }
}
