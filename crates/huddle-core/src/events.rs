//! Named-event dispatch for application subscribers.
//!
//! `EventDispatcher` maps an event name to an ordered list of callbacks.
//! Inbound engine messages are re-published through it (`proximity`,
//! `identify`, broadcast event names, ...). The dispatcher is an explicit
//! object shared through `Arc`, so independent clients never see each other's
//! subscribers.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::error;

/// Event names published by the protocol multiplexer.
pub mod names {
    /// Every proximity sample
    pub const PROXIMITY: &str = "proximity";
    /// Proximity sample of a display
    pub const DISPLAY_MOVE: &str = "displaymove";
    /// Proximity sample of a hand
    pub const HAND_MOVE: &str = "handmove";
    /// Every identify request, with its raw data
    pub const IDENTIFY: &str = "identify";
    /// The engine started identifying this device
    pub const DEVICE_FOUND: &str = "devicefound";
    /// The engine stopped identifying this device
    pub const DEVICE_LOST: &str = "devicelost";
    /// Color flash toggled
    pub const SHOW_COLOR: &str = "showColor";
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Handle identifying a registered callback, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registry of event subscribers with synchronous, ordered fan-out.
///
/// Thread-safe: callbacks may be registered from application code while the
/// session task is triggering events.
#[derive(Default)]
pub struct EventDispatcher {
    callbacks: RwLock<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the subscribers of `event`.
    ///
    /// Fails with [`DispatchError::InvalidArgument`] for a blank event name.
    pub fn register(
        &self,
        event: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, DispatchError> {
        if event.trim().is_empty() {
            return Err(DispatchError::InvalidArgument(
                "event name must be a non-empty string".into(),
            ));
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        Ok(id)
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut callbacks = self.callbacks.write().unwrap_or_else(|e| e.into_inner());
        let mut removed = false;
        callbacks.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|(i, _)| *i != id);
            removed |= subscribers.len() != before;
            !subscribers.is_empty()
        });
        removed
    }

    /// Number of callbacks registered for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invoke every subscriber of `event`, in registration order.
    ///
    /// A panicking callback is logged and does not stop the remaining ones.
    pub fn trigger(&self, event: &str, args: &Value) {
        // Snapshot so callbacks can register more callbacks without deadlocking.
        let callbacks: Vec<Callback> = match self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
        {
            Some(subscribers) => subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(args))).is_err() {
                error!("Subscriber for '{}' panicked", event);
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let callbacks = self.callbacks.read().unwrap_or_else(|e| e.into_inner());
        let mut map = f.debug_map();
        for (event, subscribers) in callbacks.iter() {
            map.entry(event, &subscribers.len());
        }
        map.finish()
    }
}
