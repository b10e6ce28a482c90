//! Event bus: producers, listeners and push-update deduplication
//!
//! Each long-lived subsystem owns a [`StateProducer`]. Listener
//! registrations are non-owning: the producer keeps weak references and
//! callers control lifetime through the returned handle's `detach` (or
//! by dropping their listener).

#[cfg(test)]
mod tests;

use crate::interface::{KeyboardFocusState, PowerState};
use crate::types::PlayingState;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::warn;

/// Events delivered to device listeners.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Transport lost unexpectedly; the push loop halts until restarted
    ConnectionLost(String),
    /// Connection closed deliberately
    ConnectionClosed,
    /// New play state snapshot
    PlayStatusUpdate(PlayingState),
    /// Push update loop hit an error
    PlayStatusError(String),
    /// Keyboard focus changed
    KeyboardUpdate(KeyboardFocusState),
    /// Volume changed (percent)
    VolumeUpdate(f32),
    /// Power state changed
    PowerStateChanged(PowerState),
    /// Output device set changed
    OutputDevicesUpdate(Vec<String>),
}

/// Receives events from a producer.
pub trait DeviceListener: Send + Sync {
    /// Called for every event, in delivery order.
    fn on_event(&self, event: &DeviceEvent);
}

struct Registration {
    id: u64,
    listener: Weak<dyn DeviceListener>,
}

struct ProducerInner {
    registrations: Vec<Registration>,
    next_id: u64,
}

/// Bounded fan-out event producer.
pub struct StateProducer {
    inner: Arc<Mutex<ProducerInner>>,
}

/// Registration handle; detach to stop receiving events.
pub struct ListenerHandle {
    id: u64,
    inner: Weak<Mutex<ProducerInner>>,
}

impl ListenerHandle {
    /// Remove the registration.
    pub fn detach(self) {
        if let Some(inner) = self.inner.upgrade()
            && let Ok(mut guard) = inner.lock()
        {
            guard.registrations.retain(|r| r.id != self.id);
        }
    }
}

impl StateProducer {
    /// Maximum simultaneous listeners.
    pub const MAX_LISTENERS: usize = 16;

    /// Create an empty producer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProducerInner {
                registrations: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a listener. Registrations beyond the fan-out bound are
    /// rejected with a warning.
    pub fn register(&self, listener: Weak<dyn DeviceListener>) -> Option<ListenerHandle> {
        let mut guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.registrations.retain(|r| r.listener.strong_count() > 0);
        if guard.registrations.len() >= Self::MAX_LISTENERS {
            warn!("listener limit reached, registration rejected");
            return None;
        }
        let id = guard.next_id;
        guard.next_id += 1;
        guard.registrations.push(Registration { id, listener });
        Some(ListenerHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        })
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard
            .registrations
            .iter()
            .filter(|r| r.listener.strong_count() > 0)
            .count()
    }

    /// Deliver an event to all live listeners, pruning dead ones.
    pub fn emit(&self, event: &DeviceEvent) {
        let listeners: Vec<Arc<dyn DeviceListener>> = {
            let mut guard = self
                .inner
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.registrations.retain(|r| r.listener.strong_count() > 0);
            guard
                .registrations
                .iter()
                .filter_map(|r| r.listener.upgrade())
                .collect()
        };
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

impl Default for StateProducer {
    fn default() -> Self {
        Self::new()
    }
}

/// Suppresses redundant play status updates by content/state hash.
#[derive(Default)]
pub struct PlayStatusDedup {
    last: Mutex<Option<(String, PlayingState)>>,
}

impl PlayStatusDedup {
    /// Create with no previous state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `playing` differs from the previously accepted
    /// snapshot and should be emitted.
    pub fn accept(&self, playing: &PlayingState) -> bool {
        let mut guard = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let hash = playing.hash();
        let changed = match guard.as_ref() {
            Some((last_hash, last_state)) => *last_hash != hash || last_state != playing,
            None => true,
        };
        if changed {
            *guard = Some((hash, playing.clone()));
        }
        changed
    }
}

/// Linear reconnect backoff seeded by an optional initial delay.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    attempt: u32,
    initial: Duration,
}

impl ReconnectBackoff {
    /// Create with the given seed delay.
    #[must_use]
    pub fn new(initial_delay: Option<Duration>) -> Self {
        Self {
            attempt: 0,
            initial: initial_delay.unwrap_or(Duration::from_secs(1)),
        }
    }

    /// Delay before the next attempt; grows linearly and saturates at
    /// one minute.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        (self.initial * self.attempt).min(Duration::from_secs(60))
    }

    /// Reset after a successful attempt.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
