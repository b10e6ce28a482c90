//! Capability relaying with per-capability priority policies

use crate::error::{AtvError, Result};
use crate::interface::{FeatureName, FeatureSet};
use crate::types::Protocol;
use std::collections::HashMap;
use std::sync::Arc;

/// Default provider order.
pub const DEFAULT_PRIORITY: [Protocol; 5] = [
    Protocol::Mrp,
    Protocol::Dmap,
    Protocol::Companion,
    Protocol::AirPlay,
    Protocol::Raop,
];

/// Power prefers Companion (the only protocol with real wake/sleep).
pub const POWER_PRIORITY: [Protocol; 5] = [
    Protocol::Companion,
    Protocol::Mrp,
    Protocol::Dmap,
    Protocol::AirPlay,
    Protocol::Raop,
];

/// Audio prefers RAOP (actual audio receiver control).
pub const AUDIO_PRIORITY: [Protocol; 5] = [
    Protocol::Raop,
    Protocol::Mrp,
    Protocol::Companion,
    Protocol::Dmap,
    Protocol::AirPlay,
];

/// Routes one capability interface to the best registered provider.
///
/// Candidates for an operation are the protocols whose stack actually
/// implements it (declared through its feature set); the one earliest
/// in the priority vector wins. A protocol may take the capability over
/// at runtime, putting itself at the head until released.
pub struct Relayer<T: ?Sized> {
    instances: HashMap<Protocol, Arc<T>>,
    features: HashMap<Protocol, FeatureSet>,
    priority: Vec<Protocol>,
    takeover: Option<Protocol>,
}

impl<T: ?Sized> Relayer<T> {
    /// Create with a priority vector.
    #[must_use]
    pub fn new(priority: &[Protocol]) -> Self {
        Self {
            instances: HashMap::new(),
            features: HashMap::new(),
            priority: priority.to_vec(),
            takeover: None,
        }
    }

    /// Register a protocol's implementation and the operations it
    /// really implements.
    pub fn register(&mut self, protocol: Protocol, instance: Arc<T>, features: FeatureSet) {
        self.instances.insert(protocol, instance);
        self.features.insert(protocol, features);
    }

    /// Put a protocol at the head of the priority vector.
    pub fn take_over(&mut self, protocol: Protocol) {
        if self.instances.contains_key(&protocol) {
            self.takeover = Some(protocol);
        }
    }

    /// Undo a takeover.
    pub fn release(&mut self) {
        self.takeover = None;
    }

    fn order(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.takeover
            .into_iter()
            .chain(self.priority.iter().copied().filter(move |p| {
                self.takeover != Some(*p)
            }))
    }

    /// The protocol that would serve an operation, when any.
    #[must_use]
    pub fn provider(&self, operation: FeatureName) -> Option<Protocol> {
        self.order().find(|protocol| {
            self.features
                .get(protocol)
                .is_some_and(|features| features.contains(&operation))
        })
    }

    /// Resolve an operation to the highest-priority implementation.
    ///
    /// # Errors
    ///
    /// Returns [`AtvError::NotSupported`] when no candidate exists.
    pub fn relay(&self, operation: FeatureName) -> Result<&Arc<T>> {
        let protocol = self.provider(operation).ok_or(AtvError::NotSupported)?;
        self.instances.get(&protocol).ok_or(AtvError::NotSupported)
    }

    /// The main instance under the priority policy, regardless of
    /// operation.
    #[must_use]
    pub fn main_instance(&self) -> Option<&Arc<T>> {
        self.order()
            .find_map(|protocol| self.instances.get(&protocol))
    }

    /// Registered protocols.
    pub fn protocols(&self) -> impl Iterator<Item = Protocol> + '_ {
        self.instances.keys().copied()
    }

    /// True when any provider implements the operation.
    #[must_use]
    pub fn implements(&self, operation: FeatureName) -> bool {
        self.provider(operation).is_some()
    }
}
