//! Target-to-request bindings guarding against stale deliveries.
//!
//! Every `display` call rebinds its target to a new request key and a fresh
//! generation number. A delivery carries the `(key, generation)` it was
//! registered with and is applied only if the target's binding still matches
//! both; anything else is a defunct delivery and is dropped. No cancel signal
//! ever needs to reach a worker.

use crate::key::RequestKey;
use crate::registry::WaiterId;
use crate::target::TargetId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Current association of one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// `None` when the request failed before a key could be built.
    pub key: Option<RequestKey>,
    pub generation: u64,
    /// Registry waiter still pending for this binding.
    pub waiter: Option<WaiterId>,
}

impl Binding {
    /// The key and waiter to withdraw from the task registry, if any.
    pub fn pending_waiter(&self) -> Option<(&RequestKey, WaiterId)> {
        match (&self.key, self.waiter) {
            (Some(key), Some(waiter)) => Some((key, waiter)),
            _ => None,
        }
    }
}

/// Side table of bindings keyed by target identity.
#[derive(Debug, Default)]
pub struct DisplayBinder {
    bindings: Mutex<HashMap<TargetId, Binding>>,
    next_generation: AtomicU64,
}

impl DisplayBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `target` at `key`, returning the new generation and the binding
    /// it replaced.
    pub fn bind(&self, target: TargetId, key: Option<RequestKey>) -> (u64, Option<Binding>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.bindings.lock().insert(
            target,
            Binding {
                key,
                generation,
                waiter: None,
            },
        );
        (generation, previous)
    }

    /// Record the registry waiter for a binding.
    ///
    /// Returns false if the target was rebound or released in the meantime;
    /// the caller should then withdraw the waiter itself.
    pub fn attach_waiter(&self, target: TargetId, generation: u64, waiter: WaiterId) -> bool {
        match self.bindings.lock().get_mut(&target) {
            Some(binding) if binding.generation == generation => {
                binding.waiter = Some(waiter);
                true
            }
            _ => false,
        }
    }

    /// Whether a delivery for `(key, generation)` may still be applied to `target`.
    pub fn is_current(&self, target: TargetId, key: Option<&RequestKey>, generation: u64) -> bool {
        self.bindings
            .lock()
            .get(&target)
            .map_or(false, |b| b.generation == generation && b.key.as_ref() == key)
    }

    /// Remove and return the binding of `target` if a delivery for
    /// `(key, generation)` may still be applied to it.
    ///
    /// The check and the removal happen under one lock, so at most one
    /// delivery ever wins a binding.
    pub fn take_if_current(
        &self,
        target: TargetId,
        key: Option<&RequestKey>,
        generation: u64,
    ) -> Option<Binding> {
        let mut bindings = self.bindings.lock();
        match bindings.get(&target) {
            Some(b) if b.generation == generation && b.key.as_ref() == key => {
                bindings.remove(&target)
            }
            _ => None,
        }
    }

    /// Drop the binding of `target` whatever its generation.
    pub fn release(&self, target: TargetId) -> Option<Binding> {
        self.bindings.lock().remove(&target)
    }

    /// Drop the binding of `target` only if it is still at `generation`.
    pub fn release_if(&self, target: TargetId, generation: u64) -> Option<Binding> {
        let mut bindings = self.bindings.lock();
        match bindings.get(&target) {
            Some(b) if b.generation == generation => bindings.remove(&target),
            _ => None,
        }
    }

    pub fn binding(&self, target: TargetId) -> Option<Binding> {
        self.bindings.lock().get(&target).cloned()
    }

    /// Number of targets with a live binding.
    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
