//! Single-shot readiness primitive
//!
//! A [`Completer`] is a one-shot rendezvous between the engine's event
//! handlers (which learn about readiness, e.g. "primary transport connected")
//! and its pipelines (which must suspend until that readiness). Unlike a
//! oneshot channel it supports multiple concurrent waiters, deadline-bounded
//! waits, idempotent resolution, and re-arming via [`Completer::reset`].

use std::time::Duration;

use tokio::sync::watch;

use crate::{EngineError, Result};

#[derive(Clone)]
struct Slot<T> {
    /// Bumped by `reset`; waiters armed under an older generation fail
    generation: u64,
    value: Option<T>,
}

/// Single-shot async rendezvous with timeout and reset.
///
/// Cloning is cheap; clones share the same slot.
pub struct Completer<T> {
    tx: watch::Sender<Slot<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        // watch::Sender clones share the same channel
        Self { tx: self.tx.clone() }
    }
}

impl<T> Default for Completer<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Completer<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot { generation: 0, value: None });
        Self { tx }
    }

    /// Wait for the value, failing with `on_timeout` when `deadline` elapses
    /// or with [`EngineError::Cancelled`] when the completer is reset first.
    ///
    /// Every concurrent waiter observes the same value for a given arming.
    pub async fn wait<E>(&self, deadline: Duration, on_timeout: E) -> Result<T>
    where
        E: FnOnce() -> EngineError,
    {
        let mut rx = self.tx.subscribe();
        let armed = rx.borrow().generation;

        let resolved = async move {
            loop {
                {
                    let slot = rx.borrow_and_update();
                    if slot.generation != armed {
                        return Err(EngineError::Cancelled("completer was reset".to_string()));
                    }
                    if let Some(value) = slot.value.clone() {
                        return Ok(value);
                    }
                }

                if rx.changed().await.is_err() {
                    return Err(EngineError::Cancelled("completer was dropped".to_string()));
                }
            }
        };

        match tokio::time::timeout(deadline, resolved).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }

    /// Resolve or clear the completer.
    ///
    /// `Some(value)` resolves all current and future waiters; setting an equal
    /// value again is a no-op so pending waiters never double-resolve.
    /// `None` means "not yet": the stored value is cleared without cancelling
    /// waiters, so subsequent waits suspend until a fresh value arrives.
    pub fn set(&self, value: Option<T>) {
        self.tx.send_if_modified(|slot| {
            if slot.value == value {
                return false;
            }
            slot.value = value;
            // Waking is only meaningful when a value arrived
            slot.value.is_some()
        });
    }

    /// Cancel all pending waiters and clear any stored value; subsequent
    /// waits re-arm.
    pub fn reset(&self) {
        self.tx.send_modify(|slot| {
            slot.generation += 1;
            slot.value = None;
        });
    }

    /// Current value, if resolved
    pub fn value(&self) -> Option<T> {
        self.tx.borrow().value.clone()
    }

    /// Whether a value is currently set
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().value.is_some()
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("resolved", &self.tx.borrow().value.is_some())
            .field("generation", &self.tx.borrow().generation)
            .finish()
    }
}
