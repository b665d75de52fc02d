//! Keyed registry of in-flight turns and their cancellation handles.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::TurnCancellationToken;

/// Insert-on-start, delete-on-terminal registry of request id to
/// cancellation handle. Delete is exactly-once: a second removal (or a
/// cancel after removal) is a no-op, never a panic.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<String, TurnCancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh token for a starting turn, replacing any stale
    /// entry left by a crashed predecessor.
    pub fn register(&self, request_id: &str) -> TurnCancellationToken {
        let token = TurnCancellationToken::new();
        let mut inner = lock_or_recover(&self.inner);
        if inner.insert(request_id.to_string(), token.clone()).is_some() {
            debug!(request_id, "replaced stale cancellation entry");
        }
        token
    }

    /// Cancels the turn if it is still registered. Idempotent.
    pub fn cancel(&self, request_id: &str) -> bool {
        let inner = lock_or_recover(&self.inner);
        match inner.get(request_id) {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Removes a terminal turn's entry. Returns false when already gone.
    pub fn remove(&self, request_id: &str) -> bool {
        lock_or_recover(&self.inner).remove(request_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        lock_or_recover(&self.inner).len()
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
