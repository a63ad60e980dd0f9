//! Single-flight bookkeeping shared by the metadata and content caches.
//!
//! Concurrent misses for the same key collapse onto one outstanding fetch:
//! the first caller becomes the owner, everyone else waits on the shared
//! pending record and re-checks the cache once it completes. An owner that
//! is dropped mid-fetch (a cancelled future) wakes the waiters so one of
//! them can take over.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

struct Flight {
    done: watch::Sender<bool>,
    wait: watch::Receiver<bool>,
    /// Set when an invalidation for the key arrives while the fetch is in
    /// flight; the installed result must be re-marked stale immediately.
    dirty: AtomicBool,
}

/// Outcome of joining a pending fetch.
pub enum Ticket<'a, K: Eq + Hash + Clone> {
    /// The caller owns the fetch; complete or drop the guard when done.
    Owner(FlightGuard<'a, K>),
    /// Someone else is fetching; await the receiver, then re-check.
    Waiter(watch::Receiver<bool>),
}

/// Pending-fetch records keyed by `K`.
pub struct FlightMap<K: Eq + Hash + Clone> {
    inner: Mutex<HashMap<K, Arc<Flight>>>,
}

impl<K: Eq + Hash + Clone> FlightMap<K> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    /// Joins the pending fetch for `key`, creating it if absent.
    pub fn join(&self, key: K) -> Ticket<'_, K> {
        let mut inner = self.inner.lock().expect("flight lock");
        if let Some(flight) = inner.get(&key) {
            return Ticket::Waiter(flight.wait.clone());
        }
        let (done, wait) = watch::channel(false);
        let flight = Arc::new(Flight { done, wait, dirty: AtomicBool::new(false) });
        inner.insert(key.clone(), flight);
        Ticket::Owner(FlightGuard { map: self, key: Some(key) })
    }

    /// Flags in-flight fetches whose key matches the predicate as dirty.
    pub fn mark_dirty(&self, mut pred: impl FnMut(&K) -> bool) {
        let inner = self.inner.lock().expect("flight lock");
        for (key, flight) in inner.iter() {
            if pred(key) {
                flight.dirty.store(true, Ordering::Release);
            }
        }
    }

    /// Removes the record and wakes the waiters. Returns the dirty flag.
    fn complete(&self, key: &K) -> bool {
        let flight = self.inner.lock().expect("flight lock").remove(key);
        match flight {
            Some(flight) => {
                let dirty = flight.dirty.load(Ordering::Acquire);
                let _ = flight.done.send(true);
                dirty
            }
            None => false,
        }
    }
}

impl<K: Eq + Hash + Clone> Default for FlightMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-side guard; completing (or dropping) it wakes the waiters.
pub struct FlightGuard<'a, K: Eq + Hash + Clone> {
    map: &'a FlightMap<K>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone> FlightGuard<'_, K> {
    /// Finishes the fetch. Returns whether an invalidation raced it.
    pub fn complete(mut self) -> bool {
        match self.key.take() {
            Some(key) => self.map.complete(&key),
            None => false,
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for FlightGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.map.complete(&key);
        }
    }
}
