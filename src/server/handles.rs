//! Per-session table of open file descriptors.

use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Maps server handle ids to open files.
///
/// Ids are monotonic and never reused within a session. Lookups hand out a
/// cloned `Arc` so the table itself is never held across `pread`/`pwrite`.
pub struct HandleTable {
    next: AtomicU64,
    map: DashMap<u64, Arc<File>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1), map: DashMap::new() }
    }

    /// Registers an open file and returns its handle id.
    pub fn insert(&self, file: File) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.map.insert(id, Arc::new(file));
        id
    }

    pub fn get(&self, id: u64) -> Option<Arc<File>> {
        self.map.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: u64) -> Option<Arc<File>> {
        self.map.remove(&id).map(|(_, file)| file)
    }

    /// Closes every handle of the session. Called on client disconnect.
    pub fn clear(&self) {
        self.map.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
