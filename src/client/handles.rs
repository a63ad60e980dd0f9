//! Client-side registry of open file handles.
//!
//! Kernel-visible handle ids map onto server handles. Plain opens of the
//! same (path, flags) pair share one server handle behind a refcount, so
//! the server sees at most one concurrent `open` per pair from this
//! client; the last `release` closes it. Opens with one-shot side effects
//! (truncate-on-open, exclusive create) always get their own handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::path::VirtualPath;

/// State behind one kernel-visible file handle.
#[derive(Debug)]
pub struct OpenHandle {
    pub path: VirtualPath,
    /// Handle id on the server, valid until the last sharer closes.
    pub server_handle: u64,
    /// Wire open-mode bits the handle was opened with.
    pub flags: u32,
    shared: bool,
}

struct SharedEntry {
    server_handle: u64,
    refs: usize,
}

/// Maps kernel file-handle ids to open-file state.
pub struct HandleMap {
    next: AtomicU64,
    open: DashMap<u64, Arc<OpenHandle>>,
    shared: Mutex<HashMap<(VirtualPath, u32), SharedEntry>>,
}

impl HandleMap {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1), open: DashMap::new(), shared: Mutex::new(HashMap::new()) }
    }

    fn alloc(&self, handle: OpenHandle) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.open.insert(id, Arc::new(handle));
        id
    }

    /// Joins an existing shared server handle for (path, flags), if any.
    pub fn reopen(&self, path: &VirtualPath, flags: u32) -> Option<u64> {
        let mut shared = self.shared.lock().expect("handle lock");
        let entry = shared.get_mut(&(path.clone(), flags))?;
        entry.refs += 1;
        let server_handle = entry.server_handle;
        drop(shared);
        Some(self.alloc(OpenHandle { path: path.clone(), server_handle, flags, shared: true }))
    }

    /// Registers a fresh server handle that later opens may share.
    pub fn insert_shared(&self, path: &VirtualPath, flags: u32, server_handle: u64) -> u64 {
        let mut shared = self.shared.lock().expect("handle lock");
        shared.insert((path.clone(), flags), SharedEntry { server_handle, refs: 1 });
        drop(shared);
        self.alloc(OpenHandle { path: path.clone(), server_handle, flags, shared: true })
    }

    /// Registers a server handle that must never be shared.
    pub fn insert_private(&self, path: &VirtualPath, flags: u32, server_handle: u64) -> u64 {
        self.alloc(OpenHandle { path: path.clone(), server_handle, flags, shared: false })
    }

    pub fn get(&self, id: u64) -> Option<Arc<OpenHandle>> {
        self.open.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the handle; a second removal of the same id yields `None`,
    /// which callers surface as `EBADF`. The bool says whether the server
    /// handle has no sharers left and must be closed remotely.
    pub fn remove(&self, id: u64) -> Option<(Arc<OpenHandle>, bool)> {
        let (_, handle) = self.open.remove(&id)?;
        if !handle.shared {
            return Some((handle, true));
        }
        let mut shared = self.shared.lock().expect("handle lock");
        let key = (handle.path.clone(), handle.flags);
        let close_server = match shared.get_mut(&key) {
            Some(entry) if entry.server_handle == handle.server_handle => {
                entry.refs -= 1;
                if entry.refs == 0 {
                    shared.remove(&key);
                    true
                } else {
                    false
                }
            }
            // The sharing entry was superseded; this handle is the only
            // owner of its server handle.
            _ => true,
        };
        Some((handle, close_server))
    }
}

impl Default for HandleMap {
    fn default() -> Self {
        Self::new()
    }
}
