//! Cached file contents: per-path range maps with single-flight fetches.
//!
//! Reads accumulate byte ranges; writes go through to the server first and
//! update the local copy afterwards, so the server's copy stays the only
//! authoritative one. A change notification drops the whole entry and the
//! next read refetches.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use moka::sync::Cache;

use super::flight::{FlightMap, Ticket};
use crate::path::VirtualPath;

/// Cached ranges of one file, keyed by start offset.
///
/// Overlapping and adjacent inserts merge, so contiguous data always lives
/// in a single entry and coverage checks stay cheap.
#[derive(Default)]
pub struct FileContent {
    ranges: Mutex<BTreeMap<u64, Vec<u8>>>,
}

impl FileContent {
    /// Returns `len` bytes at `offset` if the cache fully covers them.
    pub fn read(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        let ranges = self.ranges.lock().expect("range lock");
        let (&start, data) = ranges.range(..=offset).next_back()?;
        let relative = (offset - start) as usize;
        if data.len() >= relative + len {
            Some(data[relative..relative + len].to_vec())
        } else {
            None
        }
    }

    /// Inserts a range, merging any overlapping or adjacent neighbors.
    /// Fresh bytes win where they overlap cached ones.
    pub fn insert(&self, offset: u64, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut ranges = self.ranges.lock().expect("range lock");
        let new_end = offset + bytes.len() as u64;

        let overlapping: Vec<u64> = ranges
            .range(..=new_end)
            .filter(|(&start, data)| start + data.len() as u64 >= offset)
            .map(|(&start, _)| start)
            .collect();

        let mut span_start = offset;
        let mut span_end = new_end;
        for &start in &overlapping {
            let end = start + ranges[&start].len() as u64;
            span_start = span_start.min(start);
            span_end = span_end.max(end);
        }

        let mut merged = vec![0u8; (span_end - span_start) as usize];
        for &start in &overlapping {
            let data = ranges.remove(&start).expect("collected key");
            merged[(start - span_start) as usize..][..data.len()].copy_from_slice(&data);
        }
        merged[(offset - span_start) as usize..][..bytes.len()].copy_from_slice(bytes);
        ranges.insert(span_start, merged);
    }

    /// Drops cached bytes at or beyond the new file size.
    pub fn truncate(&self, size: u64) {
        let mut ranges = self.ranges.lock().expect("range lock");
        let mut kept = BTreeMap::new();
        for (start, mut data) in std::mem::take(&mut *ranges) {
            if start >= size {
                continue;
            }
            let max = (size - start) as usize;
            if data.len() > max {
                data.truncate(max);
            }
            if !data.is_empty() {
                kept.insert(start, data);
            }
        }
        *ranges = kept;
    }
}

/// Byte range key used for read single-flight.
type RangeKey = (VirtualPath, u64, u32);

/// Evictable content cache over all open files.
pub struct ContentCache {
    files: Cache<VirtualPath, Arc<FileContent>>,
    flights: FlightMap<RangeKey>,
}

impl ContentCache {
    /// `capacity` bounds the number of files with cached content.
    pub fn new(capacity: u64) -> Self {
        let files = Cache::builder()
            .max_capacity(capacity)
            .support_invalidation_closures()
            .build();
        Self { files, flights: FlightMap::new() }
    }

    pub fn entry(&self, path: &VirtualPath) -> Arc<FileContent> {
        self.files.get_with(path.clone(), || Arc::new(FileContent::default()))
    }

    /// Joins the single-flight record for one (path, offset, len) fetch.
    pub fn join_range(&self, key: RangeKey) -> Ticket<'_, RangeKey> {
        self.flights.join(key)
    }

    /// Drops the entry for one path and dirties its in-flight fetches.
    pub fn invalidate(&self, path: &VirtualPath) {
        self.files.invalidate(path);
        self.flights.mark_dirty(|(flight_path, _, _)| flight_path == path);
    }

    /// Drops every entry at or beneath `path`.
    pub fn invalidate_subtree(&self, path: &VirtualPath) {
        let prefix = path.clone();
        let _ = self.files.invalidate_entries_if(move |key, _| key.is_under(&prefix));
        self.flights.mark_dirty(|(flight_path, _, _)| flight_path.is_under(path));
    }

    /// Discards everything; used when the transport restarts from cold.
    pub fn clear(&self) {
        self.files.invalidate_all();
        self.flights.mark_dirty(|_| true);
    }
}
