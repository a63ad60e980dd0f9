//! Watches the exported root for out-of-band modifications and publishes
//! invalidation events.
//!
//! Events are coalesced within a short window to bound notification volume;
//! correctness does not depend on the window because the client re-reads on
//! every cache miss.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::message::{InvalidateReason, Invalidation};
use crate::path::{virtualize, VirtualPath};

/// Recursive watch over the exported root.
///
/// Keep the value alive for as long as events should flow; dropping it
/// stops the underlying inotify watch.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
}

impl ChangeWatcher {
    pub fn spawn(
        root: PathBuf,
        events: broadcast::Sender<Invalidation>,
        window: Duration,
    ) -> notify::Result<Self> {
        let (raw_send, raw_recv) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                // Runs on the notify thread; the channel hop moves the
                // event onto the runtime.
                let _ = raw_send.send(result);
            },
            Config::default(),
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        tokio::spawn(coalesce(root, raw_recv, events, window));
        Ok(Self { _watcher: watcher })
    }
}

/// Collects raw filesystem events and flushes deduplicated invalidations
/// once per window.
async fn coalesce(
    root: PathBuf,
    mut raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    events: broadcast::Sender<Invalidation>,
    window: Duration,
) {
    let mut pending: Vec<Invalidation> = Vec::new();
    loop {
        match raw.recv().await {
            Some(result) => collect(&root, result, &mut pending),
            None => break,
        }
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, raw.recv()).await {
                Ok(Some(result)) => collect(&root, result, &mut pending),
                Ok(None) => {
                    flush(&events, &mut pending);
                    return;
                }
                Err(_) => break,
            }
        }
        flush(&events, &mut pending);
    }
    flush(&events, &mut pending);
}

fn flush(events: &broadcast::Sender<Invalidation>, pending: &mut Vec<Invalidation>) {
    for invalidation in pending.drain(..) {
        debug!(?invalidation, "publish");
        // No receivers means no connected clients; nothing to do.
        let _ = events.send(invalidation);
    }
}

fn collect(root: &Path, result: notify::Result<Event>, pending: &mut Vec<Invalidation>) {
    let event = match result {
        Ok(event) => event,
        Err(err) => {
            warn!(%err, "filesystem watch error");
            return;
        }
    };
    for invalidation in map_event(root, &event) {
        if !pending.contains(&invalidation) {
            pending.push(invalidation);
        }
    }
}

/// Maps one raw filesystem event onto the invalidations the client needs.
fn map_event(root: &Path, event: &Event) -> Vec<Invalidation> {
    let mut out = Vec::new();
    let mut push = |path: Option<VirtualPath>, reason: InvalidateReason| {
        if let Some(path) = path {
            out.push(Invalidation { path, reason });
        }
    };
    let virtual_paths: Vec<VirtualPath> =
        event.paths.iter().filter_map(|real| virtualize(root, real)).collect();

    match &event.kind {
        EventKind::Access(_) => {}
        EventKind::Create(_) => {
            for path in &virtual_paths {
                push(path.parent(), InvalidateReason::TreeChanged);
            }
        }
        EventKind::Remove(_) => {
            for path in &virtual_paths {
                push(Some(path.clone()), InvalidateReason::Removed);
                push(path.parent(), InvalidateReason::TreeChanged);
            }
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            // A rename leaves stale state at both ends: the old name is
            // gone, and whatever the new name pointed at is overwritten.
            for path in &virtual_paths {
                push(Some(path.clone()), InvalidateReason::Removed);
                push(path.parent(), InvalidateReason::TreeChanged);
            }
        }
        EventKind::Modify(_) => {
            for path in &virtual_paths {
                push(Some(path.clone()), InvalidateReason::Changed);
            }
        }
        EventKind::Any | EventKind::Other => {
            for path in &virtual_paths {
                push(Some(path.clone()), InvalidateReason::Changed);
            }
        }
    }
    out
}
