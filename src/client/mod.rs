//! Client: the remote session and the FUSE adapter on top of it.
//!
//! [`Remote`] owns the RPC channel plus the cached view of the server's
//! tree and exposes one method per filesystem operation. Every mutation is
//! write-through: the server confirms first, then the caches are updated
//! from the attributes the reply carries. The transport's event stream
//! feeds invalidations into the same state.

mod cache;
mod content;
mod flight;
pub mod fs;
mod handles;

pub use cache::OpResult;
pub use fs::RemoteFs;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::Settings;
use crate::message::{
    open_flags, Attributes, DirEntry, FileTime, InvalidateReason, Invalidation, Request, Response,
    MAX_IO_LEN,
};
use crate::path::VirtualPath;
use crate::transport::client::{EventSink, ReconnectPolicy, RpcClient};
use crate::transport::Endpoint;

use self::cache::TreeCache;
use self::content::ContentCache;
use self::flight::Ticket;
use self::handles::HandleMap;

/// Everything the client caches between RPCs.
struct ClientState {
    cache: TreeCache,
    content: ContentCache,
    handles: HandleMap,
    /// Collapses concurrent plain opens of one (path, flags) pair.
    open_flights: flight::FlightMap<(VirtualPath, u32)>,
}

impl ClientState {
    fn new(settings: &Settings) -> Self {
        Self {
            cache: TreeCache::new(),
            content: ContentCache::new(settings.cache.content_capacity),
            handles: HandleMap::new(),
            open_flights: flight::FlightMap::new(),
        }
    }

    fn apply_event(&self, event: &Invalidation) {
        self.cache.apply_invalidation(event);
        match event.reason {
            InvalidateReason::Changed => self.content.invalidate(&event.path),
            InvalidateReason::Removed => self.content.invalidate_subtree(&event.path),
            InvalidateReason::TreeChanged => {}
        }
    }

    fn reset(&self) {
        self.cache.reset();
        self.content.clear();
    }
}

/// Bridges the transport's notification stream into the caches.
struct StateSink {
    state: Arc<ClientState>,
}

#[async_trait::async_trait]
impl EventSink for StateSink {
    async fn deliver(&self, event: Invalidation) {
        debug!(?event, "invalidation");
        self.state.apply_event(&event);
    }

    async fn reset(&self) {
        info!("transport reset, discarding caches");
        self.state.reset();
    }
}

/// A mounted-side session against one server.
pub struct Remote {
    state: Arc<ClientState>,
    rpc: RpcClient,
}

impl Remote {
    /// Connects to the server; fails fast if it is unreachable.
    pub async fn connect(endpoint: Endpoint, settings: &Settings) -> io::Result<Remote> {
        let state = Arc::new(ClientState::new(settings));
        let sink = Arc::new(StateSink { state: Arc::clone(&state) });
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(settings.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(settings.reconnect.max_delay_ms),
        };
        let rpc = RpcClient::connect(endpoint, sink, policy).await?;
        Ok(Remote { state, rpc })
    }

    /// One RPC with errno unwrapping; transport loss surfaces as `EIO`.
    async fn call(&self, request: Request) -> OpResult<Response> {
        match self.rpc.call(request).await {
            Ok(Response::Error { errno }) => Err(errno),
            Ok(response) => Ok(response),
            Err(_) => Err(libc::EIO),
        }
    }

    pub async fn getattr(&self, path: &VirtualPath) -> OpResult<Attributes> {
        self.state.cache.stat(&self.rpc, path).await
    }

    pub async fn readdir(&self, path: &VirtualPath) -> OpResult<Vec<DirEntry>> {
        self.state.cache.list(&self.rpc, path).await
    }

    pub async fn readlink(&self, path: &VirtualPath) -> OpResult<Vec<u8>> {
        self.state.cache.read_link(&self.rpc, path).await
    }

    pub async fn mkdir(&self, path: &VirtualPath, mode: u32) -> OpResult<Attributes> {
        match self.call(Request::MkDir { path: path.clone(), mode }).await? {
            Response::Node { attr, parent } => {
                self.state.cache.apply_new_node(path, attr, parent, None);
                Ok(attr)
            }
            other => unexpected(&other),
        }
    }

    pub async fn rmdir(&self, path: &VirtualPath) -> OpResult<()> {
        match self.call(Request::RmDir { path: path.clone() }).await? {
            Response::Removed { parent } => {
                self.state.cache.apply_removed(path, parent);
                Ok(())
            }
            other => unexpected(&other),
        }
    }

    pub async fn unlink(&self, path: &VirtualPath) -> OpResult<()> {
        match self.call(Request::Unlink { path: path.clone() }).await? {
            Response::Removed { parent } => {
                self.state.cache.apply_removed(path, parent);
                self.state.content.invalidate(path);
                Ok(())
            }
            other => unexpected(&other),
        }
    }

    pub async fn symlink(&self, path: &VirtualPath, target: &[u8]) -> OpResult<Attributes> {
        let request = Request::SymLink { path: path.clone(), target: target.to_vec() };
        match self.call(request).await? {
            Response::Node { attr, parent } => {
                self.state.cache.apply_new_node(path, attr, parent, Some(target.to_vec()));
                Ok(attr)
            }
            other => unexpected(&other),
        }
    }

    pub async fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> OpResult<()> {
        let request = Request::Rename { from: from.clone(), to: to.clone() };
        match self.call(request).await? {
            Response::Renamed { from_parent, to_parent } => {
                self.state.cache.apply_renamed(from, to, from_parent, to_parent);
                self.state.content.invalidate_subtree(from);
                self.state.content.invalidate_subtree(to);
                Ok(())
            }
            other => unexpected(&other),
        }
    }

    pub async fn chmod(&self, path: &VirtualPath, mode: u32) -> OpResult<Attributes> {
        match self.call(Request::ChMod { path: path.clone(), mode }).await? {
            Response::Attr { attr } => {
                self.state.cache.apply_attr(path, attr);
                Ok(attr)
            }
            other => unexpected(&other),
        }
    }

    pub async fn truncate(&self, path: &VirtualPath, size: u64) -> OpResult<Attributes> {
        match self.call(Request::Truncate { path: path.clone(), size }).await? {
            Response::Attr { attr } => {
                self.state.cache.apply_attr(path, attr);
                self.state.content.entry(path).truncate(size);
                Ok(attr)
            }
            other => unexpected(&other),
        }
    }

    pub async fn set_times(
        &self,
        path: &VirtualPath,
        atime: Option<FileTime>,
        mtime: Option<FileTime>,
    ) -> OpResult<Attributes> {
        let request = Request::SetTimes { path: path.clone(), atime, mtime };
        match self.call(request).await? {
            Response::Attr { attr } => {
                self.state.cache.apply_attr(path, attr);
                Ok(attr)
            }
            other => unexpected(&other),
        }
    }

    /// Opens `path`, returning the kernel-visible handle id.
    ///
    /// Plain opens of one (path, flags) pair share a single server handle,
    /// so the server sees at most one concurrent `open` per pair. Opens
    /// with one-shot side effects always reach the server.
    pub async fn open(&self, path: &VirtualPath, flags: u32, mode: u32) -> OpResult<u64> {
        let shareable = flags & (open_flags::TRUNCATE | open_flags::EXCLUSIVE) == 0;
        loop {
            if shareable {
                if let Some(fh) = self.state.handles.reopen(path, flags) {
                    return Ok(fh);
                }
                match self.state.open_flights.join((path.clone(), flags)) {
                    Ticket::Owner(guard) => {
                        let outcome = self.open_remote(path, flags, mode, true).await;
                        guard.complete();
                        return outcome;
                    }
                    Ticket::Waiter(mut wait) => {
                        let _ = wait.changed().await;
                        continue;
                    }
                }
            }
            return self.open_remote(path, flags, mode, false).await;
        }
    }

    async fn open_remote(
        &self,
        path: &VirtualPath,
        flags: u32,
        mode: u32,
        shared: bool,
    ) -> OpResult<u64> {
        let request = Request::Open { path: path.clone(), flags, mode };
        match self.call(request).await? {
            Response::Opened { handle, attr } => {
                self.state.cache.apply_attr(path, attr);
                if flags & open_flags::TRUNCATE != 0 {
                    self.state.content.entry(path).truncate(0);
                }
                if shared {
                    Ok(self.state.handles.insert_shared(path, flags, handle))
                } else {
                    Ok(self.state.handles.insert_private(path, flags, handle))
                }
            }
            other => unexpected(&other),
        }
    }

    /// Creates and opens `path`, returning handle id and attributes.
    pub async fn create(
        &self,
        path: &VirtualPath,
        flags: u32,
        mode: u32,
    ) -> OpResult<(u64, Attributes)> {
        let request = Request::Create { path: path.clone(), flags, mode };
        match self.call(request).await? {
            Response::Created { handle, attr, parent } => {
                self.state.cache.apply_new_node(path, attr, parent, None);
                self.state.content.invalidate(path);
                Ok((self.state.handles.insert_private(path, flags, handle), attr))
            }
            other => unexpected(&other),
        }
    }

    /// Reads through the content cache, fetching at most once per
    /// (path, offset, len) across concurrent callers. Requests larger than
    /// one wire message are fetched in chunks.
    pub async fn read(&self, fh: u64, offset: u64, len: u32) -> OpResult<Vec<u8>> {
        let handle = self.state.handles.get(fh).ok_or(libc::EBADF)?;

        // Clamp against the known size so end-of-file reads stay local.
        let attr = self.getattr(&handle.path).await?;
        if offset >= attr.size {
            return Ok(Vec::new());
        }
        let len = len.min((attr.size - offset).min(u32::MAX as u64) as u32);

        let mut out = Vec::with_capacity(len as usize);
        let mut cursor = offset;
        let mut remaining = len;
        while remaining > 0 {
            let chunk_len = remaining.min(MAX_IO_LEN as u32);
            let chunk = self.fetch_range(&handle, cursor, chunk_len).await?;
            let short = (chunk.len() as u32) < chunk_len;
            remaining -= chunk.len() as u32;
            cursor += chunk.len() as u64;
            if out.is_empty() && remaining == 0 {
                return Ok(chunk);
            }
            out.extend_from_slice(&chunk);
            if short {
                break;
            }
        }
        Ok(out)
    }

    /// One wire-sized range, via the cache and its single-flight records.
    async fn fetch_range(
        &self,
        handle: &handles::OpenHandle,
        offset: u64,
        len: u32,
    ) -> OpResult<Vec<u8>> {
        loop {
            let entry = self.state.content.entry(&handle.path);
            if let Some(bytes) = entry.read(offset, len as usize) {
                return Ok(bytes);
            }
            let key = (handle.path.clone(), offset, len);
            match self.state.content.join_range(key) {
                Ticket::Owner(guard) => {
                    let request = Request::Read { handle: handle.server_handle, offset, len };
                    let outcome = match self.call(request).await {
                        Ok(Response::Data { data }) => Ok(data),
                        Ok(other) => unexpected(&other),
                        Err(errno) => Err(errno),
                    };
                    let dirty = guard.complete();
                    if let Ok(data) = &outcome {
                        if !dirty {
                            // Re-fetch the entry: an invalidation may have
                            // replaced it while the RPC was in flight.
                            self.state.content.entry(&handle.path).insert(offset, data);
                        }
                    }
                    return outcome;
                }
                Ticket::Waiter(mut wait) => {
                    let _ = wait.changed().await;
                }
            }
        }
    }

    /// Write-through: the server confirms before the local copy updates.
    /// Writes larger than one wire message go out in chunks.
    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> OpResult<u32> {
        let handle = self.state.handles.get(fh).ok_or(libc::EBADF)?;
        let mut total: u32 = 0;
        for chunk in data.chunks(MAX_IO_LEN) {
            let request = Request::Write {
                handle: handle.server_handle,
                offset: offset + total as u64,
                data: chunk.to_vec(),
            };
            match self.call(request).await? {
                Response::Written { written, attr } => {
                    self.state.cache.apply_attr(&handle.path, attr);
                    self.state
                        .content
                        .entry(&handle.path)
                        .insert(offset + total as u64, &chunk[..written as usize]);
                    total += written;
                    if (written as usize) < chunk.len() {
                        break;
                    }
                }
                other => return unexpected(&other),
            }
        }
        Ok(total)
    }

    /// Closes the handle; the server handle closes with its last sharer.
    /// A second release of the same id is `EBADF`.
    pub async fn release(&self, fh: u64) -> OpResult<()> {
        let (handle, close_server) = self.state.handles.remove(fh).ok_or(libc::EBADF)?;
        if !close_server {
            return Ok(());
        }
        match self.call(Request::Close { handle: handle.server_handle }).await? {
            Response::Unit => Ok(()),
            other => unexpected(&other),
        }
    }
}

fn unexpected<T>(response: &Response) -> OpResult<T> {
    tracing::warn!(?response, "response does not match the request kind");
    Err(libc::EIO)
}

/// Mounts the filesystem and blocks until it is unmounted.
pub fn mount(
    remote: Arc<Remote>,
    runtime: tokio::runtime::Handle,
    mountpoint: &Path,
) -> io::Result<()> {
    let options = [
        fuser::MountOption::FSName("rewofs".to_owned()),
        fuser::MountOption::DefaultPermissions,
    ];
    fuser::mount2(RemoteFs::new(remote, runtime), mountpoint, &options)
}
