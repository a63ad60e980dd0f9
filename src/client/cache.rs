//! Client cache: a coherent, in-memory snapshot of the remote tree.
//!
//! Every FUSE callback consults the cache before any RPC. Lookups answered
//! here never touch the network; misses collapse into one outstanding RPC
//! per (path, kind) and install the server's answer for everyone. Server
//! notifications invalidate entries; a notification racing an in-flight
//! RPC on the same path lets the reply land and then re-marks it stale.
//!
//! The node map is guarded by one tree-level lock that is never held
//! across an await point; structural changes (insert, detach, rename) are
//! single critical sections and therefore atomic to observers.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::warn;

use super::flight::{FlightMap, Ticket};
use crate::message::{
    Attributes, DirEntry, FileKind, FileTime, InvalidateReason, Invalidation, Request, Response,
};
use crate::path::VirtualPath;
use crate::transport::client::{Disconnected, RpcClient};

/// Result of cache operations: the value or a POSIX errno.
pub type OpResult<T> = std::result::Result<T, i32>;

/// What a single-flight record is fetching.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum FetchKind {
    Attr,
    Listing,
    Link,
}

/// One filesystem object as last confirmed by the server.
struct Node {
    attr: Attributes,
    attr_valid: bool,
    /// Symlink target bytes, if this node is a symlink and was read.
    target: Option<Vec<u8>>,
    /// Child basenames; present only for directories.
    children: Option<HashSet<String>>,
    /// Whether `children` reflects the server's listing.
    children_valid: bool,
}

impl Node {
    fn placeholder(attr: Attributes) -> Self {
        let children =
            if attr.kind == FileKind::Directory { Some(HashSet::new()) } else { None };
        Self { attr, attr_valid: false, target: None, children, children_valid: false }
    }
}

fn unknown_dir_attr() -> Attributes {
    Attributes {
        kind: FileKind::Directory,
        mode: libc::S_IFDIR | 0o755,
        size: 0,
        mtime: FileTime { secs: 0, nanos: 0 },
        ctime: FileTime { secs: 0, nanos: 0 },
    }
}

/// The rooted tree of cached nodes.
pub struct TreeCache {
    nodes: RwLock<HashMap<VirtualPath, Node>>,
    flights: FlightMap<(VirtualPath, FetchKind)>,
}

impl TreeCache {
    pub fn new() -> Self {
        let cache =
            Self { nodes: RwLock::new(HashMap::new()), flights: FlightMap::new() };
        cache.reset();
        cache
    }

    /// Discards everything and reinstalls an unconfirmed root node.
    pub fn reset(&self) {
        let mut nodes = self.nodes.write().expect("tree lock");
        nodes.clear();
        nodes.insert(VirtualPath::root(), Node::placeholder(unknown_dir_attr()));
    }

    /// Attributes of `path`, from cache or via one coalesced `stat` RPC.
    pub async fn stat(&self, rpc: &RpcClient, path: &VirtualPath) -> OpResult<Attributes> {
        loop {
            if let Some(answer) = self.cached_attr(path) {
                return answer;
            }
            match self.flights.join((path.clone(), FetchKind::Attr)) {
                Ticket::Owner(guard) => {
                    let result = rpc.call(Request::Stat { path: path.clone() }).await;
                    let outcome = self.install_stat(path, result);
                    if guard.complete() {
                        self.mark_stale(path, FetchKind::Attr);
                    }
                    return outcome;
                }
                Ticket::Waiter(mut wait) => {
                    let _ = wait.changed().await;
                }
            }
        }
    }

    /// Listing of `path`, from cache or via one coalesced `readdir` RPC.
    pub async fn list(&self, rpc: &RpcClient, path: &VirtualPath) -> OpResult<Vec<DirEntry>> {
        loop {
            if let Some(answer) = self.cached_listing(path) {
                return answer;
            }
            match self.flights.join((path.clone(), FetchKind::Listing)) {
                Ticket::Owner(guard) => {
                    let result = rpc.call(Request::ReadDir { path: path.clone() }).await;
                    let outcome = self.install_listing(path, result);
                    if guard.complete() {
                        self.mark_listing_stale(path);
                    }
                    return outcome;
                }
                Ticket::Waiter(mut wait) => {
                    let _ = wait.changed().await;
                }
            }
        }
    }

    /// Symlink target of `path`, from cache or via one `readlink` RPC.
    pub async fn read_link(&self, rpc: &RpcClient, path: &VirtualPath) -> OpResult<Vec<u8>> {
        loop {
            if let Some(answer) = self.cached_target(path) {
                return answer;
            }
            match self.flights.join((path.clone(), FetchKind::Link)) {
                Ticket::Owner(guard) => {
                    let result = rpc.call(Request::ReadLink { path: path.clone() }).await;
                    let outcome = self.install_target(path, result);
                    if guard.complete() {
                        self.mark_stale(path, FetchKind::Link);
                    }
                    return outcome;
                }
                Ticket::Waiter(mut wait) => {
                    let _ = wait.changed().await;
                }
            }
        }
    }

    // ---- local answers ----------------------------------------------------

    fn cached_attr(&self, path: &VirtualPath) -> Option<OpResult<Attributes>> {
        let nodes = self.nodes.read().expect("tree lock");
        if let Some(node) = nodes.get(path) {
            if node.attr_valid {
                return Some(Ok(node.attr));
            }
            return None;
        }
        // A valid parent listing is authoritative for absent names.
        let parent = path.parent()?;
        let name = path.name()?;
        let parent_node = nodes.get(&parent)?;
        if parent_node.children_valid {
            if let Some(children) = &parent_node.children {
                if !children.contains(name) {
                    return Some(Err(libc::ENOENT));
                }
            }
        }
        None
    }

    fn cached_listing(&self, path: &VirtualPath) -> Option<OpResult<Vec<DirEntry>>> {
        let nodes = self.nodes.read().expect("tree lock");
        let node = nodes.get(path)?;
        if node.attr_valid && node.attr.kind != FileKind::Directory {
            return Some(Err(libc::ENOTDIR));
        }
        if !node.children_valid {
            return None;
        }
        let children = node.children.as_ref()?;
        let mut entries = Vec::with_capacity(children.len());
        for name in children {
            let attr = match path.join(name).ok().and_then(|child| nodes.get(&child)) {
                Some(child) => child.attr,
                None => continue,
            };
            entries.push(DirEntry { name: name.clone(), attr });
        }
        Some(Ok(entries))
    }

    fn cached_target(&self, path: &VirtualPath) -> Option<OpResult<Vec<u8>>> {
        let nodes = self.nodes.read().expect("tree lock");
        let node = nodes.get(path)?;
        if node.attr_valid && node.attr.kind != FileKind::Symlink {
            return Some(Err(libc::EINVAL));
        }
        node.target.as_ref().map(|target| Ok(target.clone()))
    }

    // ---- RPC result installation ------------------------------------------

    fn install_stat(
        &self,
        path: &VirtualPath,
        result: Result<Response, Disconnected>,
    ) -> OpResult<Attributes> {
        match result {
            Ok(Response::Attr { attr }) => {
                self.apply_attr(path, attr);
                Ok(attr)
            }
            Ok(Response::Error { errno }) => {
                if errno == libc::ENOENT {
                    self.detach(path);
                }
                Err(errno)
            }
            Ok(other) => unexpected(path, &other),
            Err(Disconnected) => Err(libc::EIO),
        }
    }

    fn install_listing(
        &self,
        path: &VirtualPath,
        result: Result<Response, Disconnected>,
    ) -> OpResult<Vec<DirEntry>> {
        match result {
            Ok(Response::Directory { entries }) => {
                let mut nodes = self.nodes.write().expect("tree lock");
                let names: HashSet<String> =
                    entries.iter().map(|entry| entry.name.clone()).collect();

                // Names the server no longer lists take their subtrees with
                // them.
                let stale: Vec<VirtualPath> = match nodes.get(path) {
                    Some(node) => node
                        .children
                        .iter()
                        .flatten()
                        .filter(|name| !names.contains(*name))
                        .filter_map(|name| path.join(name).ok())
                        .collect(),
                    None => Vec::new(),
                };
                for gone in stale {
                    detach_locked(&mut nodes, &gone);
                }

                for entry in &entries {
                    if let Ok(child) = path.join(&entry.name) {
                        adopt_locked(&mut nodes, &child, entry.attr);
                    }
                }

                let node = nodes
                    .entry(path.clone())
                    .or_insert_with(|| Node::placeholder(unknown_dir_attr()));
                node.children = Some(names);
                node.children_valid = true;
                Ok(entries)
            }
            Ok(Response::Error { errno }) => {
                if errno == libc::ENOENT {
                    self.detach(path);
                }
                Err(errno)
            }
            Ok(other) => unexpected(path, &other),
            Err(Disconnected) => Err(libc::EIO),
        }
    }

    fn install_target(
        &self,
        path: &VirtualPath,
        result: Result<Response, Disconnected>,
    ) -> OpResult<Vec<u8>> {
        match result {
            Ok(Response::Target { target }) => {
                let mut nodes = self.nodes.write().expect("tree lock");
                if let Some(node) = nodes.get_mut(path) {
                    node.target = Some(target.clone());
                }
                Ok(target)
            }
            Ok(Response::Error { errno }) => {
                if errno == libc::ENOENT {
                    self.detach(path);
                }
                Err(errno)
            }
            Ok(other) => unexpected(path, &other),
            Err(Disconnected) => Err(libc::EIO),
        }
    }

    // ---- mutations confirmed by the server --------------------------------

    /// Installs fresh attributes for `path` and links it into its parent.
    pub fn apply_attr(&self, path: &VirtualPath, attr: Attributes) {
        let mut nodes = self.nodes.write().expect("tree lock");
        adopt_locked(&mut nodes, path, attr);
    }

    /// Installs a node just created by this client (`mkdir`, `create`,
    /// `symlink`), together with the parent's restated attributes.
    pub fn apply_new_node(
        &self,
        path: &VirtualPath,
        attr: Attributes,
        parent_attr: Attributes,
        target: Option<Vec<u8>>,
    ) {
        let mut nodes = self.nodes.write().expect("tree lock");
        adopt_locked(&mut nodes, path, attr);
        if let Some(node) = nodes.get_mut(path) {
            node.target = target;
            if attr.kind == FileKind::Directory {
                // A directory this client just made is known to be empty.
                node.children = Some(HashSet::new());
                node.children_valid = true;
            }
        }
        self.update_parent_locked(&mut nodes, path, parent_attr);
    }

    /// Applies a confirmed `unlink`/`rmdir` and the parent's new attributes.
    pub fn apply_removed(&self, path: &VirtualPath, parent_attr: Attributes) {
        let mut nodes = self.nodes.write().expect("tree lock");
        detach_locked(&mut nodes, path);
        self.update_parent_locked(&mut nodes, path, parent_attr);
    }

    /// Applies a confirmed `rename`: the whole subtree moves in one
    /// critical section, so no observer sees the node under two parents.
    pub fn apply_renamed(
        &self,
        from: &VirtualPath,
        to: &VirtualPath,
        from_parent_attr: Attributes,
        to_parent_attr: Attributes,
    ) {
        let mut nodes = self.nodes.write().expect("tree lock");
        detach_locked(&mut nodes, to);

        let moved: Vec<VirtualPath> =
            nodes.keys().filter(|key| key.is_under(from)).cloned().collect();
        let mut rebased = Vec::with_capacity(moved.len());
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                rebased.push((old.rebase(from, to), node));
            }
        }
        for (new, node) in rebased {
            nodes.insert(new, node);
        }

        if let (Some(parent), Some(name)) = (from.parent(), from.name()) {
            if let Some(parent_node) = nodes.get_mut(&parent) {
                if let Some(children) = &mut parent_node.children {
                    children.remove(name);
                }
            }
        }
        self.update_parent_locked(&mut nodes, from, from_parent_attr);
        self.update_parent_locked(&mut nodes, to, to_parent_attr);
        if let (Some(parent), Some(name)) = (to.parent(), to.name()) {
            if let Some(parent_node) = nodes.get_mut(&parent) {
                if let Some(children) = &mut parent_node.children {
                    children.insert(name.to_owned());
                }
            }
        }
    }

    /// Restates the attributes of the directory containing `path`. Name
    /// membership is maintained separately by the mutation paths.
    fn update_parent_locked(
        &self,
        nodes: &mut HashMap<VirtualPath, Node>,
        path: &VirtualPath,
        parent_attr: Attributes,
    ) {
        let parent = path.parent().unwrap_or_else(VirtualPath::root);
        adopt_locked(nodes, &parent, parent_attr);
    }

    // ---- invalidation -----------------------------------------------------

    /// Applies one server notification.
    pub fn apply_invalidation(&self, invalidation: &Invalidation) {
        let path = &invalidation.path;
        self.flights.mark_dirty(|(flight_path, _)| flight_path == path);
        if let Some(parent) = path.parent() {
            // A listing of the parent in flight right now would re-install
            // this path's attributes; let it land and distrust it.
            self.flights
                .mark_dirty(|(flight_path, kind)| *kind == FetchKind::Listing && *flight_path == parent);
        }
        match invalidation.reason {
            InvalidateReason::Changed => {
                let mut nodes = self.nodes.write().expect("tree lock");
                if let Some(node) = nodes.get_mut(path) {
                    node.attr_valid = false;
                    node.target = None;
                }
            }
            InvalidateReason::Removed => self.detach(path),
            InvalidateReason::TreeChanged => {
                let mut nodes = self.nodes.write().expect("tree lock");
                if let Some(node) = nodes.get_mut(path) {
                    node.children_valid = false;
                }
            }
        }
    }

    fn mark_stale(&self, path: &VirtualPath, kind: FetchKind) {
        let mut nodes = self.nodes.write().expect("tree lock");
        if let Some(node) = nodes.get_mut(path) {
            match kind {
                FetchKind::Attr => node.attr_valid = false,
                FetchKind::Listing => node.children_valid = false,
                FetchKind::Link => node.target = None,
            }
        }
    }

    /// An invalidation raced an in-flight listing: distrust the name set
    /// and every attribute the listing just installed.
    fn mark_listing_stale(&self, path: &VirtualPath) {
        let mut nodes = self.nodes.write().expect("tree lock");
        let children: Vec<VirtualPath> = match nodes.get_mut(path) {
            Some(node) => {
                node.children_valid = false;
                node.children
                    .iter()
                    .flatten()
                    .filter_map(|name| path.join(name).ok())
                    .collect()
            }
            None => Vec::new(),
        };
        for child in children {
            if let Some(node) = nodes.get_mut(&child) {
                node.attr_valid = false;
            }
        }
    }

    /// Removes `path` and everything beneath it; the root is only reset.
    fn detach(&self, path: &VirtualPath) {
        let mut nodes = self.nodes.write().expect("tree lock");
        detach_locked(&mut nodes, path);
    }
}

impl Default for TreeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs `attr` for `path`, pruning a stale subtree on kind change and
/// linking the name into a tracked parent.
fn adopt_locked(nodes: &mut HashMap<VirtualPath, Node>, path: &VirtualPath, attr: Attributes) {
    let kind_changed =
        nodes.get(path).map(|node| node.attr.kind != attr.kind).unwrap_or(false);
    if kind_changed {
        // The server's view wins; whatever we cached under the old object
        // is gone.
        detach_locked(nodes, path);
    }
    match nodes.get_mut(path) {
        Some(node) => {
            node.attr = attr;
            node.attr_valid = true;
            if attr.kind != FileKind::Symlink {
                node.target = None;
            }
            if attr.kind == FileKind::Directory && node.children.is_none() {
                node.children = Some(HashSet::new());
            }
        }
        None => {
            let mut node = Node::placeholder(attr);
            node.attr_valid = true;
            nodes.insert(path.clone(), node);
        }
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
        if let Some(parent_node) = nodes.get_mut(&parent) {
            if let Some(children) = &mut parent_node.children {
                children.insert(name.to_owned());
            }
        }
    }
}

/// Removes `path` and its subtree and unlinks the name from the parent.
/// The root node is never removed, only reset to unconfirmed.
fn detach_locked(nodes: &mut HashMap<VirtualPath, Node>, path: &VirtualPath) {
    if path.is_root() {
        nodes.clear();
        nodes.insert(VirtualPath::root(), Node::placeholder(unknown_dir_attr()));
        return;
    }
    let doomed: Vec<VirtualPath> = nodes.keys().filter(|key| key.is_under(path)).cloned().collect();
    for key in doomed {
        nodes.remove(&key);
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.name()) {
        if let Some(parent_node) = nodes.get_mut(&parent) {
            if let Some(children) = &mut parent_node.children {
                children.remove(name);
            }
        }
    }
}

fn unexpected<T>(path: &VirtualPath, response: &Response) -> OpResult<T> {
    warn!(%path, ?response, "response does not match the request kind");
    Err(libc::EIO)
}
