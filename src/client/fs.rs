//! The kernel-facing adapter: translates FUSE upcalls into [`Remote`]
//! operations and maps failures onto exact errno values.
//!
//! The kernel speaks inodes, everything behind [`Remote`] speaks paths;
//! the translation tables live here. Attribute TTLs are zero so the kernel
//! asks again on every access and server-driven invalidation stays
//! observable within its one-second budget.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use libc::c_int;
use tracing::debug;

use super::Remote;
use crate::message::{open_flags, Attributes, FileKind, FileTime};
use crate::path::{PathError, VirtualPath};

const ROOT_INO: u64 = 1;
const TTL: Duration = Duration::ZERO;
const BLOCK_SIZE: u64 = 512;

/// Bidirectional inode/path translation.
///
/// Only touched from the FUSE session thread, so plain maps suffice.
struct InodeTable {
    forward: HashMap<u64, VirtualPath>,
    reverse: HashMap<VirtualPath, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table =
            Self { forward: HashMap::new(), reverse: HashMap::new(), next: ROOT_INO + 1 };
        table.forward.insert(ROOT_INO, VirtualPath::root());
        table.reverse.insert(VirtualPath::root(), ROOT_INO);
        table
    }

    fn path_of(&self, ino: u64) -> Option<VirtualPath> {
        self.forward.get(&ino).cloned()
    }

    fn ino_of(&mut self, path: &VirtualPath) -> u64 {
        if let Some(&ino) = self.reverse.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.forward.insert(ino, path.clone());
        self.reverse.insert(path.clone(), ino);
        ino
    }

    fn forget_subtree(&mut self, path: &VirtualPath) {
        let doomed: Vec<(VirtualPath, u64)> = self
            .reverse
            .iter()
            .filter(|(key, _)| key.is_under(path))
            .map(|(key, &ino)| (key.clone(), ino))
            .collect();
        for (key, ino) in doomed {
            self.reverse.remove(&key);
            self.forward.remove(&ino);
        }
    }

    /// Rewrites the mappings of a renamed subtree; inode numbers survive
    /// the move, whatever the destination pointed at is dropped first.
    fn rename_subtree(&mut self, from: &VirtualPath, to: &VirtualPath) {
        self.forget_subtree(to);
        let moved: Vec<(VirtualPath, u64)> = self
            .reverse
            .iter()
            .filter(|(key, _)| key.is_under(from))
            .map(|(key, &ino)| (key.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let new = old.rebase(from, to);
            self.reverse.remove(&old);
            self.forward.insert(ino, new.clone());
            self.reverse.insert(new, ino);
        }
    }
}

/// The mounted filesystem.
pub struct RemoteFs {
    remote: Arc<Remote>,
    runtime: tokio::runtime::Handle,
    inodes: InodeTable,
    uid: u32,
    gid: u32,
}

impl RemoteFs {
    pub fn new(remote: Arc<Remote>, runtime: tokio::runtime::Handle) -> Self {
        // The mount owner shows up as the owner of every remote object.
        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        Self { remote, runtime, inodes: InodeTable::new(), uid, gid }
    }

    fn fuse_attr(&self, ino: u64, attr: &Attributes) -> FileAttr {
        let kind = match attr.kind {
            FileKind::Directory => FileType::Directory,
            FileKind::Symlink => FileType::Symlink,
            FileKind::Regular | FileKind::Unknown => FileType::RegularFile,
        };
        let mtime = system_time(attr.mtime);
        let ctime = system_time(attr.ctime);
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(BLOCK_SIZE),
            atime: mtime,
            mtime,
            ctime,
            crtime: ctime,
            kind,
            perm: (attr.mode & 0o7777) as u16,
            nlink: if kind == FileType::Directory { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    /// Builds the child path for a (parent inode, name) pair.
    fn child_path(&self, parent: u64, name: &OsStr) -> Result<VirtualPath, i32> {
        let parent = self.inodes.path_of(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        parent.join(name).map_err(|err| match err {
            PathError::TooLong => libc::ENAMETOOLONG,
            _ => libc::EINVAL,
        })
    }
}

fn system_time(time: FileTime) -> SystemTime {
    if time.secs >= 0 {
        UNIX_EPOCH + Duration::new(time.secs as u64, time.nanos)
    } else {
        UNIX_EPOCH - Duration::from_secs(time.secs.unsigned_abs())
            + Duration::from_nanos(time.nanos as u64)
    }
}

fn file_time(time: SystemTime) -> FileTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => FileTime { secs: since.as_secs() as i64, nanos: since.subsec_nanos() },
        Err(err) => {
            let before = err.duration();
            FileTime { secs: -(before.as_secs() as i64), nanos: 0 }
        }
    }
}

fn time_or_now(time: TimeOrNow) -> FileTime {
    match time {
        TimeOrNow::SpecificTime(time) => file_time(time),
        TimeOrNow::Now => file_time(SystemTime::now()),
    }
}

/// Translates kernel open flags into the wire vocabulary.
fn wire_flags(flags: i32) -> u32 {
    let mut out = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => open_flags::WRITE,
        libc::O_RDWR => open_flags::READ | open_flags::WRITE,
        _ => open_flags::READ,
    };
    if flags & libc::O_APPEND != 0 {
        out |= open_flags::APPEND;
    }
    if flags & libc::O_TRUNC != 0 {
        out |= open_flags::TRUNCATE;
    }
    if flags & libc::O_CREAT != 0 {
        out |= open_flags::CREATE;
    }
    if flags & libc::O_EXCL != 0 {
        out |= open_flags::EXCLUSIVE;
    }
    out
}

impl Filesystem for RemoteFs {
    fn init(&mut self, _req: &Request, config: &mut KernelConfig) -> Result<(), c_int> {
        // Keep kernel writes within one wire message.
        let _ = config.set_max_write(crate::message::MAX_IO_LEN as u32);
        Ok(())
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.runtime.block_on(self.remote.getattr(&path)) {
            Ok(attr) => {
                let ino = self.inodes.ino_of(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attr), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.runtime.block_on(self.remote.getattr(&path)) {
            Ok(attr) => reply.attr(&TTL, &self.fuse_attr(ino, &attr)),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        if uid.is_some() || gid.is_some() {
            return reply.error(libc::EPERM);
        }
        let remote = Arc::clone(&self.remote);
        let outcome = self.runtime.block_on(async move {
            if let Some(mode) = mode {
                remote.chmod(&path, mode).await?;
            }
            if let Some(size) = size {
                remote.truncate(&path, size).await?;
            }
            if atime.is_some() || mtime.is_some() {
                remote.set_times(&path, atime.map(time_or_now), mtime.map(time_or_now)).await?;
            }
            remote.getattr(&path).await
        });
        match outcome {
            Ok(attr) => reply.attr(&TTL, &self.fuse_attr(ino, &attr)),
            Err(errno) => reply.error(errno),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.runtime.block_on(self.remote.readlink(&path)) {
            Ok(target) => reply.data(&target),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.runtime.block_on(self.remote.mkdir(&path, mode & 0o7777)) {
            Ok(attr) => {
                let ino = self.inodes.ino_of(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attr), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.runtime.block_on(self.remote.unlink(&path)) {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.runtime.block_on(self.remote.rmdir(&path)) {
            Ok(()) => {
                self.inodes.forget_subtree(&path);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let target = link.as_os_str().as_bytes();
        match self.runtime.block_on(self.remote.symlink(&path, target)) {
            Ok(attr) => {
                let ino = self.inodes.ino_of(&path);
                reply.entry(&TTL, &self.fuse_attr(ino, &attr), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            return reply.error(libc::EINVAL);
        }
        let from = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let to = match self.child_path(newparent, newname) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.runtime.block_on(self.remote.rename(&from, &to)) {
            Ok(()) => {
                self.inodes.rename_subtree(&from, &to);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        _ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        // Hard links across the wire are unsupported.
        reply.error(libc::EPERM);
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        match self.runtime.block_on(self.remote.open(&path, wire_flags(flags), 0)) {
            Ok(fh) => reply.opened(fh, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let path = match self.child_path(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let flags = wire_flags(flags) | open_flags::CREATE;
        match self.runtime.block_on(self.remote.create(&path, flags, mode & 0o7777)) {
            Ok((fh, attr)) => {
                let ino = self.inodes.ino_of(&path);
                reply.created(&TTL, &self.fuse_attr(ino, &attr), 0, fh, 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        match self.runtime.block_on(self.remote.read(fh, offset as u64, size)) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            return reply.error(libc::EINVAL);
        }
        match self.runtime.block_on(self.remote.write(fh, offset as u64, data)) {
            Ok(written) => reply.written(written),
            Err(errno) => reply.error(errno),
        }
    }

    fn flush(&mut self, _req: &Request, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        // Writes are already through; nothing buffered to push.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.runtime.block_on(self.remote.release(fh)) {
            Ok(()) => reply.ok(),
            Err(errno) => reply.error(errno),
        }
    }

    fn opendir(&mut self, _req: &Request, _ino: u64, _flags: i32, reply: ReplyOpen) {
        reply.opened(0, 0);
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path_of(ino) else {
            return reply.error(libc::ENOENT);
        };
        debug!(%path, offset, "readdir");
        let listing = match self.runtime.block_on(self.remote.readdir(&path)) {
            Ok(listing) => listing,
            Err(errno) => return reply.error(errno),
        };

        let parent_ino = match path.parent() {
            Some(parent) => self.inodes.ino_of(&parent),
            None => ROOT_INO,
        };
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_owned()),
            (parent_ino, FileType::Directory, "..".to_owned()),
        ];
        for entry in listing {
            let Ok(child) = path.join(&entry.name) else { continue };
            let kind = match entry.attr.kind {
                FileKind::Directory => FileType::Directory,
                FileKind::Symlink => FileType::Symlink,
                FileKind::Regular | FileKind::Unknown => FileType::RegularFile,
            };
            entries.push((self.inodes.ino_of(&child), kind, entry.name));
        }

        for (index, (ino, kind, name)) in
            entries.into_iter().enumerate().skip(offset as usize)
        {
            if reply.add(ino, (index + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, _fh: u64, _flags: i32, reply: ReplyEmpty) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        // Nothing meaningful to report for a remote tree; the values only
        // need to keep `df` and friends functional.
        reply.statfs(0, 0, 0, 0, 0, BLOCK_SIZE as u32, 255, 0);
    }

    fn access(&mut self, _req: &Request, _ino: u64, _mask: i32, reply: ReplyEmpty) {
        // DefaultPermissions lets the kernel enforce the mode bits.
        reply.ok();
    }
}
