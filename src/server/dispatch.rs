//! Executes decoded requests against the exported directory.
//!
//! The mapping is strictly POSIX: `stat` is `lstat`, `read`/`write` are
//! positional I/O on the handle's descriptor, `rename` inherits kernel
//! rename semantics, and every failure forwards the host errno verbatim.

use std::fs::{File, OpenOptions, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tokio::task;
use tracing::debug;

use super::handles::HandleTable;
use crate::message::{
    open_flags, Attributes, DirEntry, FileKind, FileTime, Request, Response, MAX_IO_LEN,
    MAX_SYMLINK_LEN,
};
use crate::path::{resolve, VirtualPath};

type OpResult<T> = std::result::Result<T, i32>;

/// One session's view of the exported root.
pub struct Dispatcher {
    root: PathBuf,
    handles: HandleTable,
}

impl Dispatcher {
    pub fn new(root: PathBuf) -> Self {
        Self { root, handles: HandleTable::new() }
    }

    /// Closes every descriptor owned by the session.
    pub fn close_session(&self) {
        self.handles.clear();
    }

    /// Executes one request and produces its response.
    pub async fn handle(&self, request: Request) -> Response {
        debug!(?request, "dispatch");
        let result = match request {
            Request::Stat { path } => self.stat(&path).await,
            Request::ReadDir { path } => self.read_dir(&path).await,
            Request::ReadLink { path } => self.read_link(&path).await,
            Request::Open { path, flags, mode } => self.open(&path, flags, mode).await,
            Request::Read { handle, offset, len } => self.read(handle, offset, len).await,
            Request::Write { handle, offset, data } => self.write(handle, offset, data).await,
            Request::Close { handle } => self.close(handle),
            Request::Create { path, flags, mode } => self.create(&path, flags, mode).await,
            Request::MkDir { path, mode } => self.mkdir(&path, mode).await,
            Request::RmDir { path } => self.rmdir(&path).await,
            Request::Unlink { path } => self.unlink(&path).await,
            Request::SymLink { path, target } => self.symlink(&path, target).await,
            Request::Rename { from, to } => self.rename(&from, &to).await,
            Request::ChMod { path, mode } => self.chmod(&path, mode).await,
            Request::Truncate { path, size } => self.truncate(&path, size).await,
            Request::SetTimes { path, atime, mtime } => self.set_times(&path, atime, mtime).await,
        };
        result.unwrap_or_else(Response::errno)
    }

    /// Maps a virtual path into the root, refusing escapes.
    fn real(&self, path: &VirtualPath) -> OpResult<PathBuf> {
        resolve(&self.root, path).ok_or(libc::EACCES)
    }

    async fn lstat(&self, real: &Path) -> OpResult<Attributes> {
        let meta = tokio::fs::symlink_metadata(real).await.map_err(|err| errno_of(&err))?;
        Ok(attributes_of(&meta))
    }

    /// Attributes of the directory containing `path`.
    async fn parent_attr(&self, path: &VirtualPath) -> OpResult<Attributes> {
        let parent = path.parent().unwrap_or_else(VirtualPath::root);
        let real = self.real(&parent)?;
        self.lstat(&real).await
    }

    async fn stat(&self, path: &VirtualPath) -> OpResult<Response> {
        let real = self.real(path)?;
        Ok(Response::Attr { attr: self.lstat(&real).await? })
    }

    async fn read_dir(&self, path: &VirtualPath) -> OpResult<Response> {
        let real = self.real(path)?;
        let mut dir = tokio::fs::read_dir(&real).await.map_err(|err| errno_of(&err))?;
        let mut entries = Vec::new();
        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => return Err(errno_of(&err)),
            };
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                // Non-UTF-8 names are invisible to remote clients.
                Err(_) => continue,
            };
            // An entry can vanish between the listing and the lstat.
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            entries.push(DirEntry { name, attr: attributes_of(&meta) });
        }
        Ok(Response::Directory { entries })
    }

    async fn read_link(&self, path: &VirtualPath) -> OpResult<Response> {
        let real = self.real(path)?;
        let target = tokio::fs::read_link(&real).await.map_err(|err| errno_of(&err))?;
        let mut target = target.as_os_str().as_bytes().to_vec();
        target.truncate(MAX_SYMLINK_LEN);
        Ok(Response::Target { target })
    }

    async fn open(&self, path: &VirtualPath, flags: u32, mode: u32) -> OpResult<Response> {
        let real = self.real(path)?;
        let options = open_options(flags, mode);
        let file = task::spawn_blocking(move || options.open(&real))
            .await
            .map_err(|_| libc::EIO)?
            .map_err(|err| errno_of(&err))?;
        let attr = attributes_of(&file.metadata().map_err(|err| errno_of(&err))?);
        let handle = self.handles.insert(file);
        Ok(Response::Opened { handle, attr })
    }

    async fn read(&self, handle: u64, offset: u64, len: u32) -> OpResult<Response> {
        if len as usize > MAX_IO_LEN {
            return Err(libc::EINVAL);
        }
        let file = self.handles.get(handle).ok_or(libc::EBADF)?;
        let data = task::spawn_blocking(move || pread(&file, offset, len as usize))
            .await
            .map_err(|_| libc::EIO)?
            .map_err(|err| errno_of(&err))?;
        Ok(Response::Data { data })
    }

    async fn write(&self, handle: u64, offset: u64, data: Vec<u8>) -> OpResult<Response> {
        let file = self.handles.get(handle).ok_or(libc::EBADF)?;
        let written = data.len() as u32;
        let attr = task::spawn_blocking(move || -> io::Result<Attributes> {
            file.write_all_at(&data, offset)?;
            Ok(attributes_of(&file.metadata()?))
        })
        .await
        .map_err(|_| libc::EIO)?
        .map_err(|err| errno_of(&err))?;
        Ok(Response::Written { written, attr })
    }

    fn close(&self, handle: u64) -> OpResult<Response> {
        match self.handles.remove(handle) {
            Some(_) => Ok(Response::Unit),
            None => Err(libc::EBADF),
        }
    }

    async fn create(&self, path: &VirtualPath, flags: u32, mode: u32) -> OpResult<Response> {
        let real = self.real(path)?;
        let options = open_options(flags | open_flags::CREATE | open_flags::WRITE, mode);
        let file = task::spawn_blocking(move || options.open(&real))
            .await
            .map_err(|_| libc::EIO)?
            .map_err(|err| errno_of(&err))?;
        let attr = attributes_of(&file.metadata().map_err(|err| errno_of(&err))?);
        let parent = self.parent_attr(path).await?;
        let handle = self.handles.insert(file);
        Ok(Response::Created { handle, attr, parent })
    }

    async fn mkdir(&self, path: &VirtualPath, mode: u32) -> OpResult<Response> {
        let real = self.real(path)?;
        let dir = real.clone();
        task::spawn_blocking(move || std::fs::DirBuilder::new().mode(mode).create(&dir))
            .await
            .map_err(|_| libc::EIO)?
            .map_err(|err| errno_of(&err))?;
        let attr = self.lstat(&real).await?;
        let parent = self.parent_attr(path).await?;
        Ok(Response::Node { attr, parent })
    }

    async fn rmdir(&self, path: &VirtualPath) -> OpResult<Response> {
        let real = self.real(path)?;
        tokio::fs::remove_dir(&real).await.map_err(|err| errno_of(&err))?;
        Ok(Response::Removed { parent: self.parent_attr(path).await? })
    }

    async fn unlink(&self, path: &VirtualPath) -> OpResult<Response> {
        let real = self.real(path)?;
        tokio::fs::remove_file(&real).await.map_err(|err| errno_of(&err))?;
        Ok(Response::Removed { parent: self.parent_attr(path).await? })
    }

    async fn symlink(&self, path: &VirtualPath, target: Vec<u8>) -> OpResult<Response> {
        let real = self.real(path)?;
        let link = real.clone();
        task::spawn_blocking(move || {
            let target = std::ffi::OsStr::from_bytes(&target);
            std::os::unix::fs::symlink(target, &link)
        })
        .await
        .map_err(|_| libc::EIO)?
        .map_err(|err| errno_of(&err))?;
        let attr = self.lstat(&real).await?;
        let parent = self.parent_attr(path).await?;
        Ok(Response::Node { attr, parent })
    }

    async fn rename(&self, from: &VirtualPath, to: &VirtualPath) -> OpResult<Response> {
        let real_from = self.real(from)?;
        let real_to = self.real(to)?;
        tokio::fs::rename(&real_from, &real_to).await.map_err(|err| errno_of(&err))?;
        let from_parent = self.parent_attr(from).await?;
        let to_parent = self.parent_attr(to).await?;
        Ok(Response::Renamed { from_parent, to_parent })
    }

    async fn chmod(&self, path: &VirtualPath, mode: u32) -> OpResult<Response> {
        let real = self.real(path)?;
        let target = real.clone();
        task::spawn_blocking(move || {
            std::fs::set_permissions(&target, Permissions::from_mode(mode))
        })
        .await
        .map_err(|_| libc::EIO)?
        .map_err(|err| errno_of(&err))?;
        Ok(Response::Attr { attr: self.lstat(&real).await? })
    }

    async fn truncate(&self, path: &VirtualPath, size: u64) -> OpResult<Response> {
        let real = self.real(path)?;
        let target = real.clone();
        task::spawn_blocking(move || -> io::Result<()> {
            let file = OpenOptions::new().write(true).open(&target)?;
            file.set_len(size)
        })
        .await
        .map_err(|_| libc::EIO)?
        .map_err(|err| errno_of(&err))?;
        Ok(Response::Attr { attr: self.lstat(&real).await? })
    }

    async fn set_times(
        &self,
        path: &VirtualPath,
        atime: Option<FileTime>,
        mtime: Option<FileTime>,
    ) -> OpResult<Response> {
        let real = self.real(path)?;
        let target = real.clone();
        task::spawn_blocking(move || -> io::Result<()> {
            let meta = std::fs::symlink_metadata(&target)?;
            let atime = match atime {
                Some(time) => filetime::FileTime::from_unix_time(time.secs, time.nanos),
                None => filetime::FileTime::from_last_access_time(&meta),
            };
            let mtime = match mtime {
                Some(time) => filetime::FileTime::from_unix_time(time.secs, time.nanos),
                None => filetime::FileTime::from_last_modification_time(&meta),
            };
            filetime::set_symlink_file_times(&target, atime, mtime)
        })
        .await
        .map_err(|_| libc::EIO)?
        .map_err(|err| errno_of(&err))?;
        Ok(Response::Attr { attr: self.lstat(&real).await? })
    }
}

/// Positional read that tolerates partial progress; short only at EOF.
fn pread(file: &File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Translates wire open-mode bits into host open options.
fn open_options(flags: u32, mode: u32) -> OpenOptions {
    let mut options = OpenOptions::new();
    options.read(flags & open_flags::READ != 0);
    options.write(flags & open_flags::WRITE != 0);
    options.append(flags & open_flags::APPEND != 0);
    options.truncate(flags & open_flags::TRUNCATE != 0);
    options.create(flags & open_flags::CREATE != 0);
    options.create_new(flags & open_flags::EXCLUSIVE != 0);
    options.mode(mode);
    options
}

/// Translates host metadata into the wire attribute record.
pub fn attributes_of(meta: &std::fs::Metadata) -> Attributes {
    let file_type = meta.file_type();
    let kind = if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_file() {
        FileKind::Regular
    } else if file_type.is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::Unknown
    };
    Attributes {
        kind,
        mode: meta.mode(),
        size: meta.len(),
        mtime: FileTime { secs: meta.mtime(), nanos: meta.mtime_nsec() as u32 },
        ctime: FileTime { secs: meta.ctime(), nanos: meta.ctime_nsec() as u32 },
    }
}

/// Maps an `io::Error` to the errno sent over the wire.
///
/// Syscall failures carry the raw OS errno; synthesized errors fall back to
/// the closest match.
pub fn errno_of(err: &io::Error) -> i32 {
    if let Some(errno) = err.raw_os_error() {
        return errno;
    }
    use io::ErrorKind::*;
    match err.kind() {
        NotFound => libc::ENOENT,
        PermissionDenied => libc::EACCES,
        AlreadyExists => libc::EEXIST,
        InvalidInput | InvalidData => libc::EINVAL,
        _ => libc::EIO,
    }
}
