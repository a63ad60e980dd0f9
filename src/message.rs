//! Wire-visible data model shared by client and server.

use num_derive::{FromPrimitive, ToPrimitive};

use crate::path::VirtualPath;

/// Maximum byte length of a symlink target; longer targets are truncated.
pub const MAX_SYMLINK_LEN: usize = 1024;

/// Maximum byte length of a single read or write payload.
pub const MAX_IO_LEN: usize = 1 << 20;

/// Open-mode bits carried by [`Request::Open`] and [`Request::Create`].
///
/// Deliberately a private vocabulary rather than raw host `O_*` values so
/// that both peers agree regardless of their libc.
pub mod open_flags {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    pub const APPEND: u32 = 1 << 2;
    pub const TRUNCATE: u32 = 1 << 3;
    pub const CREATE: u32 = 1 << 4;
    pub const EXCLUSIVE: u32 = 1 << 5;
}

/// Kind of a filesystem object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum FileKind {
    Unknown = 0,
    Directory = 1,
    Regular = 2,
    Symlink = 3,
}

/// A point in time as the server's `lstat` reports it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileTime {
    pub secs: i64,
    pub nanos: u32,
}

/// Attributes of one filesystem object, always server-supplied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub kind: FileKind,
    /// Full `st_mode` (type and permission bits).
    pub mode: u32,
    pub size: u64,
    pub mtime: FileTime,
    pub ctime: FileTime,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: Attributes,
}

/// A request as sent by the client, paired with a correlation id in [`Call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Stat { path: VirtualPath },
    ReadDir { path: VirtualPath },
    ReadLink { path: VirtualPath },
    Open { path: VirtualPath, flags: u32, mode: u32 },
    Read { handle: u64, offset: u64, len: u32 },
    Write { handle: u64, offset: u64, data: Vec<u8> },
    Close { handle: u64 },
    Create { path: VirtualPath, flags: u32, mode: u32 },
    MkDir { path: VirtualPath, mode: u32 },
    RmDir { path: VirtualPath },
    Unlink { path: VirtualPath },
    SymLink { path: VirtualPath, target: Vec<u8> },
    Rename { from: VirtualPath, to: VirtualPath },
    ChMod { path: VirtualPath, mode: u32 },
    Truncate { path: VirtualPath, size: u64 },
    SetTimes { path: VirtualPath, atime: Option<FileTime>, mtime: Option<FileTime> },
}

/// A reply to one [`Request`].
///
/// Mutating replies piggyback fresh attributes of the object and of the
/// affected directories so the client can mirror server timestamps without a
/// second round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The operation failed with a POSIX errno, forwarded verbatim.
    Error { errno: i32 },
    /// `stat`, `chmod`, `truncate` and `set_times` result.
    Attr { attr: Attributes },
    /// `readdir` result.
    Directory { entries: Vec<DirEntry> },
    /// `readlink` result, at most [`MAX_SYMLINK_LEN`] bytes.
    Target { target: Vec<u8> },
    /// `open` result.
    Opened { handle: u64, attr: Attributes },
    /// `read` result; short only at end of file.
    Data { data: Vec<u8> },
    /// `write` result with the file's post-write attributes.
    Written { written: u32, attr: Attributes },
    /// `close` result.
    Unit,
    /// `create` result.
    Created { handle: u64, attr: Attributes, parent: Attributes },
    /// `mkdir` and `symlink` result.
    Node { attr: Attributes, parent: Attributes },
    /// `rmdir` and `unlink` result.
    Removed { parent: Attributes },
    /// `rename` result with both affected directories restated.
    Renamed { from_parent: Attributes, to_parent: Attributes },
}

impl Response {
    pub fn errno(errno: i32) -> Self {
        Response::Error { errno }
    }
}

/// Why a cached entry may be stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum InvalidateReason {
    /// Contents or metadata of the object changed.
    Changed = 0,
    /// The object was removed or renamed away.
    Removed = 1,
    /// The set of names inside a directory changed.
    TreeChanged = 2,
}

/// Server-originated notification that a cached entry may be stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub path: VirtualPath,
    pub reason: InvalidateReason,
}

/// A correlated request as it travels client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub id: u64,
    pub request: Request,
}

/// Anything the server sends down the same stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Reply to the call with the same id.
    Reply { id: u64, response: Response },
    /// Fire-and-forget invalidation event.
    Event(Invalidation),
}
