//! Codec for the request union.

use std::io::{self, Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::attr::{decode_time, encode_time};
use super::{decode, encode, Result};
use crate::message::{Request, MAX_IO_LEN, MAX_SYMLINK_LEN};

/// Discriminators of [`Request`] variants on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
enum Tag {
    Stat = 1,
    ReadDir = 2,
    ReadLink = 3,
    Open = 4,
    Read = 5,
    Write = 6,
    Close = 7,
    Create = 8,
    MkDir = 9,
    RmDir = 10,
    Unlink = 11,
    SymLink = 12,
    Rename = 13,
    ChMod = 14,
    Truncate = 15,
    SetTimes = 16,
}

pub fn encode(dest: &mut impl Write, request: &Request) -> io::Result<()> {
    match request {
        Request::Stat { path } => {
            encode::variant(dest, Tag::Stat)?;
            encode::path(dest, path)
        }
        Request::ReadDir { path } => {
            encode::variant(dest, Tag::ReadDir)?;
            encode::path(dest, path)
        }
        Request::ReadLink { path } => {
            encode::variant(dest, Tag::ReadLink)?;
            encode::path(dest, path)
        }
        Request::Open { path, flags, mode } => {
            encode::variant(dest, Tag::Open)?;
            encode::path(dest, path)?;
            encode::u32(dest, *flags)?;
            encode::u32(dest, *mode)
        }
        Request::Read { handle, offset, len } => {
            encode::variant(dest, Tag::Read)?;
            encode::u64(dest, *handle)?;
            encode::u64(dest, *offset)?;
            encode::u32(dest, *len)
        }
        Request::Write { handle, offset, data } => {
            encode::variant(dest, Tag::Write)?;
            encode::u64(dest, *handle)?;
            encode::u64(dest, *offset)?;
            encode::vec_max_size(dest, data, MAX_IO_LEN)
        }
        Request::Close { handle } => {
            encode::variant(dest, Tag::Close)?;
            encode::u64(dest, *handle)
        }
        Request::Create { path, flags, mode } => {
            encode::variant(dest, Tag::Create)?;
            encode::path(dest, path)?;
            encode::u32(dest, *flags)?;
            encode::u32(dest, *mode)
        }
        Request::MkDir { path, mode } => {
            encode::variant(dest, Tag::MkDir)?;
            encode::path(dest, path)?;
            encode::u32(dest, *mode)
        }
        Request::RmDir { path } => {
            encode::variant(dest, Tag::RmDir)?;
            encode::path(dest, path)
        }
        Request::Unlink { path } => {
            encode::variant(dest, Tag::Unlink)?;
            encode::path(dest, path)
        }
        Request::SymLink { path, target } => {
            encode::variant(dest, Tag::SymLink)?;
            encode::path(dest, path)?;
            encode::vec_max_size(dest, target, MAX_SYMLINK_LEN)
        }
        Request::Rename { from, to } => {
            encode::variant(dest, Tag::Rename)?;
            encode::path(dest, from)?;
            encode::path(dest, to)
        }
        Request::ChMod { path, mode } => {
            encode::variant(dest, Tag::ChMod)?;
            encode::path(dest, path)?;
            encode::u32(dest, *mode)
        }
        Request::Truncate { path, size } => {
            encode::variant(dest, Tag::Truncate)?;
            encode::path(dest, path)?;
            encode::u64(dest, *size)
        }
        Request::SetTimes { path, atime, mtime } => {
            encode::variant(dest, Tag::SetTimes)?;
            encode::path(dest, path)?;
            encode::option(dest, *atime, encode_time)?;
            encode::option(dest, *mtime, encode_time)
        }
    }
}

pub fn decode(src: &mut impl Read) -> Result<Request> {
    Ok(match decode::variant(src)? {
        Tag::Stat => Request::Stat { path: decode::path(src)? },
        Tag::ReadDir => Request::ReadDir { path: decode::path(src)? },
        Tag::ReadLink => Request::ReadLink { path: decode::path(src)? },
        Tag::Open => Request::Open {
            path: decode::path(src)?,
            flags: decode::u32(src)?,
            mode: decode::u32(src)?,
        },
        Tag::Read => Request::Read {
            handle: decode::u64(src)?,
            offset: decode::u64(src)?,
            len: decode::u32(src)?,
        },
        Tag::Write => Request::Write {
            handle: decode::u64(src)?,
            offset: decode::u64(src)?,
            data: decode::vec_max_size(src, MAX_IO_LEN)?,
        },
        Tag::Close => Request::Close { handle: decode::u64(src)? },
        Tag::Create => Request::Create {
            path: decode::path(src)?,
            flags: decode::u32(src)?,
            mode: decode::u32(src)?,
        },
        Tag::MkDir => Request::MkDir { path: decode::path(src)?, mode: decode::u32(src)? },
        Tag::RmDir => Request::RmDir { path: decode::path(src)? },
        Tag::Unlink => Request::Unlink { path: decode::path(src)? },
        Tag::SymLink => Request::SymLink {
            path: decode::path(src)?,
            target: decode::vec_max_size(src, MAX_SYMLINK_LEN)?,
        },
        Tag::Rename => Request::Rename { from: decode::path(src)?, to: decode::path(src)? },
        Tag::ChMod => Request::ChMod { path: decode::path(src)?, mode: decode::u32(src)? },
        Tag::Truncate => Request::Truncate { path: decode::path(src)?, size: decode::u64(src)? },
        Tag::SetTimes => Request::SetTimes {
            path: decode::path(src)?,
            atime: decode::option(src, decode_time)?,
            mtime: decode::option(src, decode_time)?,
        },
    })
}
