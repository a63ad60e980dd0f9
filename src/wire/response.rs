//! Codec for the response union.

use std::io::{self, Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::attr::{decode_attr, decode_entry, encode_attr, encode_entry};
use super::{decode, encode, Error, Result};
use crate::message::{Response, MAX_IO_LEN, MAX_SYMLINK_LEN};

/// Hard bound on directory listing sizes; far above anything the tests or
/// real trees produce, low enough to stop a hostile peer.
const MAX_DIR_ENTRIES: usize = 1 << 20;

/// Discriminators of [`Response`] variants on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
enum Tag {
    Error = 0,
    Attr = 1,
    Directory = 2,
    Target = 3,
    Opened = 4,
    Data = 5,
    Written = 6,
    Unit = 7,
    Created = 8,
    Node = 9,
    Removed = 10,
    Renamed = 11,
}

pub fn encode(dest: &mut impl Write, response: &Response) -> io::Result<()> {
    match response {
        Response::Error { errno } => {
            encode::variant(dest, Tag::Error)?;
            encode::i32(dest, *errno)
        }
        Response::Attr { attr } => {
            encode::variant(dest, Tag::Attr)?;
            encode_attr(dest, attr)
        }
        Response::Directory { entries } => {
            encode::variant(dest, Tag::Directory)?;
            encode::usize_as_u32(dest, entries.len())?;
            for entry in entries {
                encode_entry(dest, entry)?;
            }
            Ok(())
        }
        Response::Target { target } => {
            encode::variant(dest, Tag::Target)?;
            encode::vec_max_size(dest, target, MAX_SYMLINK_LEN)
        }
        Response::Opened { handle, attr } => {
            encode::variant(dest, Tag::Opened)?;
            encode::u64(dest, *handle)?;
            encode_attr(dest, attr)
        }
        Response::Data { data } => {
            encode::variant(dest, Tag::Data)?;
            encode::vec_max_size(dest, data, MAX_IO_LEN)
        }
        Response::Written { written, attr } => {
            encode::variant(dest, Tag::Written)?;
            encode::u32(dest, *written)?;
            encode_attr(dest, attr)
        }
        Response::Unit => encode::variant(dest, Tag::Unit),
        Response::Created { handle, attr, parent } => {
            encode::variant(dest, Tag::Created)?;
            encode::u64(dest, *handle)?;
            encode_attr(dest, attr)?;
            encode_attr(dest, parent)
        }
        Response::Node { attr, parent } => {
            encode::variant(dest, Tag::Node)?;
            encode_attr(dest, attr)?;
            encode_attr(dest, parent)
        }
        Response::Removed { parent } => {
            encode::variant(dest, Tag::Removed)?;
            encode_attr(dest, parent)
        }
        Response::Renamed { from_parent, to_parent } => {
            encode::variant(dest, Tag::Renamed)?;
            encode_attr(dest, from_parent)?;
            encode_attr(dest, to_parent)
        }
    }
}

pub fn decode(src: &mut impl Read) -> Result<Response> {
    Ok(match decode::variant(src)? {
        Tag::Error => Response::Error { errno: decode::i32(src)? },
        Tag::Attr => Response::Attr { attr: decode_attr(src)? },
        Tag::Directory => {
            let count = decode::u32_as_usize(src)?;
            if count > MAX_DIR_ENTRIES {
                return Err(Error::MaxElemLimit);
            }
            let mut entries = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                entries.push(decode_entry(src)?);
            }
            Response::Directory { entries }
        }
        Tag::Target => Response::Target { target: decode::vec_max_size(src, MAX_SYMLINK_LEN)? },
        Tag::Opened => Response::Opened { handle: decode::u64(src)?, attr: decode_attr(src)? },
        Tag::Data => Response::Data { data: decode::vec_max_size(src, MAX_IO_LEN)? },
        Tag::Written => Response::Written { written: decode::u32(src)?, attr: decode_attr(src)? },
        Tag::Unit => Response::Unit,
        Tag::Created => Response::Created {
            handle: decode::u64(src)?,
            attr: decode_attr(src)?,
            parent: decode_attr(src)?,
        },
        Tag::Node => Response::Node { attr: decode_attr(src)?, parent: decode_attr(src)? },
        Tag::Removed => Response::Removed { parent: decode_attr(src)? },
        Tag::Renamed => Response::Renamed {
            from_parent: decode_attr(src)?,
            to_parent: decode_attr(src)?,
        },
    })
}
