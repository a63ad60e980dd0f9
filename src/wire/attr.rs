//! Codec for attribute records and directory entries, shared by the
//! request and response unions.

use std::io::{self, Read, Write};

use super::{decode, encode, Result};
use crate::message::{Attributes, DirEntry, FileTime};
use crate::path::MAX_NAME_LEN;

pub fn encode_time(dest: &mut impl Write, time: FileTime) -> io::Result<()> {
    encode::i64(dest, time.secs)?;
    encode::u32(dest, time.nanos)
}

pub fn decode_time(src: &mut impl Read) -> Result<FileTime> {
    Ok(FileTime { secs: decode::i64(src)?, nanos: decode::u32(src)? })
}

pub fn encode_attr(dest: &mut impl Write, attr: &Attributes) -> io::Result<()> {
    encode::variant(dest, attr.kind)?;
    encode::u32(dest, attr.mode)?;
    encode::u64(dest, attr.size)?;
    encode_time(dest, attr.mtime)?;
    encode_time(dest, attr.ctime)
}

pub fn decode_attr(src: &mut impl Read) -> Result<Attributes> {
    Ok(Attributes {
        kind: decode::variant(src)?,
        mode: decode::u32(src)?,
        size: decode::u64(src)?,
        mtime: decode_time(src)?,
        ctime: decode_time(src)?,
    })
}

pub fn encode_entry(dest: &mut impl Write, entry: &DirEntry) -> io::Result<()> {
    encode::string_max_size(dest, &entry.name, MAX_NAME_LEN)?;
    encode_attr(dest, &entry.attr)
}

pub fn decode_entry(src: &mut impl Read) -> Result<DirEntry> {
    Ok(DirEntry { name: decode::string_max_size(src, MAX_NAME_LEN)?, attr: decode_attr(src)? })
}
