//! Primitive wire serialization utilities.
//!
//! All scalars are little-endian. Counted vectors are a `u32` length
//! followed by the raw bytes; no alignment padding.

use std::io::{self, Error, ErrorKind, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use num_traits::ToPrimitive;

use crate::path::VirtualPath;

/// Serializes a `u32` in little-endian order.
pub fn u32(dest: &mut dyn Write, n: u32) -> io::Result<()> {
    dest.write_u32::<LittleEndian>(n)
}

/// Serializes a `u64` in little-endian order.
pub fn u64(dest: &mut dyn Write, n: u64) -> io::Result<()> {
    dest.write_u64::<LittleEndian>(n)
}

/// Serializes an `i32` in little-endian order.
pub fn i32(dest: &mut dyn Write, n: i32) -> io::Result<()> {
    dest.write_i32::<LittleEndian>(n)
}

/// Serializes an `i64` in little-endian order.
pub fn i64(dest: &mut dyn Write, n: i64) -> io::Result<()> {
    dest.write_i64::<LittleEndian>(n)
}

/// Serializes a bool as a `u32` holding `0` or `1`.
pub fn bool(dest: &mut dyn Write, b: bool) -> io::Result<()> {
    u32(dest, b as u32)
}

/// Serializes an optional value as a bool discriminator followed by the
/// value when present.
pub fn option<T, S: Write>(
    dest: &mut S,
    opt: Option<T>,
    cont: impl FnOnce(&mut S, T) -> io::Result<()>,
) -> io::Result<()> {
    match opt {
        Some(val) => bool(dest, true).and_then(|_| cont(dest, val)),
        None => bool(dest, false),
    }
}

/// Serializes a counted byte vector: length + bytes.
pub fn vector(dest: &mut dyn Write, vec: &[u8]) -> io::Result<()> {
    let len = vec
        .len()
        .try_into()
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "vector length exceeds u32"))?;
    dest.write_u32::<LittleEndian>(len).and_then(|_| dest.write_all(vec))
}

/// Serializes a counted byte vector with an explicit maximum length check.
pub fn vec_max_size(dest: &mut dyn Write, vec: &[u8], max_size: usize) -> io::Result<()> {
    if vec.len() > max_size {
        return Err(Error::new(ErrorKind::InvalidInput, "vector out of bounds"));
    }
    vector(dest, vec)
}

/// Serializes a bounded UTF-8 string as a counted byte vector.
pub fn string_max_size(dest: &mut dyn Write, string: &str, max_size: usize) -> io::Result<()> {
    vec_max_size(dest, string.as_bytes(), max_size)
}

/// Serializes a virtual path.
pub fn path(dest: &mut dyn Write, path: &VirtualPath) -> io::Result<()> {
    string_max_size(dest, path.as_str(), crate::path::MAX_PATH_LEN)
}

/// Serializes an enum discriminator / union tag as a `u32`.
pub fn variant<T: ToPrimitive>(dest: &mut impl Write, val: T) -> io::Result<()> {
    u32(
        dest,
        ToPrimitive::to_u32(&val)
            .ok_or(Error::new(ErrorKind::InvalidInput, "cannot convert to u32"))?,
    )
}

/// Serializes a `usize` as a `u32`, failing on overflow.
pub fn usize_as_u32(dest: &mut dyn Write, n: usize) -> io::Result<()> {
    u32(dest, n.to_u32().ok_or(Error::new(ErrorKind::InvalidInput, "cannot convert to u32"))?)
}
