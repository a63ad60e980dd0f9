//! Primitive wire parsing utilities, mirroring [`super::encode`].

use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};

use super::{Error, Result};
use crate::path::{VirtualPath, MAX_PATH_LEN};

/// Parses a `u32` in little-endian order.
pub fn u32(src: &mut impl Read) -> Result<u32> {
    src.read_u32::<LittleEndian>().map_err(Error::IO)
}

/// Parses a `u64` in little-endian order.
pub fn u64(src: &mut impl Read) -> Result<u64> {
    src.read_u64::<LittleEndian>().map_err(Error::IO)
}

/// Parses an `i32` in little-endian order.
pub fn i32(src: &mut impl Read) -> Result<i32> {
    src.read_i32::<LittleEndian>().map_err(Error::IO)
}

/// Parses an `i64` in little-endian order.
pub fn i64(src: &mut impl Read) -> Result<i64> {
    src.read_i64::<LittleEndian>().map_err(Error::IO)
}

/// Parses a bool encoded as a `u32` holding `0` or `1`.
pub fn bool(src: &mut impl Read) -> Result<bool> {
    match u32(src)? {
        0 => Ok(false),
        1 => Ok(true),
        tag => Err(Error::EnumDiscMismatch(tag)),
    }
}

/// Parses an optional value: bool discriminator, then the value if present.
pub fn option<T, S: Read>(
    src: &mut S,
    cont: impl FnOnce(&mut S) -> Result<T>,
) -> Result<Option<T>> {
    match bool(src)? {
        true => Ok(Some(cont(src)?)),
        false => Ok(None),
    }
}

/// Parses a counted byte vector with a maximum allowed size.
pub fn vec_max_size(src: &mut impl Read, max_size: usize) -> Result<Vec<u8>> {
    let size = u32_as_usize(src)?;
    if size > max_size {
        return Err(Error::MaxElemLimit);
    }
    let mut vec = vec![0u8; size];
    src.read_exact(vec.as_mut_slice()).map_err(Error::IO)?;
    Ok(vec)
}

/// Parses a bounded UTF-8 string from a counted byte vector.
pub fn string_max_size(src: &mut impl Read, max_size: usize) -> Result<String> {
    let vec = vec_max_size(src, max_size)?;
    String::from_utf8(vec).map_err(Error::IncorrectString)
}

/// Parses a virtual path, checking only the wire bounds.
pub fn path(src: &mut impl Read) -> Result<VirtualPath> {
    VirtualPath::from_wire(string_max_size(src, MAX_PATH_LEN)?).map_err(Error::IncorrectPath)
}

/// Parses an enum discriminator into its variant.
pub fn variant<T: FromPrimitive>(src: &mut impl Read) -> Result<T> {
    let tag = u32(src)?;
    FromPrimitive::from_u32(tag).ok_or(Error::EnumDiscMismatch(tag))
}

/// Parses a `u32` and converts it to `usize`.
pub fn u32_as_usize(src: &mut impl Read) -> Result<usize> {
    // u32 always fits in usize on the supported targets.
    Ok(u32(src)?.to_usize().unwrap_or(usize::MAX))
}
