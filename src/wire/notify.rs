//! Codec for invalidation notifications.

use std::io::{self, Read, Write};

use super::{decode, encode, Result};
use crate::message::Invalidation;

pub fn encode(dest: &mut impl Write, event: &Invalidation) -> io::Result<()> {
    encode::variant(dest, event.reason)?;
    encode::path(dest, &event.path)
}

pub fn decode(src: &mut impl Read) -> Result<Invalidation> {
    Ok(Invalidation { reason: decode::variant(src)?, path: decode::path(src)? })
}
