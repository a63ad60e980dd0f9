//! Binary wire codec and session framing.
//!
//! Every frame on the transport is `{length: u32 LE, payload}`. The payload
//! is one encoded [`Call`] (client to server) or one [`ServerMessage`]
//! (server to client). All scalars are little-endian; byte vectors are
//! length-counted; enum discriminators are `u32` values checked against the
//! schema. Anything that does not decode cleanly is a protocol error and
//! fatal to the session.

mod attr;
pub mod decode;
pub mod encode;
mod notify;
mod request;
mod response;


use std::io::{self, Cursor};
use std::string::FromUtf8Error;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{Call, Invalidation, Request, Response, ServerMessage};
use crate::path::PathError;

/// Refuse frames larger than this; bounds memory per connection.
pub const MAX_FRAME_LEN: usize = 4 << 20;

/// Result of decoding operations with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol errors. All of them terminate the session.
#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    /// A frame length exceeded [`MAX_FRAME_LEN`].
    FrameTooLarge(usize),
    /// An enum discriminator had no matching variant.
    EnumDiscMismatch(u32),
    /// A counted vector exceeded its schema bound.
    MaxElemLimit,
    /// A string field was not valid UTF-8.
    IncorrectString(FromUtf8Error),
    /// A path field failed its wire bounds.
    IncorrectPath(PathError),
    /// Payload bytes remained after a complete message.
    TrailingBytes,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IO(err) => write!(f, "i/o error: {err}"),
            Error::FrameTooLarge(len) => write!(f, "frame of {len} bytes exceeds limit"),
            Error::EnumDiscMismatch(tag) => write!(f, "unknown discriminator {tag}"),
            Error::MaxElemLimit => write!(f, "counted field exceeds schema bound"),
            Error::IncorrectString(err) => write!(f, "malformed string: {err}"),
            Error::IncorrectPath(err) => write!(f, "malformed path: {err}"),
            Error::TrailingBytes => write!(f, "trailing bytes after message"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

/// Reads one frame payload. `Ok(None)` signals a clean end of stream.
pub async fn read_frame<S: AsyncRead + Unpin>(src: &mut S) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match src.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(Error::IO(err)),
    }
    let mut header = &header[..];
    let len = ReadBytesExt::read_u32::<LittleEndian>(&mut header)? as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    src.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame: length header followed by the payload.
pub async fn write_frame<S: AsyncWrite + Unpin>(dst: &mut S, payload: &[u8]) -> io::Result<()> {
    let mut header = Vec::with_capacity(4);
    WriteBytesExt::write_u32::<LittleEndian>(&mut header, payload.len() as u32)?;
    dst.write_all(&header).await?;
    dst.write_all(payload).await?;
    dst.flush().await
}

/// Encodes a correlated request into a frame payload.
pub fn encode_call(id: u64, request: &Request) -> Vec<u8> {
    let mut payload = Vec::new();
    encode::u64(&mut payload, id).and_then(|_| request::encode(&mut payload, request))
        .expect("encoding into a Vec cannot fail");
    payload
}

/// Decodes a frame payload into a correlated request.
pub fn decode_call(payload: &[u8]) -> Result<Call> {
    let mut src = Cursor::new(payload);
    let id = decode::u64(&mut src)?;
    let request = request::decode(&mut src)?;
    finish(src)?;
    Ok(Call { id, request })
}

/// Encodes a reply to the call with the given id.
pub fn encode_reply(id: u64, response: &Response) -> Vec<u8> {
    let mut payload = Vec::new();
    encode::u32(&mut payload, server_msg::REPLY)
        .and_then(|_| encode::u64(&mut payload, id))
        .and_then(|_| response::encode(&mut payload, response))
        .expect("encoding into a Vec cannot fail");
    payload
}

/// Encodes a fire-and-forget invalidation event.
pub fn encode_event(event: &Invalidation) -> Vec<u8> {
    let mut payload = Vec::new();
    encode::u32(&mut payload, server_msg::EVENT)
        .and_then(|_| notify::encode(&mut payload, event))
        .expect("encoding into a Vec cannot fail");
    payload
}

/// Decodes a frame payload coming down from the server.
pub fn decode_server_message(payload: &[u8]) -> Result<ServerMessage> {
    let mut src = Cursor::new(payload);
    let msg = match decode::u32(&mut src)? {
        server_msg::REPLY => {
            let id = decode::u64(&mut src)?;
            let response = response::decode(&mut src)?;
            ServerMessage::Reply { id, response }
        }
        server_msg::EVENT => ServerMessage::Event(notify::decode(&mut src)?),
        tag => return Err(Error::EnumDiscMismatch(tag)),
    };
    finish(src)?;
    Ok(msg)
}

mod server_msg {
    pub const REPLY: u32 = 0;
    pub const EVENT: u32 = 1;
}

fn finish(src: Cursor<&[u8]>) -> Result<()> {
    if src.position() as usize != src.get_ref().len() {
        return Err(Error::TrailingBytes);
    }
    Ok(())
}
