//! Socket endpoints shared by both peers.
//!
//! An endpoint URI selects the transport flavor: `ipc://<absolute-path>`
//! for a Unix domain socket, `tcp://host:port` for TCP. Both flavors carry
//! the same framed byte stream; everything above this module is
//! transport-agnostic.

pub mod client;

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};

/// Read side of an established connection.
pub type ReadHalf = Box<dyn AsyncRead + Send + Unpin>;

/// Write side of an established connection.
pub type WriteHalf = Box<dyn AsyncWrite + Send + Unpin>;

/// A parsed endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `ipc://<absolute socket path>`
    Ipc(PathBuf),
}

/// Rejected endpoint URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    UnknownScheme(String),
    MissingPort(String),
    RelativeSocketPath(String),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointError::UnknownScheme(uri) => {
                write!(f, "unknown endpoint scheme in {uri:?}, expected tcp:// or ipc://")
            }
            EndpointError::MissingPort(uri) => write!(f, "tcp endpoint {uri:?} lacks a port"),
            EndpointError::RelativeSocketPath(uri) => {
                write!(f, "ipc endpoint {uri:?} must use an absolute path")
            }
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = uri.strip_prefix("tcp://") {
            if !addr.contains(':') {
                return Err(EndpointError::MissingPort(uri.to_owned()));
            }
            Ok(Endpoint::Tcp(addr.to_owned()))
        } else if let Some(path) = uri.strip_prefix("ipc://") {
            if !path.starts_with('/') {
                return Err(EndpointError::RelativeSocketPath(uri.to_owned()));
            }
            Ok(Endpoint::Ipc(PathBuf::from(path)))
        } else {
            Err(EndpointError::UnknownScheme(uri.to_owned()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

/// A bound listening socket of either flavor.
pub enum Listener {
    Tcp(TcpListener),
    Ipc(UnixListener),
}

impl Listener {
    pub async fn bind(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            Endpoint::Ipc(path) => {
                // A stale socket file from a previous run would fail the bind.
                match std::fs::remove_file(path) {
                    Ok(_) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err),
                }
                Ok(Listener::Ipc(UnixListener::bind(path)?))
            }
        }
    }

    pub async fn accept(&self) -> io::Result<Stream> {
        match self {
            Listener::Tcp(listener) => {
                let (socket, _) = listener.accept().await?;
                socket.set_nodelay(true)?;
                Ok(Stream::Tcp(socket))
            }
            Listener::Ipc(listener) => {
                let (socket, _) = listener.accept().await?;
                Ok(Stream::Ipc(socket))
            }
        }
    }

    /// The endpoint the listener actually bound, with any ephemeral port
    /// resolved. Used by tests that bind `tcp://127.0.0.1:0`.
    pub fn local_endpoint(&self) -> io::Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            Listener::Ipc(listener) => {
                let addr = listener.local_addr()?;
                let path = addr
                    .as_pathname()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unnamed socket"))?;
                Ok(Endpoint::Ipc(path.to_path_buf()))
            }
        }
    }
}

/// An established connection of either flavor.
pub enum Stream {
    Tcp(TcpStream),
    Ipc(UnixStream),
}

impl Stream {
    pub async fn connect(endpoint: &Endpoint) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let socket = TcpStream::connect(addr).await?;
                socket.set_nodelay(true)?;
                Ok(Stream::Tcp(socket))
            }
            Endpoint::Ipc(path) => Ok(Stream::Ipc(UnixStream::connect(path).await?)),
        }
    }

    pub fn into_split(self) -> (ReadHalf, WriteHalf) {
        match self {
            Stream::Tcp(socket) => {
                let (read, write) = socket.into_split();
                (Box::new(read), Box::new(write))
            }
            Stream::Ipc(socket) => {
                let (read, write) = socket.into_split();
                (Box::new(read), Box::new(write))
            }
        }
    }
}
