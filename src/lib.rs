//! rewofs - mounts a remote directory tree as a local FUSE filesystem.
//!
//! A server process owns a real directory subtree and executes filesystem
//! operations on behalf of remote clients. A client process mounts a virtual
//! filesystem and forwards every kernel upcall over a framed, message-based
//! transport, keeping a server-invalidated cache of tree metadata and file
//! contents in between.

pub mod client;
pub mod config;
pub mod message;
pub mod path;
pub mod server;
pub mod transport;
pub mod wire;
