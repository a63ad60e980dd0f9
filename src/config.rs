//! Optional TOML configuration for tunables the CLI does not cover.
//!
//! Everything has a default; a missing file means defaults throughout.
//!
//! ```toml
//! [cache]
//! content_capacity = 1024
//!
//! [watch]
//! coalesce_window_ms = 100
//!
//! [reconnect]
//! initial_delay_ms = 100
//! max_delay_ms = 5000
//! ```

use std::fmt;
use std::io;
use std::path::Path;

use serde::Deserialize;

/// Result of configuration loading with error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "cannot read config: {err}"),
            Error::Parse(err) => write!(f, "cannot parse config: {err}"),
        }
    }
}

/// All tunables, with working defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache: CacheSettings,
    pub watch: WatchSettings,
    pub reconnect: ReconnectSettings,
}

/// Client cache sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Number of files whose contents may be cached at once.
    pub content_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { content_capacity: 1024 }
    }
}

/// Server-side change watcher behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    /// Window within which filesystem events coalesce before publishing.
    pub coalesce_window_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { coalesce_window_ms: 100 }
    }
}

/// Client reconnection backoff bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self { initial_delay_ms: 100, max_delay_ms: 5000 }
    }
}

impl Settings {
    /// Loads the file, or returns defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(Error::IO)?;
                toml::from_str(&raw).map_err(Error::Parse)
            }
            None => Ok(Self::default()),
        }
    }
}
