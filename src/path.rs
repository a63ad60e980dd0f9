//! Virtual paths: normalized, server-relative POSIX paths.

use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Maximum length of a single name component.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum byte length of a virtual path on the wire.
pub const MAX_PATH_LEN: usize = 4096;

/// Result of path construction with error type [`PathError`].
pub type Result<T> = std::result::Result<T, PathError>;

/// Rejected path or name component.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path does not begin with `/`.
    NotAbsolute,
    /// The path or a component exceeds its length bound.
    TooLong,
    /// A name is empty, is `.` or `..`, or spans multiple components.
    BadComponent,
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::NotAbsolute => write!(f, "path is not absolute"),
            PathError::TooLong => write!(f, "path or name too long"),
            PathError::BadComponent => write!(f, "invalid name component"),
        }
    }
}

/// A server-relative POSIX path beginning with `/`.
///
/// Client code only builds virtual paths through [`VirtualPath::root`] and
/// [`VirtualPath::join`], so locally constructed paths never contain `.` or
/// `..` components. Paths decoded from the wire are merely bounds-checked;
/// the server walks their components and refuses any that would escape the
/// exported root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath(String);

impl VirtualPath {
    /// The root of the remote tree, `/`.
    pub fn root() -> Self {
        Self("/".to_owned())
    }

    /// Wraps an absolute path string, checking only the wire bounds.
    pub fn from_wire(raw: String) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(PathError::NotAbsolute);
        }
        if raw.len() > MAX_PATH_LEN {
            return Err(PathError::TooLong);
        }
        Ok(Self(raw))
    }

    /// Appends a single validated name component.
    pub fn join(&self, name: &str) -> Result<Self> {
        validate_name(name)?;
        let mut joined = self.0.clone();
        if !joined.ends_with('/') {
            joined.push('/');
        }
        joined.push_str(name);
        if joined.len() > MAX_PATH_LEN {
            return Err(PathError::TooLong);
        }
        Ok(Self(joined))
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_owned())),
            None => None,
        }
    }

    /// The final name component, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rfind('/').map(|idx| &self.0[idx + 1..])
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` equals `other` or lies beneath it.
    pub fn is_under(&self, other: &VirtualPath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0
            || (self.0.starts_with(&other.0) && self.0.as_bytes()[other.0.len()] == b'/')
    }

    /// Re-roots a path from the `from` subtree into the `to` subtree.
    ///
    /// The caller guarantees `self.is_under(from)`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Self {
        if self.0 == from.0 {
            return to.clone();
        }
        let tail = &self.0[from.0.len()..];
        if to.is_root() {
            Self(format!("/{}", &tail[1..]))
        } else {
            Self(format!("{}{}", to.0, tail))
        }
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(PathError::BadComponent);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(PathError::TooLong);
    }
    if name.contains('/') {
        return Err(PathError::BadComponent);
    }
    Ok(())
}

/// Maps a virtual path onto the exported root directory.
///
/// Walks the components one by one and refuses `..` (and any other escape
/// hatch) instead of letting the host resolve it, so a hostile client cannot
/// reach outside the export.
pub fn resolve(root: &Path, path: &VirtualPath) -> Option<PathBuf> {
    let mut real = root.to_path_buf();
    for component in Path::new(path.as_str()).components() {
        match component {
            Component::RootDir => {}
            Component::Normal(name) => real.push(name),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(real)
}

/// Expresses a real path under `root` as a virtual path.
///
/// Used by the change watcher to translate inotify paths back into the
/// client-visible namespace. Returns `None` for paths outside the root or
/// with non-UTF-8 names.
pub fn virtualize(root: &Path, real: &Path) -> Option<VirtualPath> {
    let rel = real.strip_prefix(root).ok()?;
    let mut path = VirtualPath::root();
    for component in rel.components() {
        match component {
            Component::Normal(name) => path = path.join(name.to_str()?).ok()?,
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}
