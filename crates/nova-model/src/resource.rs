use std::fmt;
use std::io;

use crate::handle::{ElementKind, Handle};

/// Workspace-relative, `/`-separated path of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        let trimmed = path.trim_matches('/');
        if trimmed.len() == path.len() {
            Self(path)
        } else {
            Self(trimmed.to_owned())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            return Self::new(segment);
        }
        if segment.is_empty() {
            return self.clone();
        }
        Self::new(format!("{}/{segment}", self.0))
    }

    /// Maps an openable handle to the resource backing it.
    ///
    /// Working copies map to their original's resource; members and the
    /// model root have no resource of their own.
    pub fn for_handle(handle: &Handle) -> Option<Self> {
        match handle.kind() {
            ElementKind::Root => Some(Self::new(handle.name())),
            ElementKind::Package => {
                let root = Self::for_handle(handle.parent()?)?;
                let relative = handle.name().replace('.', "/");
                Some(root.join(&relative))
            }
            ElementKind::CompilationUnit => {
                let package = Self::for_handle(handle.parent()?)?;
                Some(package.join(handle.name()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single entry returned by [`ResourceLayer::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Persistent storage backing the element model.
///
/// The model never owns persisted state: every byte it reads or writes goes
/// through this trait.
pub trait ResourceLayer: Send + Sync {
    /// Reads the raw contents of `path`, decoded from `encoding` into UTF-8.
    fn read_bytes(&self, path: &ResourcePath, encoding: &str) -> io::Result<Vec<u8>>;

    fn write_bytes(&self, path: &ResourcePath, contents: &[u8]) -> io::Result<()>;

    fn delete(&self, path: &ResourcePath) -> io::Result<()>;

    /// Returns whether `path` exists and can be read.
    fn is_accessible(&self, path: &ResourcePath) -> bool;

    /// Lists the direct children of a folder.
    fn list(&self, path: &ResourcePath) -> io::Result<Vec<ResourceEntry>>;
}
