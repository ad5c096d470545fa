//! 资源仓库
//!
//! Byte sources that scripts are read from. A [`Repository`] is a directory-like
//! container, a [`Resource`] is one named entry inside it. The worker core only
//! needs the identity of a resource ([`ResourceKey`]); reading and timestamp
//! checks are done by the script resolver.
//!
//! # 实现
//!
//! - [`file`] - 文件系统仓库
//! - [`memory`] - 内存仓库（容器式资源，时间戳由仓库统一提供）

pub mod file;
pub mod memory;

use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;

pub use file::{FileRepository, FileResource};
pub use memory::{MemoryRepository, MemoryResource};

/// Canonical identity of a resource.
///
/// Two resources are the same module source iff their canonical path strings
/// are equal, regardless of which repository handle produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    /// Create a key from a canonical path string.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self(Arc::from(path.as_ref()))
    }

    /// The canonical path.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A named byte source with an existence check and a modification time.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Resource name relative to its repository (e.g. `"utils.yx"`).
    fn name(&self) -> &str;

    /// Full canonical path.
    fn path(&self) -> &str;

    /// Canonical identity, derived from [`Resource::path`].
    fn key(&self) -> ResourceKey {
        ResourceKey::new(self.path())
    }

    /// Name without the file extension.
    fn base_name(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    fn exists(&self) -> bool;

    /// Modification time in milliseconds since the Unix epoch, 0 if unknown.
    fn last_modified(&self) -> u64;

    /// Length in bytes, 0 if unknown.
    fn length(&self) -> u64;

    fn open_stream(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Locator usable outside the runtime, if the backing store has one.
    fn url(&self) -> Option<String>;

    /// The repository containing this resource.
    fn repository(&self) -> Arc<dyn Repository>;

    /// Read the whole resource as UTF-8 text.
    fn read_to_string(&self) -> io::Result<String> {
        let mut content = String::new();
        self.open_stream()?.read_to_string(&mut content)?;
        Ok(content)
    }
}

/// A directory-like container of resources.
pub trait Repository: Send + Sync + fmt::Debug {
    /// Canonical path, always ending in `/`.
    fn path(&self) -> &str;

    fn exists(&self) -> bool;

    /// Modification time in milliseconds since the Unix epoch, 0 if unknown.
    fn last_modified(&self) -> u64;

    /// Get a resource by name. The resource may not exist; check [`Resource::exists`].
    fn get_resource(
        &self,
        name: &str,
    ) -> Arc<dyn Resource>;

    /// Get a child repository by name.
    fn child(
        &self,
        name: &str,
    ) -> Arc<dyn Repository>;

    fn parent(&self) -> Option<Arc<dyn Repository>>;

    /// List resources, optionally descending into child repositories.
    fn resources(
        &self,
        recursive: bool,
    ) -> io::Result<Vec<Arc<dyn Resource>>>;
}

/// Look up a `/`-separated relative path inside a repository.
///
/// `.` segments are skipped and `..` moves to the parent repository. Returns
/// `None` when `..` walks above the root.
pub fn lookup(
    repository: &Arc<dyn Repository>,
    path: &str,
) -> Option<Arc<dyn Resource>> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let name = segments.pop()?;
    let mut current = repository.clone();
    for segment in segments {
        current = match segment {
            "." => current,
            ".." => current.parent()?,
            child => current.child(child),
        };
    }
    Some(current.get_resource(name))
}

/// Collapse `.` and `..` segments of a `/`-separated path.
pub(crate) fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}
