//! 内存仓库
//!
//! A container-backed repository: entries live in one shared store and every
//! resource reports the container's modification time, the way archive or
//! web-application resources do. Existence of a resource handle is computed
//! once and cached.

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;

use super::{normalize, Repository, Resource};

#[derive(Debug)]
struct Store {
    name: String,
    entries: RwLock<BTreeMap<String, Arc<[u8]>>>,
    modified: AtomicU64,
}

impl Store {
    /// Bump the container timestamp. Strictly increasing even within one millisecond.
    fn touch(&self) {
        let now = now_millis();
        let _ = self
            .modified
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            });
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// In-memory repository handle. Cloning shares the same store.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    store: Arc<Store>,
    /// Directory prefix inside the store, empty or ending in `/`.
    prefix: String,
    path: String,
}

impl MemoryRepository {
    /// Create an empty root repository.
    pub fn new(name: impl Into<String>) -> Self {
        let store = Arc::new(Store {
            name: name.into(),
            entries: RwLock::new(BTreeMap::new()),
            modified: AtomicU64::new(now_millis()),
        });
        Self::with_prefix(store, String::new())
    }

    fn with_prefix(
        store: Arc<Store>,
        prefix: String,
    ) -> Self {
        let path = format!("memory:{}/{}", store.name, prefix);
        Self {
            store,
            prefix,
            path,
        }
    }

    /// Insert or replace an entry. `path` is relative to this repository.
    pub fn insert(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
    ) {
        let full = normalize(&format!("{}{}", self.prefix, path));
        self.store
            .entries
            .write()
            .insert(full, Arc::from(content.as_ref()));
        self.store.touch();
    }

    /// Remove an entry, returning whether it existed.
    pub fn remove(
        &self,
        path: &str,
    ) -> bool {
        let full = normalize(&format!("{}{}", self.prefix, path));
        let removed = self.store.entries.write().remove(&full).is_some();
        if removed {
            self.store.touch();
        }
        removed
    }

    /// Mark the whole container as modified.
    pub fn touch(&self) {
        self.store.touch();
    }
}

impl Repository for MemoryRepository {
    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        self.store
            .entries
            .read()
            .keys()
            .any(|k| k.starts_with(&self.prefix))
    }

    fn last_modified(&self) -> u64 {
        self.store.modified.load(Ordering::SeqCst)
    }

    fn get_resource(
        &self,
        name: &str,
    ) -> Arc<dyn Resource> {
        Arc::new(MemoryResource {
            repository: self.clone(),
            entry: normalize(&format!("{}{}", self.prefix, name)),
            name: name.to_string(),
            path: format!("{}{}", self.path, name),
            exists: OnceLock::new(),
        })
    }

    fn child(
        &self,
        name: &str,
    ) -> Arc<dyn Repository> {
        let prefix = normalize(&format!("{}{}", self.prefix, name));
        Arc::new(Self::with_prefix(self.store.clone(), format!("{}/", prefix)))
    }

    fn parent(&self) -> Option<Arc<dyn Repository>> {
        if self.prefix.is_empty() {
            return None;
        }
        let trimmed = self.prefix.trim_end_matches('/');
        let parent = match trimmed.rfind('/') {
            Some(idx) => format!("{}/", &trimmed[..idx]),
            None => String::new(),
        };
        Some(Arc::new(Self::with_prefix(self.store.clone(), parent)))
    }

    fn resources(
        &self,
        recursive: bool,
    ) -> io::Result<Vec<Arc<dyn Resource>>> {
        let names: Vec<String> = self
            .store
            .entries
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(&self.prefix))
            .filter(|rest| recursive || !rest.contains('/'))
            .map(str::to_string)
            .collect();
        Ok(names.iter().map(|n| self.get_resource(n)).collect())
    }
}

/// A resource inside a [`MemoryRepository`].
#[derive(Debug)]
pub struct MemoryResource {
    repository: MemoryRepository,
    entry: String,
    name: String,
    path: String,
    exists: OnceLock<bool>,
}

impl Resource for MemoryResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn exists(&self) -> bool {
        *self.exists.get_or_init(|| {
            self.repository
                .store
                .entries
                .read()
                .contains_key(&self.entry)
        })
    }

    fn last_modified(&self) -> u64 {
        self.repository.last_modified()
    }

    fn length(&self) -> u64 {
        0
    }

    fn open_stream(&self) -> io::Result<Box<dyn Read + Send>> {
        let content = self
            .repository
            .store
            .entries
            .read()
            .get(&self.entry)
            .cloned()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found", self.path))
            })?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn url(&self) -> Option<String> {
        self.exists().then(|| self.path.clone())
    }

    fn repository(&self) -> Arc<dyn Repository> {
        Arc::new(self.repository.clone())
    }
}
