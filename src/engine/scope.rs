//! 模块作用域
//!
//! A module environment is the stateful scope produced by loading a module.
//! The worker stores and hands out environments by identity; the only thing it
//! reads from one is a property, when `invoke` looks a function up by name.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::value::Value;
use crate::repository::{Repository, ResourceKey};

/// Scope object produced by the interpreter.
pub trait Scope: Send + Sync + fmt::Debug {
    /// Scope name (module id for module scopes).
    fn name(&self) -> &str;

    fn get(
        &self,
        name: &str,
    ) -> Option<Value>;

    fn set(
        &self,
        name: &str,
        value: Value,
    );

    /// Repository the scope's source lives in; the search scope for relative imports.
    fn repository(&self) -> Option<Arc<dyn Repository>> {
        None
    }

    /// Whether this is a module scope (as opposed to a global or ad-hoc scope).
    fn is_module(&self) -> bool {
        false
    }

    /// Checksum of the script version this scope was built from.
    fn checksum(&self) -> Option<u64> {
        None
    }

    fn set_checksum(
        &self,
        _checksum: u64,
    ) {
    }
}

/// Shared handle to a module environment. Identity is `Arc` pointer identity.
pub type ModuleEnv = Arc<dyn Scope>;

/// Whether two environments are the same instance.
pub fn same_env(
    a: &ModuleEnv,
    b: &ModuleEnv,
) -> bool {
    Arc::ptr_eq(a, b)
}

/// Scope kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Module,
}

/// Property-map scope used by the reference resolver and by embedders that
/// do not bring their own scope type.
pub struct ModuleScope {
    name: String,
    kind: ScopeKind,
    key: Option<ResourceKey>,
    repository: Option<Arc<dyn Repository>>,
    properties: RwLock<IndexMap<String, Value>>,
    checksum: Mutex<Option<u64>>,
}

impl ModuleScope {
    /// Create the global (root) scope.
    pub fn global() -> Arc<Self> {
        Arc::new(Self {
            name: "global".to_string(),
            kind: ScopeKind::Global,
            key: None,
            repository: None,
            properties: RwLock::new(IndexMap::new()),
            checksum: Mutex::new(None),
        })
    }

    /// Create an empty module scope.
    pub fn module(
        name: impl Into<String>,
        key: Option<ResourceKey>,
        repository: Option<Arc<dyn Repository>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            kind: ScopeKind::Module,
            key,
            repository,
            properties: RwLock::new(IndexMap::new()),
            checksum: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Resource the module was loaded from, if any.
    pub fn key(&self) -> Option<&ResourceKey> {
        self.key.as_ref()
    }

    /// Property names in definition order.
    pub fn keys(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

impl Scope for ModuleScope {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        name: &str,
    ) -> Option<Value> {
        self.properties.read().get(name).cloned()
    }

    fn set(
        &self,
        name: &str,
        value: Value,
    ) {
        self.properties.write().insert(name.to_string(), value);
    }

    fn repository(&self) -> Option<Arc<dyn Repository>> {
        self.repository.clone()
    }

    fn is_module(&self) -> bool {
        self.kind == ScopeKind::Module
    }

    fn checksum(&self) -> Option<u64> {
        *self.checksum.lock()
    }

    fn set_checksum(
        &self,
        checksum: u64,
    ) {
        *self.checksum.lock() = Some(checksum);
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("checksum", &self.checksum())
            .field("properties", &self.keys())
            .finish()
    }
}
