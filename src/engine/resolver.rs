//! 脚本解析器接口
//!
//! The worker does not parse or compile anything. It asks a [`ScriptResolver`]
//! to turn a module name into an [`ExecutableUnit`], and asks the unit to
//! produce (or refresh) a module environment.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::scope::ModuleEnv;
use super::value::Value;
use crate::repository::{Repository, ResourceKey};
use crate::runtime::error::{Result, SyntaxError};
use crate::runtime::module_cache::ModuleCache;
use crate::runtime::worker::Worker;

/// A resolved, versioned, loadable script.
pub trait ExecutableUnit: Send + Sync + fmt::Debug {
    /// Identity of the backing resource; the module cache key.
    fn key(&self) -> ResourceKey;

    /// Module id, used in diagnostics.
    fn name(&self) -> &str;

    /// Produce a module environment.
    ///
    /// `existing` is the environment from a previous load of the same resource,
    /// if any; the unit may return it unchanged when nothing is stale. The unit
    /// must register the environment in `cx.checked()` before running code that
    /// could import this module again, so circular imports observe the
    /// partially initialised environment.
    fn load(
        &self,
        cx: &LoadContext<'_>,
        existing: Option<ModuleEnv>,
    ) -> Result<ModuleEnv>;

    /// Run the unit's body in `scope` and return its completion value.
    fn evaluate(
        &self,
        cx: &LoadContext<'_>,
        scope: &ModuleEnv,
    ) -> Result<Value>;

    /// Record that this unit depends on `unit`.
    fn add_dependency(
        &self,
        unit: Arc<dyn ExecutableUnit>,
    );

    /// Version of the unit's own source, e.g. its timestamp.
    fn version(&self) -> u64 {
        0
    }

    /// Units this unit has recorded as dependencies.
    fn dependencies(&self) -> Vec<Arc<dyn ExecutableUnit>> {
        Vec::new()
    }

    /// Version of the unit and of everything it reaches through its
    /// dependencies.
    ///
    /// A unit that reloads stamps each new environment with this value (see
    /// [`Scope::set_checksum`](super::Scope::set_checksum)) and reuses an
    /// existing environment only while the stamp still matches.
    fn checksum(&self) -> u64 {
        closure_checksum(self.key(), self.version(), self.dependencies())
    }
}

/// Checksum over a root with version `version` and every unit reachable from
/// `dependencies`. Each unit counts once, so the result does not depend on
/// import order and cycles are harmless.
pub fn closure_checksum(
    key: ResourceKey,
    version: u64,
    dependencies: Vec<Arc<dyn ExecutableUnit>>,
) -> u64 {
    let mut sum = entry_hash(&key, version);
    let mut seen = HashSet::from([key]);
    let mut pending = dependencies;
    while let Some(unit) = pending.pop() {
        let key = unit.key();
        if seen.contains(&key) {
            continue;
        }
        sum = sum.wrapping_add(entry_hash(&key, unit.version()));
        seen.insert(key);
        pending.extend(unit.dependencies());
    }
    sum
}

fn entry_hash(
    key: &ResourceKey,
    version: u64,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    version.hash(&mut hasher);
    hasher.finish()
}

/// Maps module names to executable units.
pub trait ScriptResolver: Send + Sync {
    /// The root scope functions are called in.
    fn global_scope(&self) -> ModuleEnv;

    /// Search scope for imports made from `caller`. `None` means only the
    /// resolver's global module path.
    fn search_scope(
        &self,
        caller: Option<&ModuleEnv>,
    ) -> Option<Arc<dyn Repository>> {
        caller.and_then(|scope| scope.repository())
    }

    /// Resolve `name` within `local` (then the global module path).
    ///
    /// Fails with [`WorkerError::ModuleNotFound`](crate::WorkerError::ModuleNotFound)
    /// when there is no such module.
    fn resolve(
        &self,
        name: &str,
        local: Option<&Arc<dyn Repository>>,
    ) -> Result<Arc<dyn ExecutableUnit>>;
}

/// What an executable unit gets to see while it loads or evaluates.
pub struct LoadContext<'w> {
    worker: &'w Worker,
    cache: &'w ModuleCache,
}

impl<'w> LoadContext<'w> {
    pub(crate) fn new(
        worker: &'w Worker,
        cache: &'w ModuleCache,
    ) -> Self {
        Self { worker, cache }
    }

    /// The worker running the load. Use it to import further modules.
    pub fn worker(&self) -> &'w Worker {
        self.worker
    }

    pub fn global_scope(&self) -> ModuleEnv {
        self.worker.resolver().global_scope()
    }

    /// Modules already checked during the current top-level call.
    pub fn checked(&self) -> CheckedModules<'w> {
        CheckedModules { cache: self.cache }
    }

    /// Import `name` on behalf of `caller`.
    pub fn require(
        &self,
        caller: &ModuleEnv,
        name: &str,
    ) -> Result<ModuleEnv> {
        self.worker.load_module(Some(caller), name)
    }

    pub fn report_syntax_error(
        &self,
        error: SyntaxError,
    ) {
        self.worker.report_error(error);
    }
}

impl fmt::Debug for LoadContext<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("worker", &self.worker.id())
            .finish()
    }
}

/// View of the worker's checked-modules map.
///
/// In release mode this is the same map as the loaded modules.
#[derive(Clone, Copy)]
pub struct CheckedModules<'w> {
    cache: &'w ModuleCache,
}

impl CheckedModules<'_> {
    pub fn get(
        &self,
        key: &ResourceKey,
    ) -> Option<ModuleEnv> {
        self.cache.peek_checked(key)
    }

    pub fn contains(
        &self,
        key: &ResourceKey,
    ) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(
        &self,
        key: ResourceKey,
        env: ModuleEnv,
    ) {
        self.cache.mark_checked(key, env);
    }
}

impl fmt::Debug for CheckedModules<'_> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("CheckedModules")
            .field("shared_with_modules", &self.cache.checked_is_modules())
            .finish()
    }
}
