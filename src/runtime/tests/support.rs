//! 测试用的解析器
//!
//! Modules are Rust closures. Each module has a version that tests bump with
//! [`FakeResolver::touch`] to make it stale.

use crate::engine::{
    ExecutableUnit, LoadContext, ModuleEnv, ModuleScope, NativeFunction, ScriptResolver, Value,
};
use crate::repository::{Repository, ResourceKey};
use crate::runtime::error::{Result, WorkerError};
use crate::runtime::scheduler::AsyncCounter;
use crate::runtime::worker::Worker;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub type Body = Arc<dyn Fn(&LoadContext<'_>, &ModuleEnv) -> Result<()> + Send + Sync>;

pub struct FakeUnit {
    name: String,
    key: ResourceKey,
    body: Body,
    version: AtomicU64,
    loads: AtomicUsize,
    dependencies: Mutex<Vec<Arc<dyn ExecutableUnit>>>,
}

impl FakeUnit {
    /// Number of times the body ran through `load`.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Names of recorded dependencies, in recording order.
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies
            .lock()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }
}

impl std::fmt::Debug for FakeUnit {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FakeUnit").field("name", &self.name).finish()
    }
}

impl ExecutableUnit for FakeUnit {
    fn key(&self) -> ResourceKey {
        self.key.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn load(
        &self,
        cx: &LoadContext<'_>,
        existing: Option<ModuleEnv>,
    ) -> Result<ModuleEnv> {
        if let Some(env) = existing {
            if env.checksum() == Some(self.checksum()) {
                cx.checked().insert(self.key.clone(), env.clone());
                return Ok(env);
            }
        }
        self.loads.fetch_add(1, Ordering::SeqCst);

        let scope: ModuleEnv = ModuleScope::module(self.name.clone(), Some(self.key.clone()), None);
        cx.checked().insert(self.key.clone(), scope.clone());
        (self.body)(cx, &scope)?;
        scope.set_checksum(self.checksum());
        Ok(scope)
    }

    fn evaluate(
        &self,
        cx: &LoadContext<'_>,
        scope: &ModuleEnv,
    ) -> Result<Value> {
        (self.body)(cx, scope)?;
        Ok(Value::str(&self.name))
    }

    fn add_dependency(
        &self,
        unit: Arc<dyn ExecutableUnit>,
    ) {
        let key = unit.key();
        let mut deps = self.dependencies.lock();
        if key != self.key && deps.iter().all(|d| d.key() != key) {
            deps.push(unit);
        }
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn dependencies(&self) -> Vec<Arc<dyn ExecutableUnit>> {
        self.dependencies.lock().clone()
    }
}

pub struct FakeResolver {
    global: ModuleEnv,
    units: RwLock<HashMap<String, Arc<FakeUnit>>>,
}

impl FakeResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            global: ModuleScope::global(),
            units: RwLock::new(HashMap::new()),
        })
    }

    /// Define a module whose body is `body`.
    pub fn define<F>(
        &self,
        name: &str,
        body: F,
    ) -> Arc<FakeUnit>
    where
        F: Fn(&LoadContext<'_>, &ModuleEnv) -> Result<()> + Send + Sync + 'static,
    {
        let unit = Arc::new(FakeUnit {
            name: name.to_string(),
            key: ResourceKey::new(format!("fake:{}", name)),
            body: Arc::new(body),
            version: AtomicU64::new(1),
            loads: AtomicUsize::new(0),
            dependencies: Mutex::new(Vec::new()),
        });
        self.units.write().insert(name.to_string(), unit.clone());
        unit
    }

    /// Define a module that imports `imports` in order, then exports a
    /// `name()` function returning the module name.
    pub fn define_importing(
        &self,
        name: &str,
        imports: &[&str],
    ) -> Arc<FakeUnit> {
        let imports: Vec<String> = imports.iter().map(|s| s.to_string()).collect();
        let module = name.to_string();
        self.define(name, move |cx, scope| {
            for import in &imports {
                let env = cx.require(scope, import)?;
                scope.set(import, Value::Scope(env));
            }
            export_const(scope, "name", Value::str(&module));
            Ok(())
        })
    }

    pub fn unit(
        &self,
        name: &str,
    ) -> Arc<FakeUnit> {
        self.units.read()[name].clone()
    }

    /// Mark a module as changed.
    pub fn touch(
        &self,
        name: &str,
    ) {
        self.unit(name).version.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptResolver for FakeResolver {
    fn global_scope(&self) -> ModuleEnv {
        self.global.clone()
    }

    fn resolve(
        &self,
        name: &str,
        _local: Option<&Arc<dyn Repository>>,
    ) -> Result<Arc<dyn ExecutableUnit>> {
        match self.units.read().get(name) {
            Some(unit) => Ok(unit.clone()),
            None => Err(WorkerError::ModuleNotFound {
                name: name.to_string(),
                searched_paths: vec![format!("fake:{}", name)],
            }),
        }
    }
}

/// Export a function returning `value`.
pub fn export_const(
    scope: &ModuleEnv,
    name: &str,
    value: Value,
) {
    scope.set(
        name,
        NativeFunction::new(name, move |_, _, _| Ok(value.clone())).into_value(),
    );
}

/// Export a function backed by a closure.
pub fn export_fn<F>(
    scope: &ModuleEnv,
    name: &str,
    body: F,
) where
    F: Fn(&Worker, &ModuleEnv, &[Value]) -> Result<Value> + Send + Sync + 'static,
{
    scope.set(name, NativeFunction::new(name, body).into_value());
}

/// Worker with its own async counter.
pub fn worker(
    resolver: &Arc<FakeResolver>,
    reloading: bool,
) -> (Arc<Worker>, Arc<AsyncCounter>) {
    let counter = Arc::new(AsyncCounter::new());
    let worker = Worker::builder(resolver.clone())
        .reloading(reloading)
        .async_counter(counter.clone())
        .build();
    (worker, counter)
}
