//! 可重载脚本与仓库解析器
//!
//! [`RepositoryResolver`] maps module names to [`ReloadableScript`]s found in
//! repositories. A script compiles its resource through a pluggable
//! [`ScriptCompiler`], recompiles when the resource timestamp changes, and
//! derives a checksum from its own timestamp and those of everything it
//! imported. A module environment is reused only while the checksum it was
//! stamped with still matches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::resolver::{closure_checksum, ExecutableUnit, LoadContext, ScriptResolver};
use super::scope::{ModuleEnv, ModuleScope};
use super::value::Value;
use crate::repository::file::FileRepository;
use crate::repository::{lookup, normalize, Repository, Resource, ResourceKey};
use crate::runtime::error::{Result, SyntaxError, WorkerError};
use crate::util::config::ModuleConfig;

/// Turns script source into an executable body.
pub trait ScriptCompiler: Send + Sync {
    fn compile(
        &self,
        resource: &dyn Resource,
        source: &str,
    ) -> std::result::Result<Arc<dyn ModuleBody>, Vec<SyntaxError>>;
}

/// Compiled script code.
pub trait ModuleBody: Send + Sync {
    /// Run the body with `scope` as its module scope.
    fn execute(
        &self,
        cx: &LoadContext<'_>,
        scope: &ModuleEnv,
    ) -> Result<Value>;
}

struct Compiled {
    body: Arc<dyn ModuleBody>,
    timestamp: u64,
}

/// A script backed by a repository resource.
pub struct ReloadableScript {
    resource: Arc<dyn Resource>,
    key: ResourceKey,
    name: String,
    compiler: Arc<dyn ScriptCompiler>,
    compiled: Mutex<Option<Compiled>>,
    dependencies: Mutex<IndexMap<ResourceKey, Arc<dyn ExecutableUnit>>>,
}

impl ReloadableScript {
    pub fn new(
        resource: Arc<dyn Resource>,
        name: impl Into<String>,
        compiler: Arc<dyn ScriptCompiler>,
    ) -> Self {
        Self {
            key: resource.key(),
            resource,
            name: name.into(),
            compiler,
            compiled: Mutex::new(None),
            dependencies: Mutex::new(IndexMap::new()),
        }
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    /// Keys of the units this script imported, in first-import order.
    pub fn dependency_keys(&self) -> Vec<ResourceKey> {
        self.dependencies.lock().keys().cloned().collect()
    }

    fn dependency_units(&self) -> Vec<Arc<dyn ExecutableUnit>> {
        self.dependencies.lock().values().cloned().collect()
    }

    /// Checksum with `timestamp` standing in for this script's own version.
    fn checksum_at(
        &self,
        timestamp: u64,
    ) -> u64 {
        closure_checksum(self.key.clone(), timestamp, self.dependency_units())
    }

    fn body(
        &self,
        cx: &LoadContext<'_>,
    ) -> Result<(Arc<dyn ModuleBody>, u64)> {
        let timestamp = self.resource.last_modified();
        if let Some(compiled) = self.compiled.lock().as_ref() {
            if compiled.timestamp == timestamp {
                return Ok((compiled.body.clone(), timestamp));
            }
        }

        if !self.resource.exists() {
            return Err(WorkerError::ModuleNotFound {
                name: self.name.clone(),
                searched_paths: vec![self.resource.path().to_string()],
            });
        }
        let source = self.resource.read_to_string()?;
        match self.compiler.compile(&*self.resource, &source) {
            Ok(body) => {
                debug!(module = %self.key, timestamp, "compiled script");
                *self.compiled.lock() = Some(Compiled {
                    body: body.clone(),
                    timestamp,
                });
                Ok((body, timestamp))
            }
            Err(errors) => {
                for error in &errors {
                    cx.report_syntax_error(error.clone());
                }
                Err(WorkerError::Syntax {
                    resource: self.resource.path().to_string(),
                    errors,
                })
            }
        }
    }
}

impl ExecutableUnit for ReloadableScript {
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
            debug!(module = %self.key, "module changed, reloading");
        }

        let (body, timestamp) = self.body(cx)?;
        let scope: ModuleEnv = ModuleScope::module(
            self.name.clone(),
            Some(self.key.clone()),
            Some(self.resource.repository()),
        );
        // 先登记再执行：循环导入会拿到这个尚未初始化完的作用域
        cx.checked().insert(self.key.clone(), scope.clone());
        body.execute(cx, &scope)?;
        // 依赖在执行期间才登记完，所以最后再盖章
        scope.set_checksum(self.checksum_at(timestamp));
        Ok(scope)
    }

    fn evaluate(
        &self,
        cx: &LoadContext<'_>,
        scope: &ModuleEnv,
    ) -> Result<Value> {
        let (body, timestamp) = self.body(cx)?;
        let value = body.execute(cx, scope)?;
        if scope.is_module() {
            scope.set_checksum(self.checksum_at(timestamp));
        }
        Ok(value)
    }

    fn add_dependency(
        &self,
        unit: Arc<dyn ExecutableUnit>,
    ) {
        let key = unit.key();
        if key != self.key {
            self.dependencies.lock().entry(key).or_insert(unit);
        }
    }

    fn version(&self) -> u64 {
        self.resource.last_modified()
    }

    fn dependencies(&self) -> Vec<Arc<dyn ExecutableUnit>> {
        self.dependency_units()
    }
}

impl fmt::Debug for ReloadableScript {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ReloadableScript")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("dependencies", &self.dependency_keys())
            .finish()
    }
}

/// Resolves module names against repositories.
///
/// Names starting with `./` or `../` are looked up in the importing module's
/// repository. Other names are looked up in each module path repository in
/// order. For a name `n` the candidates are `n.<ext>` then `n/mod.<ext>`.
pub struct RepositoryResolver {
    global: ModuleEnv,
    module_path: Vec<Arc<dyn Repository>>,
    extension: String,
    compiler: Arc<dyn ScriptCompiler>,
    scripts: RwLock<HashMap<ResourceKey, Arc<ReloadableScript>>>,
}

impl RepositoryResolver {
    pub fn new(compiler: Arc<dyn ScriptCompiler>) -> Self {
        Self {
            global: ModuleScope::global(),
            module_path: Vec::new(),
            extension: "yx".to_string(),
            compiler,
            scripts: RwLock::new(HashMap::new()),
        }
    }

    /// File-backed resolver for the configured module path.
    pub fn from_config(
        config: &ModuleConfig,
        compiler: Arc<dyn ScriptCompiler>,
    ) -> Self {
        let mut resolver = Self::new(compiler).with_extension(&config.extension);
        for dir in &config.paths {
            resolver = resolver.with_module_path(Arc::new(FileRepository::new(dir)));
        }
        resolver
    }

    /// Append a repository to the module path.
    pub fn with_module_path(
        mut self,
        repository: Arc<dyn Repository>,
    ) -> Self {
        self.module_path.push(repository);
        self
    }

    pub fn with_extension(
        mut self,
        extension: &str,
    ) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_global_scope(
        mut self,
        global: ModuleEnv,
    ) -> Self {
        self.global = global;
        self
    }

    pub fn module_path(&self) -> &[Arc<dyn Repository>] {
        &self.module_path
    }

    fn candidates(
        &self,
        name: &str,
    ) -> Vec<String> {
        let suffix = format!(".{}", self.extension);
        if name.ends_with(&suffix) {
            return vec![name.to_string()];
        }
        vec![
            format!("{}{}", name, suffix),
            format!("{}/mod{}", name, suffix),
        ]
    }

    fn script(
        &self,
        resource: Arc<dyn Resource>,
        name: &str,
    ) -> Arc<ReloadableScript> {
        let key = resource.key();
        if let Some(script) = self.scripts.read().get(&key) {
            return script.clone();
        }
        self.scripts
            .write()
            .entry(key)
            .or_insert_with(|| {
                Arc::new(ReloadableScript::new(
                    resource,
                    normalize(name),
                    self.compiler.clone(),
                ))
            })
            .clone()
    }
}

impl ScriptResolver for RepositoryResolver {
    fn global_scope(&self) -> ModuleEnv {
        self.global.clone()
    }

    fn resolve(
        &self,
        name: &str,
        local: Option<&Arc<dyn Repository>>,
    ) -> Result<Arc<dyn ExecutableUnit>> {
        let relative = name.starts_with("./") || name.starts_with("../");
        let roots: Vec<&Arc<dyn Repository>> = match (relative, local) {
            (true, Some(local)) => vec![local],
            _ => self.module_path.iter().collect(),
        };

        let mut searched_paths = Vec::new();
        for root in roots {
            for candidate in self.candidates(name) {
                searched_paths.push(format!("{}{}", root.path(), candidate));
                if let Some(resource) = lookup(root, &candidate).filter(|r| r.exists()) {
                    return Ok(self.script(resource, name));
                }
            }
        }
        Err(WorkerError::ModuleNotFound {
            name: name.to_string(),
            searched_paths,
        })
    }
}

impl fmt::Debug for RepositoryResolver {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let path: Vec<&str> = self.module_path.iter().map(|r| r.path()).collect();
        f.debug_struct("RepositoryResolver")
            .field("module_path", &path)
            .field("extension", &self.extension)
            .field("scripts", &self.scripts.read().len())
            .finish()
    }
}
