//! Worker
//!
//! A worker is one logical execution context: it owns a module cache, the
//! execution serializer with its call-chain pointer, and lazily a background
//! [`EventLoop`] for asynchronous invocations.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yaoxiang_worker::{
//!     ModuleConfig, RepositoryResolver, ScriptCompiler, Value, Worker,
//! };
//!
//! fn run(compiler: Arc<dyn ScriptCompiler>) -> yaoxiang_worker::Result<()> {
//!     let resolver = RepositoryResolver::from_config(&ModuleConfig::default(), compiler);
//!     let worker = Worker::builder(Arc::new(resolver)).reloading(true).build();
//!     let result = worker.invoke("main", "start", &[Value::Int(1)])?;
//!     println!("{:?}", result);
//!     Ok(())
//! }
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::error::{Result, SyntaxError, WorkerError};
use super::module_cache::{CacheMode, CacheStats, ModuleCache};
use super::scheduler::{AsyncCounter, EventLoop, TaskHandle};
use super::serializer::{ExecutionSerializer, SerialGuard};
use crate::engine::{Callable, ExecutableUnit, LoadContext, ModuleEnv, ScriptResolver, Value};
use crate::repository::ResourceKey;
use crate::runtime::scheduler::PeriodicFailurePolicy;
use crate::util::config::WorkerConfig;

static NEXT_WORKER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static ACTIVE_WORKER: RefCell<Option<Weak<Worker>>> = const { RefCell::new(None) };
}

/// Marks a worker as active on the current thread until dropped.
struct ActiveWorker {
    previous: Option<Weak<Worker>>,
}

impl ActiveWorker {
    fn enter(worker: &Worker) -> Self {
        let previous = ACTIVE_WORKER.with(|slot| slot.replace(Some(worker.this.clone())));
        Self { previous }
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = ACTIVE_WORKER.try_with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Module argument of [`Worker::invoke`].
#[derive(Debug, Clone)]
pub enum ModuleRef {
    /// Load the module by name
    Name(String),
    /// Use an already-resolved environment
    Env(ModuleEnv),
}

impl From<&str> for ModuleRef {
    fn from(name: &str) -> Self {
        ModuleRef::Name(name.to_string())
    }
}

impl From<String> for ModuleRef {
    fn from(name: String) -> Self {
        ModuleRef::Name(name)
    }
}

impl From<ModuleEnv> for ModuleRef {
    fn from(env: ModuleEnv) -> Self {
        ModuleRef::Env(env)
    }
}

impl From<&ModuleEnv> for ModuleRef {
    fn from(env: &ModuleEnv) -> Self {
        ModuleRef::Env(env.clone())
    }
}

impl TryFrom<Value> for ModuleRef {
    type Error = WorkerError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Str(name) => Ok(ModuleRef::Name(name.to_string())),
            Value::Scope(env) => Ok(ModuleRef::Env(env)),
            other => Err(WorkerError::InvalidArgument(format!(
                "module argument must be a scope or a string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Function argument of [`Worker::invoke`].
#[derive(Clone)]
pub enum FunctionRef {
    /// Look the function up as a property of the module
    Name(String),
    /// Call this function directly
    Callable(Arc<dyn Callable>),
}

impl fmt::Debug for FunctionRef {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            FunctionRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            FunctionRef::Callable(func) => f.debug_tuple("Callable").field(&func.name()).finish(),
        }
    }
}

impl From<&str> for FunctionRef {
    fn from(name: &str) -> Self {
        FunctionRef::Name(name.to_string())
    }
}

impl From<String> for FunctionRef {
    fn from(name: String) -> Self {
        FunctionRef::Name(name)
    }
}

impl From<Arc<dyn Callable>> for FunctionRef {
    fn from(func: Arc<dyn Callable>) -> Self {
        FunctionRef::Callable(func)
    }
}

impl TryFrom<Value> for FunctionRef {
    type Error = WorkerError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Str(name) => Ok(FunctionRef::Name(name.to_string())),
            Value::Function(func) => Ok(FunctionRef::Callable(func)),
            other => Err(WorkerError::InvalidArgument(format!(
                "function argument must be a function or a string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Builder for [`Worker`].
pub struct WorkerBuilder {
    resolver: Arc<dyn ScriptResolver>,
    config: WorkerConfig,
    counter: Option<Arc<AsyncCounter>>,
}

impl WorkerBuilder {
    pub fn new(resolver: Arc<dyn ScriptResolver>) -> Self {
        Self {
            resolver,
            config: WorkerConfig::default(),
            counter: None,
        }
    }

    pub fn config(
        mut self,
        config: WorkerConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn reloading(
        mut self,
        reloading: bool,
    ) -> Self {
        self.config.reloading = reloading;
        self
    }

    pub fn periodic_failure(
        mut self,
        policy: PeriodicFailurePolicy,
    ) -> Self {
        self.config.periodic_failure = policy;
        self
    }

    /// Use `counter` instead of [`AsyncCounter::global`].
    pub fn async_counter(
        mut self,
        counter: Arc<AsyncCounter>,
    ) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn build(self) -> Arc<Worker> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::SeqCst);
        let mode = CacheMode::from_reloading(self.config.reloading);
        let counter = self.counter.unwrap_or_else(AsyncCounter::global);
        debug!(worker = id, ?mode, "creating worker");

        Arc::new_cyclic(|this| Worker {
            id,
            this: this.clone(),
            resolver: self.resolver,
            config: self.config,
            cache: ModuleCache::new(mode),
            serializer: ExecutionSerializer::new(),
            errors: Mutex::new(Vec::new()),
            event_loop: Mutex::new(None),
            counter,
        })
    }
}

/// A single logical execution context.
pub struct Worker {
    id: usize,
    this: Weak<Worker>,
    resolver: Arc<dyn ScriptResolver>,
    config: WorkerConfig,
    cache: ModuleCache,
    serializer: ExecutionSerializer,
    errors: Mutex<Vec<SyntaxError>>,
    event_loop: Mutex<Option<EventLoop>>,
    counter: Arc<AsyncCounter>,
}

impl Worker {
    /// Create a worker with the default configuration.
    pub fn new(resolver: Arc<dyn ScriptResolver>) -> Arc<Worker> {
        WorkerBuilder::new(resolver).build()
    }

    pub fn builder(resolver: Arc<dyn ScriptResolver>) -> WorkerBuilder {
        WorkerBuilder::new(resolver)
    }

    /// The worker currently running `invoke` on this thread.
    pub fn current() -> Option<Arc<Worker>> {
        ACTIVE_WORKER.with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
    }

    fn enter(&self) -> SerialGuard<'_> {
        let guard = self.serializer.enter();
        if guard.is_outermost() {
            if self.config.reloading {
                self.cache.clear_checked();
            }
            self.errors.lock().clear();
        }
        guard
    }

    /// Call `function` in `module` and return its unwrapped result.
    ///
    /// Calls from different threads run one at a time. A call made from inside
    /// a running function on the same thread runs immediately.
    pub fn invoke(
        &self,
        module: impl Into<ModuleRef>,
        function: impl Into<FunctionRef>,
        args: &[Value],
    ) -> Result<Value> {
        let module = module.into();
        let function = function.into();
        let _guard = self.enter();

        let scope = match module {
            ModuleRef::Env(env) => env,
            ModuleRef::Name(name) => self.load_module(None, &name)?,
        };
        let callable = match function {
            FunctionRef::Callable(func) => func,
            FunctionRef::Name(name) => match scope.get(&name) {
                Some(Value::Function(func)) => func,
                _ => {
                    return Err(WorkerError::NoSuchMethod {
                        function: name,
                        module: scope.name().to_string(),
                    })
                }
            },
        };

        trace!(worker = self.id, module = scope.name(), function = callable.name(), "invoke");
        let _active = ActiveWorker::enter(self);
        let result = callable.call(self, &scope, args)?;
        Ok(result.unwrapped())
    }

    /// Load `name` as imported from `caller`, or from the module path when
    /// `caller` is `None`.
    ///
    /// A module already checked during the current top-level call is returned
    /// as is, even if its body is still running. This is how circular imports
    /// see a partially initialised module. Either way the running script, if
    /// any, records a dependency on the module.
    pub fn load_module(
        &self,
        caller: Option<&ModuleEnv>,
        name: &str,
    ) -> Result<ModuleEnv> {
        let local = self.resolver.search_scope(caller);
        let unit = self.resolver.resolve(name, local.as_ref())?;
        let key = unit.key();

        let guard = self.enter();
        if let Some(env) = self.cache.checked(&key) {
            trace!(worker = self.id, module = %key, "module already checked");
            let parent = guard.current_script();
            drop(guard);
            if let Some(parent) = parent {
                parent.add_dependency(unit);
            }
            return Ok(env);
        }

        let existing = self.cache.get(&key);
        debug!(
            worker = self.id,
            module = %key,
            cached = existing.is_some(),
            "loading module"
        );
        let frame = guard.push_script(unit.clone());
        let result = unit.load(&LoadContext::new(self, &self.cache), existing);
        match &result {
            Ok(env) => self.cache.put(key, env.clone()),
            Err(_) => self.cache.uncheck(&key),
        }
        let parent = frame.finish();
        drop(guard);

        if let Some(parent) = parent {
            parent.add_dependency(unit);
        }
        result
    }

    /// Run `unit`'s body in `scope`.
    ///
    /// When `scope` is a module scope it becomes the cached environment for
    /// the unit's resource.
    pub fn evaluate_script(
        &self,
        unit: Arc<dyn ExecutableUnit>,
        scope: &ModuleEnv,
    ) -> Result<Value> {
        let guard = self.enter();
        let frame = guard.push_script(unit.clone());
        let result = unit.evaluate(&LoadContext::new(self, &self.cache), scope);
        if result.is_ok() && scope.is_module() {
            self.cache.put(unit.key(), scope.clone());
        }
        let parent = frame.finish();
        drop(guard);

        if let Some(parent) = parent {
            parent.add_dependency(unit);
        }
        result
    }

    /// Invoke on the event loop as soon as possible.
    pub fn submit(
        &self,
        module: impl Into<ModuleRef>,
        function: impl Into<FunctionRef>,
        args: Vec<Value>,
    ) -> Result<TaskHandle> {
        let job = self.job(module.into(), function.into(), args);
        self.with_event_loop(|event_loop| event_loop.submit(job))
    }

    /// Invoke on the event loop once, after `delay`.
    pub fn schedule(
        &self,
        delay: Duration,
        module: impl Into<ModuleRef>,
        function: impl Into<FunctionRef>,
        args: Vec<Value>,
    ) -> Result<TaskHandle> {
        let job = self.job(module.into(), function.into(), args);
        self.with_event_loop(|event_loop| event_loop.schedule(delay, job))
    }

    /// Invoke on the event loop after `delay`, then again `delay` after each
    /// invocation returns, until cancelled.
    ///
    /// The task holds one async counter slot for as long as it is registered.
    /// A zero `delay` is rejected with [`WorkerError::InvalidArgument`].
    pub fn schedule_interval(
        &self,
        delay: Duration,
        module: impl Into<ModuleRef>,
        function: impl Into<FunctionRef>,
        args: Vec<Value>,
    ) -> Result<TaskHandle> {
        let job = self.job(module.into(), function.into(), args);
        self.with_event_loop(|event_loop| event_loop.schedule_with_fixed_delay(delay, delay, job))?
    }

    /// Cancel a task that has not started. Periodic tasks can be cancelled at
    /// any time; a firing already running completes.
    ///
    /// Returns whether the task was cancelled by this call.
    pub fn cancel(
        &self,
        handle: &TaskHandle,
    ) -> bool {
        let cancelled = handle.cancel();
        if cancelled {
            self.counter.decrement();
            trace!(worker = self.id, task = %handle.id(), "task cancelled");
        }
        cancelled
    }

    /// Number of queued tasks that have not started.
    pub fn count_scheduled_tasks(&self) -> usize {
        self.event_loop.lock().as_ref().map_or(0, EventLoop::pending)
    }

    /// Stop the event loop and drop its queued tasks.
    ///
    /// The dropped tasks keep their async counter slots. The next async call
    /// starts a new loop. Returns the number of tasks dropped.
    pub fn terminate(&self) -> usize {
        match self.event_loop.lock().take() {
            Some(event_loop) => event_loop.shutdown_now(),
            None => 0,
        }
    }

    fn job(
        &self,
        module: ModuleRef,
        function: FunctionRef,
        args: Vec<Value>,
    ) -> impl Fn() -> Result<Value> + Send + Sync + 'static {
        let worker = self.this.clone();
        let id = self.id;
        move || {
            let worker = worker.upgrade().ok_or(WorkerError::WorkerDropped(id))?;
            worker.invoke(module.clone(), function.clone(), &args)
        }
    }

    fn with_event_loop<T>(
        &self,
        f: impl FnOnce(&EventLoop) -> T,
    ) -> Result<T> {
        let mut slot = self.event_loop.lock();
        let event_loop = match slot.as_ref() {
            Some(event_loop) => event_loop.clone(),
            None => {
                let name = format!("{}-{}", self.config.thread_name_prefix, self.id);
                debug!(worker = self.id, thread = %name, "starting event loop");
                let event_loop =
                    EventLoop::start(name, self.counter.clone(), self.config.periodic_failure)?;
                *slot = Some(event_loop.clone());
                event_loop
            }
        };
        Ok(f(&event_loop))
    }

    /// Syntax errors collected during the current top-level call.
    pub fn errors(&self) -> Vec<SyntaxError> {
        self.errors.lock().clone()
    }

    pub(crate) fn report_error(
        &self,
        error: SyntaxError,
    ) {
        self.errors.lock().push(error);
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn is_reloading(&self) -> bool {
        self.config.reloading
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn ScriptResolver> {
        &self.resolver
    }

    /// The executable unit whose body is running. Blocks while another
    /// thread is executing on this worker.
    pub fn current_script(&self) -> Option<Arc<dyn ExecutableUnit>> {
        self.serializer.current_script()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Keys of every module loaded by this worker.
    pub fn loaded_modules(&self) -> Vec<ResourceKey> {
        self.cache.cached_modules()
    }

    pub fn async_counter(&self) -> &Arc<AsyncCounter> {
        &self.counter
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl fmt::Debug for Worker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("reloading", &self.config.reloading)
            .field("modules", &self.cache.len())
            .field("event_loop", &*self.event_loop.lock())
            .finish()
    }
}
