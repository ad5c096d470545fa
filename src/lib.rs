//! YaoXiang (爻象) worker core
//!
//! The execution core of an embedded YaoXiang runtime: a [`Worker`] caches
//! script modules with hot-reload awareness, serializes script execution
//! through a reentrant lock so nested module loads are safe, and runs
//! scheduled invocations on its own background event loop while a
//! process-wide [`AsyncCounter`] tracks outstanding async work.
//!
//! The interpreter itself stays outside: the worker talks to it through
//! [`ScriptResolver`], [`ExecutableUnit`], [`Scope`] and [`Callable`].
//! [`RepositoryResolver`] is a reference resolver over [`repository`]
//! backends with a pluggable [`ScriptCompiler`].
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use yaoxiang_worker::{
//!     ExecutableUnit, LoadContext, ModuleEnv, ModuleScope, NativeFunction, ResourceKey,
//!     Result, Scope, ScriptResolver, Value, Worker,
//! };
//!
//! #[derive(Debug)]
//! struct Greeter;
//!
//! impl ExecutableUnit for Greeter {
//!     fn key(&self) -> ResourceKey {
//!         ResourceKey::new("builtin:greeter")
//!     }
//!
//!     fn name(&self) -> &str {
//!         "greeter"
//!     }
//!
//!     fn load(&self, cx: &LoadContext<'_>, existing: Option<ModuleEnv>) -> Result<ModuleEnv> {
//!         if let Some(env) = existing {
//!             return Ok(env);
//!         }
//!         let scope: ModuleEnv = ModuleScope::module("greeter", Some(self.key()), None);
//!         cx.checked().insert(self.key(), scope.clone());
//!         scope.set(
//!             "hello",
//!             NativeFunction::new("hello", |_, _, args| {
//!                 let who = args.first().and_then(Value::as_str).unwrap_or("world");
//!                 Ok(Value::str(format!("hello, {}", who)))
//!             })
//!             .into_value(),
//!         );
//!         Ok(scope)
//!     }
//!
//!     fn evaluate(&self, _cx: &LoadContext<'_>, _scope: &ModuleEnv) -> Result<Value> {
//!         Ok(Value::Undefined)
//!     }
//!
//!     fn add_dependency(&self, _unit: Arc<dyn ExecutableUnit>) {}
//! }
//!
//! struct Resolver;
//!
//! impl ScriptResolver for Resolver {
//!     fn global_scope(&self) -> ModuleEnv {
//!         ModuleScope::global()
//!     }
//!
//!     fn resolve(
//!         &self,
//!         _name: &str,
//!         _local: Option<&Arc<dyn yaoxiang_worker::Repository>>,
//!     ) -> Result<Arc<dyn ExecutableUnit>> {
//!         Ok(Arc::new(Greeter))
//!     }
//! }
//!
//! let worker = Worker::new(Arc::new(Resolver));
//! let greeting = worker.invoke("greeter", "hello", &[Value::str("yaoxiang")]).unwrap();
//! assert_eq!(greeting, Value::str("hello, yaoxiang"));
//! ```

#![doc(html_root_url = "https://docs.rs/yaoxiang-worker")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod engine;
pub mod repository;
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use engine::{
    closure_checksum, same_env, Callable, CheckedModules, ExecutableUnit, HostWrapper, LoadContext, ModuleBody,
    ModuleEnv, ModuleScope, NativeFunction, ReloadableScript, RepositoryResolver, Scope,
    ScriptCompiler, ScriptResolver, Value,
};
pub use repository::{
    file::{FileRepository, FileResource},
    memory::{MemoryRepository, MemoryResource},
    Repository, Resource, ResourceKey,
};
pub use runtime::{
    AsyncCounter, CacheStats, FunctionRef, ModuleRef, PeriodicFailurePolicy, Result, ScriptError,
    SyntaxError, TaskHandle, TaskId, TaskKind, TaskState, Worker, WorkerBuilder, WorkerError,
};
pub use util::config::{ConfigError, ModuleConfig, RuntimeConfig, WorkerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime name
pub const NAME: &str = "YaoXiang (爻象)";
