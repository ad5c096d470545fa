//! 解释器边界
//!
//! Values, scopes and the resolver interface the worker core talks to, plus a
//! repository-backed reference resolver.

pub mod resolver;
pub mod scope;
pub mod script;
pub mod value;

pub use resolver::{closure_checksum, CheckedModules, ExecutableUnit, LoadContext, ScriptResolver};
pub use scope::{same_env, ModuleEnv, ModuleScope, Scope, ScopeKind};
pub use script::{ModuleBody, ReloadableScript, RepositoryResolver, ScriptCompiler};
pub use value::{Callable, HostWrapper, NativeFunction, Value};
