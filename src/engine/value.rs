//! Host-side script values
//!
//! The worker core passes arguments into script functions and hands their
//! results back to the embedder. It only ever looks at two kinds of values:
//! functions (to call them) and host wrappers (to unwrap return values).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::scope::ModuleEnv;
use crate::runtime::error::Result;
use crate::runtime::worker::Worker;

/// Something script code can call.
pub trait Callable: Send + Sync {
    /// Function name, used in diagnostics.
    fn name(&self) -> &str;

    /// Call the function. `this` is the module environment the function was
    /// resolved from; `worker` is the worker executing the call.
    fn call(
        &self,
        worker: &Worker,
        this: &ModuleEnv,
        args: &[Value],
    ) -> Result<Value>;
}

/// An interpreter-specific wrapper around a host value.
///
/// `Worker::invoke` unwraps these before returning a result.
pub trait HostWrapper: Send + Sync {
    fn unwrap_value(&self) -> Value;
}

type NativeFn = dyn Fn(&Worker, &ModuleEnv, &[Value]) -> Result<Value> + Send + Sync;

/// A [`Callable`] backed by a Rust closure.
pub struct NativeFunction {
    name: String,
    body: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(
        name: impl Into<String>,
        body: F,
    ) -> Self
    where
        F: Fn(&Worker, &ModuleEnv, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Box::new(body),
        }
    }

    /// Wrap into a [`Value::Function`].
    pub fn into_value(self) -> Value {
        Value::Function(Arc::new(self))
    }
}

impl Callable for NativeFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(
        &self,
        worker: &Worker,
        this: &ModuleEnv,
        args: &[Value],
    ) -> Result<Value> {
        (self.body)(worker, this, args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish()
    }
}

/// A script value as seen from the host.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    List(Arc<[Value]>),
    Function(Arc<dyn Callable>),
    /// A module environment or other scope object
    Scope(ModuleEnv),
    /// Opaque host object
    Host(Arc<dyn Any + Send + Sync>),
    /// Host object wrapped by the interpreter
    Wrapped(Arc<dyn HostWrapper>),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(items.into_iter().collect())
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<dyn Callable>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_scope(&self) -> Option<&ModuleEnv> {
        match self {
            Value::Scope(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast a [`Value::Host`] payload.
    pub fn downcast_host<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Value::Host(h) => h.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Strip one interpreter wrapper layer, if any.
    pub fn unwrapped(self) -> Value {
        match self {
            Value::Wrapped(w) => w.unwrap_value(),
            other => other,
        }
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Function(_) => "function",
            Value::Scope(_) => "scope",
            Value::Host(_) => "host object",
            Value::Wrapped(_) => "wrapped host object",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Scope(scope) => write!(f, "<scope {}>", scope.name()),
            Value::Host(_) => write!(f, "<host object>"),
            Value::Wrapped(_) => write!(f, "<wrapped host object>"),
        }
    }
}

impl PartialEq for Value {
    /// Structural for plain data, identity for functions, scopes and host objects.
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Scope(a), Value::Scope(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            (Value::Wrapped(a), Value::Wrapped(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ModuleEnv> for Value {
    fn from(env: ModuleEnv) -> Self {
        Value::Scope(env)
    }
}
