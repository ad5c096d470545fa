//! Runtime system
//!
//! This module contains the worker: module caching, execution serialization
//! and the per-worker event loop.

pub mod error;
pub mod module_cache;
pub mod scheduler;
pub mod serializer;
pub mod worker;

#[cfg(test)]
mod tests;

pub use error::{Result, ScriptError, SyntaxError, WorkerError};
pub use module_cache::{CacheMode, CacheStats, ModuleCache};
pub use scheduler::{
    AsyncCounter, EventLoop, PeriodicFailurePolicy, TaskHandle, TaskId, TaskKind, TaskState,
};
pub use serializer::{ExecutionSerializer, ScriptFrame, SerialGuard};
pub use worker::{FunctionRef, ModuleRef, Worker, WorkerBuilder};
