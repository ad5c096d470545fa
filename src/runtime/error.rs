//! Worker error types

use std::fmt;
use std::io;
use std::sync::Arc;

use super::scheduler::TaskId;

/// A syntax error reported by the script compiler while loading a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    /// Resource path the error was found in.
    pub source_name: String,
    /// 1-based line, 0 if unknown.
    pub line: usize,
    /// 1-based column, 0 if unknown.
    pub column: usize,
    /// The offending source line, if available.
    pub line_source: Option<String>,
}

impl SyntaxError {
    pub fn new(
        message: impl Into<String>,
        source_name: impl Into<String>,
        line: usize,
        column: usize,
    ) -> Self {
        Self {
            message: message.into(),
            source_name: source_name.into(),
            line,
            column,
            line_source: None,
        }
    }

    pub fn with_line_source(
        mut self,
        line_source: impl Into<String>,
    ) -> Self {
        self.line_source = Some(line_source.into());
        self
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.source_name, self.line, self.column, self.message
        )
    }
}

/// An error raised by script code while it was executing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    /// Name of the module the error was raised in, if known.
    pub module: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            module: None,
        }
    }

    pub fn in_module(
        mut self,
        module: impl Into<String>,
    ) -> Self {
        self.module = Some(module.into());
        self
    }
}

/// Worker errors
///
/// Nothing in the worker core retries; every variant reaches the caller of
/// `invoke` (or the task handle, for async work) unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkerError {
    /// 模块或函数参数类型不正确
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 模块中不存在指定的函数
    #[error("Function {function} not defined in module {module}")]
    NoSuchMethod { function: String, module: String },

    /// 模块未找到
    #[error("module not found: '{name}'")]
    ModuleNotFound {
        name: String,
        searched_paths: Vec<String>,
    },

    #[error("i/o error: {0}")]
    Io(Arc<io::Error>),

    /// 编译失败，详细信息同时记录在 worker 的错误列表中
    #[error("{} syntax error(s) in {resource}", .errors.len())]
    Syntax {
        resource: String,
        errors: Vec<SyntaxError>,
    },

    #[error(transparent)]
    Script(#[from] ScriptError),

    /// 任务在执行前被取消或被 terminate 丢弃
    #[error("{0} was cancelled")]
    Cancelled(TaskId),

    #[error("{task} panicked: {message}")]
    Panicked { task: TaskId, message: String },

    /// 异步任务执行时 worker 已被释放
    #[error("worker {0} has been dropped")]
    WorkerDropped(usize),
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        WorkerError::Io(Arc::new(err))
    }
}

impl WorkerError {
    /// Shorthand for a script-level error.
    pub fn script(message: impl Into<String>) -> Self {
        WorkerError::Script(ScriptError::new(message))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled(_))
    }
}

pub type Result<T, E = WorkerError> = std::result::Result<T, E>;
