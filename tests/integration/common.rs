//! 测试用的小型脚本语言
//!
//! One statement per line:
//!
//! ```text
//! # comment
//! import ./lib/math as math
//! export answer = 42
//! export greeting = "hello"
//! export sum = math.add
//! fail something went wrong
//! ```
//!
//! `export name = expr` defines a function `name`. A literal expression makes it
//! return the literal; `alias.function` forwards the call to an imported module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use yaoxiang_worker::{
    LoadContext, ModuleBody, ModuleEnv, NativeFunction, Resource, Result, Scope, ScriptCompiler,
    SyntaxError, Value, Worker, WorkerError,
};

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Str(String),
    Forward { alias: String, function: String },
}

#[derive(Debug, Clone)]
enum Stmt {
    Import { name: String, alias: String },
    Export { name: String, expr: Expr },
    Fail(String),
}

struct Program {
    path: String,
    stmts: Vec<Stmt>,
    runs: Arc<Mutex<HashMap<String, usize>>>,
}

impl ModuleBody for Program {
    fn execute(
        &self,
        cx: &LoadContext<'_>,
        scope: &ModuleEnv,
    ) -> Result<Value> {
        *self.runs.lock().entry(self.path.clone()).or_default() += 1;
        let mut last = Value::Undefined;
        for stmt in &self.stmts {
            match stmt {
                Stmt::Import { name, alias } => {
                    let env = cx.require(scope, name)?;
                    scope.set(alias, Value::Scope(env));
                }
                Stmt::Export { name, expr } => {
                    let expr = expr.clone();
                    let func = NativeFunction::new(name.clone(), move |worker, this, args| {
                        eval(&expr, worker, this, args)
                    });
                    scope.set(name, func.into_value());
                    last = Value::str(name);
                }
                Stmt::Fail(message) => return Err(WorkerError::script(message.clone())),
            }
        }
        Ok(last)
    }
}

fn eval(
    expr: &Expr,
    worker: &Worker,
    this: &ModuleEnv,
    args: &[Value],
) -> Result<Value> {
    match expr {
        Expr::Int(i) => Ok(Value::Int(*i)),
        Expr::Str(s) => Ok(Value::str(s)),
        Expr::Forward { alias, function } => match this.get(alias) {
            Some(Value::Scope(env)) => worker.invoke(env, function.as_str(), args),
            _ => Err(WorkerError::script(format!("{} is not imported", alias))),
        },
    }
}

fn parse_expr(text: &str) -> Option<Expr> {
    if let Some(s) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Some(Expr::Str(s.to_string()));
    }
    if let Ok(i) = text.parse() {
        return Some(Expr::Int(i));
    }
    let (alias, function) = text.split_once('.')?;
    Some(Expr::Forward {
        alias: alias.to_string(),
        function: function.to_string(),
    })
}

fn parse(
    source: &str,
    file: &str,
) -> std::result::Result<Vec<Stmt>, Vec<SyntaxError>> {
    let mut stmts = Vec::new();
    let mut errors = Vec::new();

    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let column = raw.len() - raw.trim_start().len() + 1;
        let error = |message: String| {
            SyntaxError::new(message, file, index + 1, column).with_line_source(raw)
        };
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["import", name] => {
                let alias = name.rsplit('/').next().unwrap_or(*name);
                stmts.push(Stmt::Import {
                    name: name.to_string(),
                    alias: alias.to_string(),
                });
            }
            ["import", name, "as", alias] => stmts.push(Stmt::Import {
                name: name.to_string(),
                alias: alias.to_string(),
            }),
            ["export", name, "=", rest @ ..] if !rest.is_empty() => {
                match parse_expr(&rest.join(" ")) {
                    Some(expr) => stmts.push(Stmt::Export {
                        name: name.to_string(),
                        expr,
                    }),
                    None => errors.push(error(format!("bad expression `{}`", rest.join(" ")))),
                }
            }
            ["fail", rest @ ..] => stmts.push(Stmt::Fail(rest.join(" "))),
            [first, ..] => errors.push(error(format!("unexpected token `{}`", first))),
            [] => {}
        }
    }

    if errors.is_empty() {
        Ok(stmts)
    } else {
        Err(errors)
    }
}

/// Compiler for the test language that counts compilations and executions.
#[derive(Default)]
pub struct LineCompiler {
    compiles: AtomicUsize,
    runs: Arc<Mutex<HashMap<String, usize>>>,
}

impl LineCompiler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    /// How many times bodies from resources whose path ends with `suffix` ran.
    pub fn runs(
        &self,
        suffix: &str,
    ) -> usize {
        self.runs
            .lock()
            .iter()
            .filter(|(path, _)| path.ends_with(suffix))
            .map(|(_, n)| *n)
            .sum()
    }
}

impl ScriptCompiler for LineCompiler {
    fn compile(
        &self,
        resource: &dyn Resource,
        source: &str,
    ) -> std::result::Result<Arc<dyn ModuleBody>, Vec<SyntaxError>> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let stmts = parse(source, resource.path())?;
        Ok(Arc::new(Program {
            path: resource.path().to_string(),
            stmts,
            runs: self.runs.clone(),
        }))
    }
}
