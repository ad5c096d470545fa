//! 文件系统上的模块加载、重载与配置

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;
use yaoxiang_worker::{
    ModuleConfig, RepositoryResolver, RuntimeConfig, Value, Worker, WorkerError,
};

use crate::common::LineCompiler;

fn write(
    dir: &Path,
    name: &str,
    source: &str,
) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, source).unwrap();
}

/// Rewrite a file and move its modification time forward.
fn rewrite(
    dir: &Path,
    name: &str,
    source: &str,
    ahead: u64,
) {
    write(dir, name, source);
    let file = fs::OpenOptions::new()
        .write(true)
        .open(dir.join(name))
        .unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(ahead))
        .unwrap();
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.yx", "import ./dep\nexport v = dep.v\n");
    write(dir.path(), "dep.yx", "export v = 1\n");
    write(dir.path(), "other.yx", "export v = 100\n");
    dir
}

fn worker_for(
    dir: &Path,
    reloading: bool,
) -> (Arc<Worker>, Arc<LineCompiler>) {
    let compiler = LineCompiler::new();
    let config = ModuleConfig {
        paths: vec![dir.to_path_buf()],
        ..ModuleConfig::default()
    };
    let resolver = RepositoryResolver::from_config(&config, compiler.clone());
    let worker = Worker::builder(Arc::new(resolver))
        .reloading(reloading)
        .build();
    (worker, compiler)
}

#[test]
fn test_reload_follows_file_changes() {
    let dir = project();
    let (worker, compiler) = worker_for(dir.path(), true);

    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    assert_eq!(worker.invoke("other", "v", &[]).unwrap(), Value::Int(100));
    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    assert_eq!(compiler.runs("main.yx"), 1);

    rewrite(dir.path(), "dep.yx", "export v = 2\n", 10);
    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(2));
    assert_eq!(worker.invoke("other", "v", &[]).unwrap(), Value::Int(100));

    // 依赖变化会让导入者重新执行，但不会重新编译导入者
    assert_eq!(compiler.runs("main.yx"), 2);
    assert_eq!(compiler.runs("dep.yx"), 2);
    assert_eq!(compiler.runs("other.yx"), 1);
    assert_eq!(compiler.compiles(), 4);
}

#[test]
fn test_release_worker_keeps_loaded_code() {
    let dir = project();
    let (worker, compiler) = worker_for(dir.path(), false);

    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    rewrite(dir.path(), "dep.yx", "export v = 2\n", 10);
    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    assert_eq!(compiler.compiles(), 2);
}

#[test]
fn test_removed_dependency_is_reported() {
    let dir = project();
    let (worker, _compiler) = worker_for(dir.path(), true);

    worker.invoke("main", "v", &[]).unwrap();
    fs::remove_file(dir.path().join("dep.yx")).unwrap();

    match worker.invoke("main", "v", &[]) {
        Err(WorkerError::ModuleNotFound {
            name,
            searched_paths,
        }) => {
            assert_eq!(name, "./dep");
            assert_eq!(searched_paths.len(), 2);
            assert!(searched_paths[0].ends_with("/dep.yx"));
            assert!(searched_paths[1].ends_with("/dep/mod.yx"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_worker_from_config_file() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "yaoxiang.toml",
        r#"
log_level = "debug"

[worker]
reloading = true
thread_name_prefix = "scripts"

[modules]
paths = ["scripts", "vendor"]
"#,
    );
    write(dir.path(), "scripts/app.yx", "import lib\nexport v = lib.v\n");
    write(dir.path(), "vendor/lib.yx", "export v = \"vendored\"\n");

    let config = RuntimeConfig::load(dir.path().join("yaoxiang.toml")).unwrap();
    assert!(config.worker.reloading);
    assert_eq!(config.modules.paths[0], dir.path().join("scripts"));

    let resolver = RepositoryResolver::from_config(&config.modules, LineCompiler::new());
    assert_eq!(resolver.module_path().len(), 2);
    let worker = Worker::builder(Arc::new(resolver))
        .config(config.worker.clone())
        .build();
    assert!(worker.is_reloading());
    assert_eq!(worker.config().thread_name_prefix, "scripts");

    assert_eq!(
        worker.invoke("app", "v", &[]).unwrap(),
        Value::str("vendored")
    );

    match worker.invoke("missing", "v", &[]) {
        Err(WorkerError::ModuleNotFound { searched_paths, .. }) => {
            assert_eq!(searched_paths.len(), 4);
            assert!(searched_paths[0].ends_with("scripts/missing.yx"));
            assert!(searched_paths[3].ends_with("vendor/missing/mod.yx"));
        }
        other => panic!("unexpected: {:?}", other),
    }
}
