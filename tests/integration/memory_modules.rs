//! 内存仓库上的模块解析与加载

use std::sync::Arc;

use yaoxiang_worker::{MemoryRepository, RepositoryResolver, Value, Worker, WorkerError};

use crate::common::LineCompiler;

fn setup(
    files: &[(&str, &str)],
    reloading: bool,
) -> (Arc<Worker>, MemoryRepository, Arc<LineCompiler>) {
    let repo = MemoryRepository::new("app");
    for (path, source) in files {
        repo.insert(path, source);
    }
    let compiler = LineCompiler::new();
    let resolver = RepositoryResolver::new(compiler.clone()).with_module_path(Arc::new(repo.clone()));
    let worker = Worker::builder(Arc::new(resolver))
        .reloading(reloading)
        .build();
    (worker, repo, compiler)
}

#[test]
fn test_relative_imports() {
    let (worker, _repo, _compiler) = setup(
        &[
            ("main.yx", "import ./lib/math as math\nexport sum = math.add\n"),
            ("lib/math.yx", "import ../shared\nexport add = shared.value\n"),
            ("shared.yx", "export value = 7\n"),
        ],
        false,
    );

    assert_eq!(worker.invoke("main", "sum", &[]).unwrap(), Value::Int(7));
    let mut loaded: Vec<String> = worker
        .loaded_modules()
        .iter()
        .map(|k| k.to_string())
        .collect();
    loaded.sort();
    assert_eq!(
        loaded,
        vec![
            "memory:app/lib/math.yx",
            "memory:app/main.yx",
            "memory:app/shared.yx"
        ]
    );
}

#[test]
fn test_directory_module() {
    let (worker, _repo, _compiler) = setup(
        &[
            ("main.yx", "import ./util\nexport name = util.name\n"),
            ("util/mod.yx", "export name = \"util\"\n"),
        ],
        false,
    );
    assert_eq!(
        worker.invoke("main", "name", &[]).unwrap(),
        Value::str("util")
    );
    assert_eq!(
        worker.invoke("util", "name", &[]).unwrap(),
        Value::str("util")
    );
}

#[test]
fn test_not_found_lists_candidates() {
    let (worker, _repo, _compiler) = setup(&[("main.yx", "import ./missing\n")], false);

    match worker.invoke("nowhere", "main", &[]) {
        Err(WorkerError::ModuleNotFound {
            name,
            searched_paths,
        }) => {
            assert_eq!(name, "nowhere");
            assert_eq!(
                searched_paths,
                vec!["memory:app/nowhere.yx", "memory:app/nowhere/mod.yx"]
            );
        }
        other => panic!("unexpected: {:?}", other),
    }

    match worker.invoke("main", "main", &[]) {
        Err(WorkerError::ModuleNotFound { name, .. }) => assert_eq!(name, "./missing"),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(worker.loaded_modules().is_empty());
}

#[test]
fn test_syntax_errors() {
    let (worker, _repo, compiler) = setup(
        &[
            ("bad.yx", "export x 1\n  what is this\nexport ok = 1\n"),
            ("good.yx", "export ok = 1\n"),
        ],
        false,
    );

    let err = worker.invoke("bad", "ok", &[]).unwrap_err();
    assert_eq!(err.to_string(), "2 syntax error(s) in memory:app/bad.yx");
    let errors = worker.errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(
        errors[0].to_string(),
        "memory:app/bad.yx:1:1: unexpected token `export`"
    );
    assert_eq!((errors[1].line, errors[1].column), (2, 3));
    assert_eq!(errors[1].line_source.as_deref(), Some("  what is this"));

    // 编译失败的脚本不缓存，下次调用会重新编译
    worker.invoke("bad", "ok", &[]).unwrap_err();
    assert_eq!(compiler.compiles(), 2);
    assert_eq!(worker.errors().len(), 2);

    worker.invoke("good", "ok", &[]).unwrap();
    assert!(worker.errors().is_empty());
}

#[test]
fn test_failing_module_is_not_cached() {
    let (worker, _repo, compiler) = setup(&[("boom.yx", "export x = 1\nfail boom\n")], false);

    for _ in 0..2 {
        let err = worker.invoke("boom", "x", &[]).unwrap_err();
        assert!(matches!(err, WorkerError::Script(_)));
        assert_eq!(err.to_string(), "boom");
    }
    assert!(worker.loaded_modules().is_empty());
    assert_eq!(compiler.runs("boom.yx"), 2);
    assert_eq!(compiler.compiles(), 1);
}

#[test]
fn test_circular_imports() {
    let (worker, _repo, compiler) = setup(
        &[
            ("a.yx", "import ./b\nexport x = 1\nexport via_b = b.y\n"),
            ("b.yx", "import ./a\nexport y = a.x\n"),
        ],
        true,
    );

    assert_eq!(worker.invoke("a", "via_b", &[]).unwrap(), Value::Int(1));
    assert_eq!(worker.invoke("b", "y", &[]).unwrap(), Value::Int(1));
    assert_eq!(compiler.runs("a.yx"), 1);
    assert_eq!(compiler.runs("b.yx"), 1);
}

#[test]
fn test_release_mode_ignores_changes() {
    let (worker, repo, compiler) = setup(&[("main.yx", "export v = 1\n")], false);

    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    repo.insert("main.yx", "export v = 2\n");
    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(1));
    assert_eq!(compiler.compiles(), 1);
}

#[test]
fn test_container_change_reloads_everything() {
    let (worker, repo, compiler) = setup(
        &[
            ("main.yx", "export v = 1\n"),
            ("other.yx", "export v = 10\n"),
        ],
        true,
    );

    worker.invoke("main", "v", &[]).unwrap();
    worker.invoke("other", "v", &[]).unwrap();
    worker.invoke("other", "v", &[]).unwrap();
    assert_eq!(compiler.runs("other.yx"), 1);

    // 容器式资源共享一个时间戳，任何修改都会让所有模块过期
    repo.insert("main.yx", "export v = 2\n");
    assert_eq!(worker.invoke("main", "v", &[]).unwrap(), Value::Int(2));
    assert_eq!(worker.invoke("other", "v", &[]).unwrap(), Value::Int(10));
    assert_eq!(compiler.runs("other.yx"), 2);
}

/// `app` holds main.yx and a.yx, `lib` holds b.yx. main imports b then a, and
/// a imports b as well.
fn diamond() -> (Arc<Worker>, MemoryRepository, Arc<LineCompiler>) {
    let app = MemoryRepository::new("app");
    app.insert(
        "main.yx",
        "import b\nimport ./a\nexport direct = b.v\nexport via_a = a.val\n",
    );
    app.insert("a.yx", "import b\nexport val = b.v\n");
    let lib = MemoryRepository::new("lib");
    lib.insert("b.yx", "export v = 1\n");

    let compiler = LineCompiler::new();
    let resolver = RepositoryResolver::new(compiler.clone())
        .with_module_path(Arc::new(app))
        .with_module_path(Arc::new(lib.clone()));
    let worker = Worker::builder(Arc::new(resolver)).reloading(true).build();
    (worker, lib, compiler)
}

#[test]
fn test_reload_reaches_every_importer() {
    let (worker, lib, compiler) = diamond();
    assert_eq!(worker.invoke("main", "direct", &[]).unwrap(), Value::Int(1));
    assert_eq!(worker.invoke("main", "via_a", &[]).unwrap(), Value::Int(1));

    lib.insert("b.yx", "export v = 2\n");
    assert_eq!(worker.invoke("main", "direct", &[]).unwrap(), Value::Int(2));
    assert_eq!(worker.invoke("main", "via_a", &[]).unwrap(), Value::Int(2));
    assert_eq!(compiler.runs("a.yx"), 2);
    assert_eq!(compiler.runs("b.yx"), 2);
}

#[test]
fn test_reload_after_dependency_loaded_directly() {
    let (worker, lib, compiler) = diamond();
    assert_eq!(worker.invoke("a", "val", &[]).unwrap(), Value::Int(1));

    lib.insert("b.yx", "export v = 2\n");
    assert_eq!(worker.invoke("b", "v", &[]).unwrap(), Value::Int(2));
    assert_eq!(worker.invoke("a", "val", &[]).unwrap(), Value::Int(2));
    assert_eq!(compiler.runs("a.yx"), 2);
    assert_eq!(compiler.runs("b.yx"), 2);

    // 没有新的修改时保持原样
    assert_eq!(worker.invoke("a", "val", &[]).unwrap(), Value::Int(2));
    assert_eq!(compiler.runs("a.yx"), 2);
}
