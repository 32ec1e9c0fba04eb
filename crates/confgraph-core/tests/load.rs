//! End-to-end loading from files on disk.

use confgraph_core::{
    Arguments, CapabilityRegistry, ErrorKind, InvocationError, LoadOptions, Object, SecurityPolicy, Source, Value, load,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn write_files(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    dir
}

fn permissive() -> LoadOptions {
    LoadOptions::new().with_policy(SecurityPolicy::permissive())
}

fn json(value: &Value) -> String {
    serde_json::to_string(value).unwrap()
}

#[test]
fn test_base_and_main() {
    let dir = write_files(&[
        ("base.yml", "app:\n  name: X\n"),
        (
            "main.yml",
            "include!: [base.yml]\napp:\n  version: \"1.0\"\ntitle: \"${app.name} v${app.version}\"\n",
        ),
    ]);
    let options = LoadOptions::new().with_policy(SecurityPolicy::restrictive().allow_include("*.yml"));
    let config = load([dir.path().join("main.yml")], &options).unwrap();
    assert_eq!(json(&config.config), r#"{"app":{"name":"X","version":"1.0"},"title":"X v1.0"}"#);
}

#[test]
fn test_restrictive_policy_blocks_unlisted_include() {
    let dir = write_files(&[("base.yml", "a: 1"), ("main.yml", "include!: [base.yml]")]);
    let err = load([dir.path().join("main.yml")], &LoadOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[test]
fn test_merge_strategies_across_files() {
    let dir = write_files(&[
        ("defaults.yml", "steps: [a, b]\ndb: {host: localhost, port: 5432, pool: {size: 5}}\nkeep: [x]"),
        (
            "main.yml",
            "include!: [defaults.yml]\n\
             steps: !extend [c]\n\
             db: !patch {host: remote}\n\
             keep: [y]\n",
        ),
    ]);
    let config = load([dir.path().join("main.yml")], &permissive()).unwrap();
    assert_eq!(json(config.get("steps").unwrap()), r#"["a","b","c"]"#);
    assert_eq!(json(config.get("db").unwrap()), r#"{"host":"remote"}"#);
    assert_eq!(json(config.get("keep").unwrap()), r#"["y"]"#);
}

#[test]
fn test_patch_or_extend_needs_an_existing_key() {
    let dir = write_files(&[
        ("lone.yml", "a: !patch {x: 1}\nb: !extend [1]"),
        ("base.yml", "steps: [a]"),
        ("main.yml", "include!: [base.yml]\nsteps: !extend [b]\nextra: !extend [c]"),
        ("later.yml", "steps: !extend [c]"),
    ]);
    let err = load([dir.path().join("lone.yml")], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert!(err.to_string().starts_with("merge error at a (!patch)"), "{err}");

    let err = load([dir.path().join("main.yml")], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Merge);
    assert!(err.to_string().starts_with("merge error at extra (!extend)"), "{err}");

    let config = load([dir.path().join("base.yml"), dir.path().join("later.yml")], &permissive()).unwrap();
    assert_eq!(json(config.get("steps").unwrap()), r#"["a","c"]"#);
}

#[test]
fn test_includes_nest_relative_to_their_file() {
    let dir = write_files(&[
        ("conf/main.yml", "include!: [parts/db.yml]\nservice: !include parts/service.yml"),
        ("conf/parts/db.yml", "include!: [common.yml]\ndb: {port: 5432}"),
        ("conf/parts/common.yml", "db: {host: h}"),
        ("conf/parts/service.yml", "url: 'http://${db.host}:${db.port}'"),
    ]);
    let config = load([dir.path().join("conf/main.yml")], &permissive()).unwrap();
    assert_eq!(config.get("service.url"), Some(&Value::from("http://h:5432")));
}

#[test]
fn test_include_cycle_is_reported() {
    let dir = write_files(&[("a.yml", "include!: [b.yml]"), ("b.yml", "include!: [a.yml]")]);
    let err = load([dir.path().join("a.yml")], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Include);
    assert!(err.to_string().contains("include cycle"), "{err}");
}

#[test]
fn test_include_from_validates_keys() {
    let dir = write_files(&[
        ("parts.yml", "model: {layers: 2}\ntrainer: {epochs: 3}\n_scratch: 1"),
        ("main.yml", "name: run\n'model, trainer': !include_from parts.yml\nseed: 7"),
        ("bad.yml", "'model, trainer, data': !include_from parts.yml"),
    ]);
    let config = load([dir.path().join("main.yml")], &permissive()).unwrap();
    assert_eq!(
        json(&config.config),
        r#"{"name":"run","model":{"layers":2},"trainer":{"epochs":3},"seed":7}"#
    );

    let err = load([dir.path().join("bad.yml")], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Include);
    assert!(err.to_string().contains("missing: [data]"), "{err}");
    assert!(!err.to_string().contains("unexpected"), "{err}");
}

#[test]
fn test_dynamic_include_path() {
    let dir = write_files(&[
        ("main.yml", "env_name: staging\n_e: !include_at 'envs/${env_name}.yml'"),
        ("envs/staging.yml", "replicas: 2"),
    ]);
    let config = load([dir.path().join("main.yml")], &permissive()).unwrap();
    assert_eq!(config.get("replicas"), Some(&Value::Int(2)));
}

#[test]
fn test_later_sources_and_overrides_win() {
    let dir = write_files(&[
        ("a.yml", "lr: 0.1\nbatch: 32\nname: run"),
        ("b.yml", "batch: 64"),
    ]);
    let options = permissive().with_override("confgraph.lr=0.5").with_override("confgraph.tags=[x, y]");
    let sources: Vec<Source> = vec![dir.path().join("a.yml").into(), dir.path().join("b.yml").into()];
    let config = load(sources, &options).unwrap();
    assert_eq!(config.get("lr"), Some(&Value::Float(0.5)));
    assert_eq!(config.get("batch"), Some(&Value::Int(64)));
    assert_eq!(json(config.get("tags").unwrap()), r#"["x","y"]"#);
}

#[test]
fn test_references_preserve_types() {
    let dir = write_files(&[(
        "main.yml",
        "n: 3\nratio: 0.5\nflag: true\nitems: [1, 2]\nnothing: null\n\
         copy: {n: '${n}', ratio: '${ratio}', flag: '${flag}', items: '${items}', nothing: '${nothing}'}\n\
         doubled: '${n * 2}'\n\
         in_range: '${0 < n < 3}'\n\
         text: 'n=${n}'\n",
    )]);
    let config = load([dir.path().join("main.yml")], &permissive()).unwrap();
    assert_eq!(json(config.get("copy").unwrap()), r#"{"n":3,"ratio":0.5,"flag":true,"items":[1,2],"nothing":null}"#);
    assert_eq!(config.get("doubled"), Some(&Value::Int(6)));
    assert_eq!(config.get("in_range"), Some(&Value::Bool(false)));
    assert_eq!(config.get("text"), Some(&Value::from("n=3")));
}

#[test]
fn test_circular_reference() {
    let dir = write_files(&[("main.yml", "a: '${b}'\nb: '${c}'\nc: '${a}'")]);
    let err = load([dir.path().join("main.yml")], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resolution);
    assert!(err.to_string().contains("circular reference: a -> b -> c -> a"), "{err}");
}

#[test]
fn test_env_values() {
    // SAFETY: the variable name is unique to this test.
    unsafe {
        std::env::set_var("CONFGRAPH_LOAD_TEST_HOST", "db.internal");
    }
    let dir = write_files(&[(
        "main.yml",
        "host: !env CONFGRAPH_LOAD_TEST_HOST\n\
         port: !env {var: CONFGRAPH_LOAD_TEST_PORT_UNSET, default: 5432}\n",
    )]);
    let options = LoadOptions::new().with_policy(SecurityPolicy::restrictive().allow_env("CONFGRAPH_LOAD_TEST_*"));
    let config = load([dir.path().join("main.yml")], &options).unwrap();
    assert_eq!(config.get("host"), Some(&Value::from("db.internal")));
    assert_eq!(config.get("port"), Some(&Value::Int(5432)));

    let err = load([dir.path().join("main.yml")], &LoadOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[derive(Debug)]
struct Pool {
    size: i64,
}

impl Object for Pool {
    fn type_name(&self) -> &str {
        "Pool"
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "size" => Some(Value::Int(self.size)),
            _ => None,
        }
    }

    fn invoke(&self, member: &str, _args: Arguments) -> Result<Value, InvocationError> {
        match member {
            "describe" => Ok(Value::string(format!("pool of {}", self.size))),
            _ => Err(InvocationError::UnknownMember {
                type_name: "Pool".to_string(),
                member: member.to_string(),
            }),
        }
    }
}

static POOLS_BUILT: AtomicUsize = AtomicUsize::new(0);

fn registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::with_builtins();
    registry.register("db.Pool", |args: Arguments| -> Result<Value, InvocationError> {
        POOLS_BUILT.fetch_add(1, Ordering::SeqCst);
        let size = args.keyword.get("size").and_then(Value::as_i64).unwrap_or(1);
        Ok(Value::object(Pool { size }))
    });
    registry
}

#[test]
fn test_instances_are_built_once_and_shared() {
    let dir = write_files(&[(
        "main.yml",
        "pool: !@db.Pool {size: 4}\n\
         users: {pool: '${pool}', size: '${pool.size}'}\n\
         orders: {pool: '${pool}'}\n\
         summary: !$@pool.describe\n",
    )]);
    let before = POOLS_BUILT.load(Ordering::SeqCst);
    let options = LoadOptions::new()
        .with_policy(SecurityPolicy::restrictive().allow_import("db.*"))
        .with_registry(registry());
    let config = load([dir.path().join("main.yml")], &options).unwrap();
    assert_eq!(POOLS_BUILT.load(Ordering::SeqCst) - before, 1);

    let pool = config.get("pool").and_then(Value::as_object).unwrap();
    let users = config.get("users.pool").and_then(Value::as_object).unwrap();
    let orders = config.get("orders.pool").and_then(Value::as_object).unwrap();
    assert!(Arc::ptr_eq(pool, users));
    assert!(Arc::ptr_eq(pool, orders));
    assert_eq!(config.get("users.size"), Some(&Value::Int(4)));
    assert_eq!(config.get("summary"), Some(&Value::from("pool of 4")));
}

#[test]
fn test_aliases_reach_nested_instances() {
    let dir = write_files(&[(
        "main.yml",
        "services:\n  primary: !@db.Pool {id: main_pool, size: 8}\nreport: '${main_pool.size}'\n",
    )]);
    let options = permissive().with_registry(registry());
    let config = load([dir.path().join("main.yml")], &options).unwrap();
    assert_eq!(config.get("report"), Some(&Value::Int(8)));
    assert!(config.instance("main_pool").is_some());
}

#[test]
fn test_import_denied_by_restrictive_policy() {
    let dir = write_files(&[("main.yml", "pool: !@db.Pool {size: 4}")]);
    let options = LoadOptions::new().with_registry(registry());
    let err = load([dir.path().join("main.yml")], &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
    assert!(err.to_string().contains("db.Pool"), "{err}");
}

#[test]
fn test_loading_is_idempotent() {
    let dir = write_files(&[
        ("base.yml", "a: 1\nb: [1, 2]"),
        ("main.yml", "include!: [base.yml]\nc: '${a + 1}'\nd: [3]\nb: !extend [3]"),
    ]);
    let path = dir.path().join("main.yml");
    let first = load([path.as_path()], &permissive()).unwrap();
    let second = load([path.as_path()], &permissive()).unwrap();
    assert_eq!(json(&first.config), json(&second.config));
    assert_eq!(json(&first.config), r#"{"a":1,"b":[1,2,3],"c":2,"d":[3]}"#);
}

#[test]
fn test_missing_root_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load([Path::new(&dir.path().join("absent.yml"))], &permissive()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
