use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn confgraph(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_confgraph"))
        .current_dir(dir)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute confgraph")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("base.yml"), "app:\n  name: X\n  workers: 2\n").unwrap();
    fs::write(
        dir.path().join("main.yml"),
        "include!: [base.yml]\napp:\n  version: \"1.0\"\ntitle: \"${app.name} v${app.version}\"\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_resolve_json() {
    let dir = project();
    let output = confgraph(
        dir.path(),
        &["resolve", "main.yml", "--allow-include", "*.yml", "--format", "json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["title"], "X v1.0");
    assert_eq!(value["app"]["workers"], 2);
}

#[test]
fn test_resolve_with_overrides() {
    let dir = project();
    let output = confgraph(
        dir.path(),
        &[
            "resolve",
            "main.yml",
            "confgraph.app.name=Y",
            "--set",
            "app.workers=8",
            "--allow-include",
            "*.yml",
            "--format",
            "json",
        ],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["title"], "Y v1.0");
    assert_eq!(value["app"]["workers"], 8);
}

#[test]
fn test_resolve_yaml_keeps_key_order() {
    let dir = project();
    let output = confgraph(dir.path(), &["resolve", "main.yml", "--allow-include", "*.yml"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.starts_with("app:\n  name: X\n  workers: 2\n  version:"), "{out}");
    assert!(out.ends_with("title: X v1.0\n"), "{out}");
}

#[test]
fn test_denied_include_fails_with_path_and_directive() {
    let dir = project();
    let output = confgraph(dir.path(), &["resolve", "main.yml"]);
    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("permission denied at include![0] (include!)"), "{err}");
}

#[test]
fn test_merge_keeps_references() {
    let dir = project();
    let output = confgraph(
        dir.path(),
        &["merge", "main.yml", "--allow-include", "*.yml", "--format", "json"],
    );
    assert!(output.status.success(), "{}", stderr(&output));
    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["title"], "${app.name} v${app.version}");
}

#[test]
fn test_graph_prints_edges() {
    let dir = project();
    let output = confgraph(dir.path(), &["graph", "main.yml", "--allow-include", "*.yml"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "title -> app.name\ntitle -> app.version\norder: title\n");
}
