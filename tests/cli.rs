mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use common::TestLibrary;

fn pw_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pw");
    path
}

fn setup() -> (TestLibrary, PathBuf) {
    let lib = TestLibrary::new();
    let config_dir = lib.root().join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("paperweave.toml");
    fs::write(&config_path, lib.config_text("disabled", "")).unwrap();
    (lib, config_path)
}

fn pw(config: &Path, args: &[&str]) -> Output {
    Command::new(pw_binary())
        .arg("--config")
        .arg(config)
        .args(args)
        .output()
        .expect("failed to run pw")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_init_is_idempotent() {
    let (lib, config) = setup();

    let first = pw(&config, &["init"]);
    assert!(first.status.success(), "{:?}", first);
    assert!(stdout(&first).contains("Database initialized successfully."));
    assert!(lib.root().join("data/pw.sqlite").exists());

    let second = pw(&config, &["init"]);
    assert!(second.status.success(), "{:?}", second);
}

#[test]
fn test_run_then_query() {
    let (lib, config) = setup();
    lib.add_paper("a", "Graph Neural Networks", "Ada Lovelace, Alan Turing");
    lib.add_paper("b", "Graph Neural Network Survey", "Ada Lovelace, Grace Hopper");

    let run = pw(&config, &["run"]);
    assert!(run.status.success(), "{:?}", run);
    let out = stdout(&run);
    assert!(out.contains("scanned 2 files: 2 new"), "{}", out);
    assert!(out.contains("ok"));

    let list = pw(&config, &["list", "Unclassified"]);
    assert!(list.status.success());
    assert!(stdout(&list).contains("Graph Neural Networks"));

    let search = pw(&config, &["search", "lovelace"]);
    assert!(search.status.success());
    let out = stdout(&search);
    assert!(out.contains("Graph Neural Networks"));
    assert!(out.contains("Graph Neural Network Survey"));

    let get = pw(&config, &["get", "1"]);
    assert!(get.status.success());
    assert!(stdout(&get).contains("title: Graph Neural Networks"));

    let stats = pw(&config, &["stats"]);
    assert!(stats.status.success());
    let out = stdout(&stats);
    assert!(out.contains("Documents:   2"), "{}", out);
    assert!(out.contains("coauthor"));

    let export_path = lib.root().join("graph.json");
    let export = pw(
        &config,
        &["export", "--output", export_path.to_str().unwrap()],
    );
    assert!(export.status.success(), "{:?}", export);
    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&export_path).unwrap()).unwrap();
    assert!(json["edges"].as_array().unwrap().len() >= 2);

    let subgraph = pw(&config, &["subgraph", "Unclassified"]);
    assert!(subgraph.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&subgraph)).unwrap();
    assert_eq!(json["documents"].as_array().unwrap().len(), 2);
}

#[test]
fn test_unknown_document_fails() {
    let (_lib, config) = setup();
    let get = pw(&config, &["get", "99"]);
    assert!(!get.status.success());
    assert!(String::from_utf8_lossy(&get.stderr).contains("not found"));
}

#[test]
fn test_unknown_subject_fails() {
    let (_lib, config) = setup();
    let list = pw(&config, &["list", "Astrology"]);
    assert!(!list.status.success());
}

#[test]
fn test_graph_rebuild_and_recover() {
    let (_lib, config) = setup();
    let rebuild = pw(&config, &["graph", "rebuild", "--full"]);
    assert!(rebuild.status.success(), "{:?}", rebuild);
    assert!(stdout(&rebuild).contains("graph rebuild (full)"));

    let recover = pw(&config, &["recover"]);
    assert!(recover.status.success(), "{:?}", recover);
    assert!(stdout(&recover).contains("reservations released: 0"));
}
