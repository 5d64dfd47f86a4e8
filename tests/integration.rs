//! End-to-end CLI tests driving the `ragctl` binary directly.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ragctl_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ragctl");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("blobs")).unwrap();

    let config_content = format!(
        r#"
        [database]
        path = "{data}/rag.sqlite"

        [object_store]
        backend = "local"
        [object_store.local]
        root = "{blobs}"

        [chunking]
        min_tokens = 4
        target_tokens = 40
        max_tokens = 80
        overlap_ratio = 0.15

        [[embedding]]
        id = "default"
        provider = "disabled"
        dims = 3

        [server]
        bind = "127.0.0.1:0"
        "#,
        data = root.join("data").display(),
        blobs = root.join("blobs").display(),
    );

    let config_path = root.join("config").join("rag.toml");
    fs::write(&config_path, config_content).unwrap();
    (tmp, config_path)
}

fn run_ragctl(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ragctl_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run ragctl binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_ragctl(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success1) = run_ragctl(&config_path, &["init"]);
    assert!(success1, "first init failed");
    let (_, _, success2) = run_ragctl(&config_path, &["init"]);
    assert!(success2, "second init failed (not idempotent)");
}

#[test]
fn test_ingest_with_disabled_embedding_provider_fails_but_records_the_file() {
    let (tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["init"]);

    let doc_path = tmp.path().join("doc.txt");
    fs::write(
        &doc_path,
        "The system shall support offline mode for field deployments.\n\nIt must also log every request.",
    )
    .unwrap();

    // The test config's "default" embedding provider is the "disabled" kind,
    // so ingestion fails at the embedding step — but the file upload and the
    // failed-asset bookkeeping both still happen (§4.3 "Processing Job state
    // machine" marks the asset 'failed' rather than leaving it dangling).
    let (_, stderr, success) = run_ragctl(
        &config_path,
        &["ingest", doc_path.to_str().unwrap(), "--project-id", "proj-a"],
    );
    assert!(!success, "ingest with a disabled embedding provider should fail");
    assert!(stderr.contains("disabled"), "expected a disabled-provider error, got: {}", stderr);
}

#[test]
fn test_ingest_unreadable_path_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["init"]);

    let (_, stderr, success) = run_ragctl(
        &config_path,
        &["ingest", "/nonexistent/path.txt", "--project-id", "proj-a"],
    );
    assert!(!success, "ingest of a missing file should fail");
    assert!(!stderr.is_empty());
}

#[test]
fn test_search_with_disabled_embedding_provider_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["init"]);

    // The "default" provider in the test config is the "disabled" kind, so
    // embedding the query itself must fail rather than silently return no
    // results.
    let (_, stderr, success) = run_ragctl(
        &config_path,
        &["search", "--project-id", "proj-a", "what does the system do"],
    );
    assert!(!success, "search against a disabled embedding provider should fail");
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_ask_with_disabled_embedding_provider_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["init"]);

    let (_, stderr, success) = run_ragctl(
        &config_path,
        &["ask", "--project-id", "proj-a", "what does the system do"],
    );
    assert!(!success, "ask against a disabled embedding provider should fail");
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_search_unknown_embedding_provider_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_ragctl(&config_path, &["init"]);

    let (_, stderr, success) = run_ragctl(
        &config_path,
        &[
            "search",
            "--project-id",
            "proj-a",
            "--embedding-provider-id",
            "nonexistent",
            "anything",
        ],
    );
    assert!(!success, "unknown embedding provider should fail");
    assert!(stderr.contains("unknown embedding provider"));
}
