use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use docgate::connector::FilesystemConnector;

fn docgate_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docgate"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Compressor K-201 vibration exceeded alarm limit during startup. Bearing replaced.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Shift log\n\nCooling tower fan 2 restarted after lube oil top-up.",
    )
    .unwrap();
    fs::write(
        files_dir.join("legacy.doc"),
        [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0, 0, 0],
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/docgate.sqlite"

[ocr]
engine = "disabled"

[embedding]
provider = "hash"
dims = 128

[logging]
level = "warn"

[server]
bind = "127.0.0.1:7341"

[connectors.filesystem]
root = "{root}/files"
include_globs = ["**/*"]
exclude_globs = []
follow_symlinks = false
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docgate.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docgate(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docgate_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docgate binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_docgate(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/docgate.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_docgate(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_docgate(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_outcomes() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    let (stdout, stderr, success) = run_docgate(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("fetched: 3"));
    assert!(stdout.contains("indexed: 2"));
    assert!(stdout.contains("needs review: 1"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_twice_skips_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let (stdout, _, success) = run_docgate(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("skipped (unchanged): 3"));
    assert!(stdout.contains("chunks written: 0"));
}

#[test]
fn test_ingest_limit() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    let (stdout, _, success) = run_docgate(&config_path, &["ingest", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("fetched: 1"));
}

#[test]
fn test_search_finds_document() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let alpha = FilesystemConnector::document_id("alpha.txt");

    for mode in ["hybrid", "text", "vector"] {
        let (stdout, stderr, success) = run_docgate(
            &config_path,
            &["search", "compressor vibration", "--mode", mode],
        );
        assert!(success, "search failed: {}", stderr);
        let first = stdout.lines().next().unwrap_or_default();
        assert!(first.starts_with("1. ["), "mode {}: {}", mode, stdout);
        assert!(first.contains(&alpha), "mode {}: {}", mode, stdout);
    }
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let (a, _, _) = run_docgate(&config_path, &["search", "oil"]);
    let (b, _, _) = run_docgate(&config_path, &["search", "oil"]);
    assert_eq!(a, b);
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    let (stdout, _, success) = run_docgate(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_tag_filter() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let (stdout, _, success) = run_docgate(
        &config_path,
        &["search", "compressor", "--tag", "path=beta.md", "--mode", "text"],
    );
    assert!(success);
    let alpha = FilesystemConnector::document_id("alpha.txt");
    assert!(!stdout.contains(&alpha));

    let (_, stderr, success) = run_docgate(&config_path, &["search", "x", "--tag", "broken"]);
    assert!(!success);
    assert!(stderr.contains("key=value"));
}

#[test]
fn test_invalid_mode_fails() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    let (_, stderr, success) = run_docgate(&config_path, &["search", "x", "--mode", "fuzzy"]);
    assert!(!success);
    assert!(stderr.contains("Unknown search mode"));
}

#[test]
fn test_review_list_and_resolve() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let legacy = FilesystemConnector::document_id("legacy.doc");

    let (stdout, _, success) = run_docgate(&config_path, &["review", "list"]);
    assert!(success);
    assert!(stdout.contains(&legacy));
    assert!(stdout.contains("unsupported_type"));

    let (stdout, stderr, success) = run_docgate(
        &config_path,
        &["review", "resolve", &legacy, "--action", "reject"],
    );
    assert!(success, "resolve failed: {}", stderr);
    assert!(stdout.contains("rejected"));

    let (stdout, _, _) = run_docgate(&config_path, &["review", "list"]);
    assert!(stdout.contains("Review queue is empty."));

    let (_, _, success) = run_docgate(
        &config_path,
        &["review", "resolve", &legacy, "--action", "reject"],
    );
    assert!(!success);
}

#[test]
fn test_document_shows_history_and_chunks() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let alpha = FilesystemConnector::document_id("alpha.txt");

    let (stdout, stderr, success) = run_docgate(&config_path, &["document", &alpha]);
    assert!(success, "document failed: {}", stderr);
    assert!(stdout.contains("--- Document ---"));
    assert!(stdout.contains("status:        indexed"));
    assert!(stdout.contains("route:         direct_text"));
    assert!(stdout.contains("--- Chunks (1) ---"));
    assert!(stdout.contains("Compressor K-201"));
}

#[test]
fn test_document_not_found() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    let (_, stderr, success) = run_docgate(&config_path, &["document", "does-not-exist"]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_reconcile_runs() {
    let (_tmp, config_path) = setup_test_env();

    run_docgate(&config_path, &["init"]);
    run_docgate(&config_path, &["ingest"]);
    let (stdout, _, success) = run_docgate(&config_path, &["reconcile", "--policy", "orphan"]);
    assert!(success);
    assert!(stdout.contains("reconcile (orphan)"));
    assert!(stdout.contains("documents affected: 0"));
}

#[test]
fn test_ingest_without_connector_fails() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("docgate.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/db.sqlite\"\n[ocr]\nengine = \"disabled\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_docgate(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stderr.contains("connectors.filesystem"));
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_docgate(Path::new("/nonexistent/docgate.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
