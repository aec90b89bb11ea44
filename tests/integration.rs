use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn legal_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("legal");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    // Port 9 (discard) has no HTTP listener, so any request fails fast.
    let config_content = format!(
        r#"[db]
path = "{root}/data/legal.sqlite"

[server]
bind = "127.0.0.1:0"

[auth]
api_key = "test-key"
app_password = "secret"

[client]
api_url = "http://127.0.0.1:9/api/v1"
api_key = "test-key"
session_file = "{root}/data/session.json"
timeout_secs = 5
"#,
        root = root.display()
    );

    let config_path = config_dir.join("legal.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_legal(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = legal_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("LEGAL_API_URL")
        .env_remove("LEGAL_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run legal binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_legal(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/legal.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_legal(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_legal(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_init_requires_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_legal(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_whoami_without_session() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_legal(&config_path, &["whoami"]);
    assert!(success, "whoami failed: {}", stderr);
    assert!(stdout.contains("Not logged in."));
}

#[test]
fn test_docs_require_login() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_legal(&config_path, &["docs", "list"]);
    assert!(success);
    assert!(stdout.contains("legal login"));
}

#[test]
fn test_corrupt_session_file_means_logged_out() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("data/session.json"), "{ not json").unwrap();

    let (stdout, _, success) = run_legal(&config_path, &["whoami"]);
    assert!(success);
    assert!(stdout.contains("Not logged in."));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_legal(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("legal"));
    assert!(stdout.contains("upload"));
}
