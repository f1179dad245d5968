use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

fn hermes_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("hermes");
    path
}

fn run_hermes(db_path: &std::path::Path, args: &[&str]) -> (String, String, bool) {
    let binary = hermes_binary();
    let output = Command::new(&binary)
        .arg("--db")
        .arg(db_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run hermes binary at {:?}: {}", binary, e));

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn setup() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("hermes.db");
    (tmp, db_path)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, db_path) = setup();
    let (stdout, stderr, success) = run_hermes(&db_path, &["init"]);
    assert!(success, "init failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("initialized"));
    assert!(db_path.exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, db_path) = setup();
    let (_, _, first) = run_hermes(&db_path, &["init"]);
    assert!(first, "first init failed");
    let (_, _, second) = run_hermes(&db_path, &["init"]);
    assert!(second, "second init failed (schema creation is not idempotent)");
}

#[test]
fn test_token_create_then_list_then_revoke() {
    let (_tmp, db_path) = setup();
    run_hermes(&db_path, &["init"]);

    let (create_out, create_err, create_ok) = run_hermes(&db_path, &["token", "create", "edge"]);
    assert!(create_ok, "token create failed: {create_err}");
    let id = create_out
        .lines()
        .find(|l| l.starts_with("id:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .expect("create output should contain an id")
        .to_string();
    assert!(create_out.contains("token:"), "create output should print the plaintext once");

    let (list_out, _, list_ok) = run_hermes(&db_path, &["token", "list"]);
    assert!(list_ok);
    assert!(list_out.contains(&id), "listed tokens should include the created id");
    assert!(!list_out.contains("token:"), "list must never print plaintext");

    let (_, revoke_err, revoke_ok) = run_hermes(&db_path, &["token", "revoke", &id]);
    assert!(revoke_ok, "revoke failed: {revoke_err}");
}

#[test]
fn test_sync_status_on_empty_queue() {
    let (_tmp, db_path) = setup();
    run_hermes(&db_path, &["init"]);
    let (stdout, _, success) = run_hermes(&db_path, &["sync", "status"]);
    assert!(success);
    assert!(stdout.contains("pending=0"));
}

#[test]
fn test_project_list_and_validate() {
    let (tmp, db_path) = setup();
    run_hermes(&db_path, &["init"]);

    let projects_path = tmp.path().join("projects.toml");
    fs::write(
        &projects_path,
        r#"
[[projects]]
name = "payments-rfc"
title = "Payments RFC Workspace"
short_name = "PAY"
status = "active"

[[projects.providers]]
type = "local"
workspace_path = "/workspace/payments"
state = "active"
"#,
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_hermes(&db_path, &["project", "list", "--projects-file", projects_path.to_str().unwrap()]);
    assert!(success, "project list failed: stdout={stdout}, stderr={stderr}");
    assert!(stdout.contains("payments-rfc"));

    let (_, _, valid) =
        run_hermes(&db_path, &["project", "validate", "--projects-file", projects_path.to_str().unwrap()]);
    assert!(valid, "a single active provider should validate cleanly");
}

#[test]
fn test_project_validate_rejects_no_active_provider() {
    let (tmp, db_path) = setup();
    run_hermes(&db_path, &["init"]);

    let projects_path = tmp.path().join("projects.toml");
    fs::write(
        &projects_path,
        r#"
[[projects]]
name = "orphaned"
title = "Orphaned Workspace"
short_name = "ORP"
status = "active"

[[projects.providers]]
type = "local"
workspace_path = "/workspace/orphaned"
state = "archived"
"#,
    )
    .unwrap();

    let (stdout, _, success) =
        run_hermes(&db_path, &["project", "validate", "--projects-file", projects_path.to_str().unwrap()]);
    assert!(!success, "a project with no active provider should fail validation");
    assert!(stdout.contains("ERROR"), "expected a printed validation error, got: {stdout}");
}
