//! `wgplan` commands driven in-process against a temporary state root

use clap::Parser;
use serde_json::{json, Value};
use std::path::Path;
use tempfile::TempDir;
use workgraph_cli::{execute, report_error, Cli};

fn document(tasks: Value) -> Value {
    json!({
        "schema_version": "v1",
        "domain": "software",
        "goal": "Ship the parser",
        "track": { "id": "TRK", "name": "Parser" },
        "phases": [{ "id": "P1", "name": "Build", "tasks": tasks }],
    })
}

fn write_doc(dir: &Path, name: &str, doc: &Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(doc).unwrap()).unwrap();
    path.display().to_string()
}

async fn wgplan(root: &Path, args: &[&str]) -> (i32, String) {
    let mut argv = vec!["wgplan", "--root", root.to_str().unwrap()];
    argv.extend_from_slice(args);
    let cli = Cli::parse_from(argv);
    let json = cli.json;
    let mut out = Vec::new();
    let code = match execute(cli, &mut out).await {
        Ok(code) => code,
        Err(err) => report_error(&err, json, &mut out, &mut std::io::sink()),
    };
    (code, String::from_utf8(out).unwrap())
}

fn marker<'a>(stdout: &'a str, name: &str) -> Option<&'a str> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix('='))
}

#[tokio::test]
async fn test_validate_rejects_empty_definition_of_done() {
    let root = TempDir::new().unwrap();
    let file = write_doc(
        root.path(),
        "bad.json",
        &document(json!([{ "id": "T-1", "title": "Nothing to check", "definition_of_done": [] }])),
    );

    let (code, stdout) = wgplan(root.path(), &["--json", "validate", &file]).await;

    assert_eq!(code, 2);
    // Exactly one document on stdout
    let body: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["valid"], false);
    assert!(body["violations"].to_string().contains("definition_of_done"));
}

#[tokio::test]
async fn test_validate_text_reports_problems_once() {
    let root = TempDir::new().unwrap();
    let file = write_doc(
        root.path(),
        "bad.json",
        &document(json!([{ "id": "T-1", "title": "Nothing to check", "definition_of_done": [] }])),
    );

    let (code, stdout) = wgplan(root.path(), &["validate", &file]).await;

    assert_eq!(code, 2);
    assert_eq!(stdout.matches("problem(s)").count(), 1);
}

#[tokio::test]
async fn test_score_json_lists_every_task() {
    let root = TempDir::new().unwrap();
    let file = write_doc(
        root.path(),
        "wg.json",
        &document(json!([
            { "id": "T-1", "title": "Lexer", "definition_of_done": [{ "kind": "command", "cmd": "true" }], "impact": 4 },
            { "id": "T-2", "title": "Docs", "definition_of_done": [{ "kind": "command", "cmd": "true" }], "impact": 1 },
        ])),
    );

    let (code, stdout) = wgplan(root.path(), &["--json", "score", &file]).await;

    assert_eq!(code, 0);
    let body: Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(body["profile"], "default");
    assert_eq!(body["tasks"].as_array().unwrap().len(), 2);
    assert!(body["workgraph_id"].as_str().unwrap().starts_with("wg-"));
}

#[tokio::test]
async fn test_sprint_defaults_to_dry_run() {
    let root = TempDir::new().unwrap();
    let cwd = TempDir::new().unwrap();
    let file = write_doc(
        root.path(),
        "wg.json",
        &document(json!([{
            "id": "T-1",
            "title": "Touch",
            "definition_of_done": [{ "kind": "command", "cmd": "touch marker" }],
            "safe_to_execute": true,
        }])),
    );

    let (code, stdout) = wgplan(
        root.path(),
        &["sprint", &file, "--top", "1", "--cwd", cwd.path().to_str().unwrap()],
    )
    .await;

    assert_eq!(code, 0);
    assert!(marker(&stdout, "WORKGRAPH_SPRINT_RUN_ID").unwrap().starts_with("run-"));
    assert!(stdout.contains("Next: "));
    assert!(!cwd.path().join("marker").exists());
    assert!(root.path().join("tracks").join("tasks").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_execute_reports_failures() {
    let root = TempDir::new().unwrap();
    let cwd = TempDir::new().unwrap();
    let file = write_doc(
        root.path(),
        "wg.json",
        &document(json!([
            { "id": "T-1", "title": "Pass", "definition_of_done": [{ "kind": "command", "cmd": "true" }], "safe_to_execute": true },
            { "id": "T-2", "title": "Fail", "definition_of_done": [{ "kind": "command", "cmd": "echo 'error: boom' >&2; exit 1" }], "safe_to_execute": true },
        ])),
    );

    let (code, stdout) = wgplan(
        root.path(),
        &["run", &file, "--execute", "--cwd", cwd.path().to_str().unwrap()],
    )
    .await;
    assert_eq!(code, 1);
    let run_id = marker(&stdout, "WORKGRAPH_RUN_ID").unwrap().to_string();
    assert!(stdout.contains(&format!("wgplan postmortem {run_id}")));

    let (code, stdout) = wgplan(root.path(), &["postmortem", &run_id, "--execute"]).await;
    assert_eq!(code, 0);
    assert!(marker(&stdout, "WORKGRAPH_POSTMORTEM_SCAN_ID").unwrap().starts_with("scan-"));

    let (code, _) = wgplan(root.path(), &["run", &file, "--resume", &run_id]).await;
    assert_eq!(code, 2);
}

#[tokio::test]
async fn test_unknown_run_is_a_gate_failure() {
    let root = TempDir::new().unwrap();

    let (code, stdout) = wgplan(
        root.path(),
        &["--json", "postmortem", "run-20250101-deadbeef", "--execute"],
    )
    .await;

    assert_eq!(code, 2);
    assert!(stdout.contains("run-20250101-deadbeef"));
}
