//! CLI integration tests for the mnemo command-line interface.
//!
//! Every test runs the binary against a throwaway data and config directory,
//! so nothing touches the user's real store.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the mnemo binary, isolated in `dir`.
fn mnemo(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mnemo").unwrap();
    cmd.current_dir(dir.path())
        .env("MNEMO_CONFIG_DIR", dir.path().join("config"))
        .env("MNEMO_DATA_DIR", dir.path().join("data"))
        .env_remove("MNEMO_DB")
        .env_remove("MNEMO_CONFIG")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

/// Run with `--json` and parse stdout.
fn json(dir: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = mnemo(dir).arg("--json").args(args).output().unwrap();
    assert!(
        output.status.success(),
        "mnemo {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

fn id_of(value: &serde_json::Value) -> String {
    value["id"].as_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("store"))
        .stdout(predicate::str::contains("recall"))
        .stdout(predicate::str::contains("associations"))
        .stdout(predicate::str::contains("reflect"))
        .stdout(predicate::str::contains("search-turns"))
        .stdout(predicate::str::contains("capture"))
        .stdout(predicate::str::contains("consolidate"))
        .stdout(predicate::str::contains("organize"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mnemo"));
}

#[test]
fn test_missing_subcommand_fails() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir).assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_store_then_find_by_association() {
    let dir = TempDir::new().unwrap();

    let stored = json(
        &dir,
        &["store", "Learned X", "--importance", "5", "--topic", "python"],
    );
    let id = id_of(&stored);
    assert!(id.starts_with("mem_"));

    json(&dir, &["importance", &id, "9", "--reason", "reviewed"]);

    let found = json(
        &dir,
        &["associations", "--topic", "python", "--min-importance", "8"],
    );
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(id_of(&found[0]), id);
}

#[test]
fn test_store_rejects_out_of_range_importance() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .args(["store", "too much", "--importance", "11"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("importance"));
}

#[test]
fn test_associations_without_dimension_fails() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .args(["associations", "--min-importance", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("at least one of"));
}

#[test]
fn test_recall_rejects_unknown_period() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .args(["recall", "someday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid time period"));
}

#[test]
fn test_recall_today_human_output() {
    let dir = TempDir::new().unwrap();
    mnemo(&dir)
        .args(["store", "Morning standup notes", "--topic", "work"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stored"));

    mnemo(&dir)
        .args(["recall", "today"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Morning standup notes"));
}

#[test]
fn test_explicit_db_flag() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("custom.db");
    let db = db.to_str().unwrap();

    mnemo(&dir)
        .args(["--db", db, "store", "kept elsewhere"])
        .assert()
        .success();
    assert!(dir.path().join("custom.db").exists());

    let stats = json(&dir, &["--db", db, "stats"]);
    assert_eq!(stats["memory_count"], 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Learning Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_capture_expand_reinforce_flow() {
    let dir = TempDir::new().unwrap();

    let capture = json(&dir, &["capture", "note", "--tag", "x"]);
    let capture_id = id_of(&capture);

    let progress = json(&dir, &["progress", "today"]);
    assert!(!progress["pending_expansion"].as_array().unwrap().is_empty());

    let learning = json(
        &dir,
        &["expand", &capture_id, "A fuller note", "--importance", "6"],
    );
    let learning_id = id_of(&learning);

    mnemo(&dir)
        .args(["expand", &capture_id, "again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already been expanded"));

    let reinforced = json(&dir, &["reinforce", &learning_id, "--context", "used it"]);
    assert_eq!(reinforced["reinforcement_count"], 1);
    assert_eq!(reinforced["importance"], 7);
}

#[test]
fn test_learning_path_levels() {
    let dir = TempDir::new().unwrap();

    let path = json(&dir, &["path", "Rust async", "--level", "advanced"]);
    assert_eq!(path["level"], "advanced");
    assert_eq!(path["saved"], false);

    mnemo(&dir)
        .args(["path", "Rust async", "--level", "wizard"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("current_level"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Conversation Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_turns_history_and_summary() {
    let dir = TempDir::new().unwrap();

    json(
        &dir,
        &[
            "turn",
            "How do lifetimes work?",
            "They bound how long references live.",
            "--session",
            "s1",
            "--topic",
            "rust",
            "--importance",
            "8",
        ],
    );
    json(
        &dir,
        &["turn", "Thanks!", "Any time.", "--session", "s1"],
    );

    let history = json(&dir, &["history", "--session", "s1"]);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["user_message"], "How do lifetimes work?");

    let summary = json(&dir, &["summarize", "s1", "--save"]);
    assert_eq!(summary["turn_count"], 2);
    assert!(summary["id"].as_str().unwrap().starts_with("sum_"));

    let hits = json(&dir, &["search-turns", "lifetimes"]);
    assert!(!hits.as_array().unwrap().is_empty());

    mnemo(&dir)
        .args(["summarize", "nobody"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Consolidation Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_consolidate_identical_memories() {
    let dir = TempDir::new().unwrap();

    for _ in 0..2 {
        json(&dir, &["store", "Same fact twice", "--topic", "dup"]);
    }

    let report = json(&dir, &["consolidate", "dup", "--threshold", "0.5"]);
    assert_eq!(report["merged"].as_array().unwrap().len(), 1);

    let remaining = json(&dir, &["associations", "--topic", "dup"]);
    assert_eq!(remaining.as_array().unwrap().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_and_show() {
    let dir = TempDir::new().unwrap();

    mnemo(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    assert!(dir.path().join("mnemo.toml").exists());

    mnemo(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mnemo.toml"))
        .stdout(predicate::str::contains("mock"));

    let before = std::fs::read_to_string(dir.path().join("mnemo.toml")).unwrap();
    mnemo(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
    let after = std::fs::read_to_string(dir.path().join("mnemo.toml")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("absent.toml");

    mnemo(&dir)
        .args(["--config", config.to_str().unwrap(), "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn test_broken_project_config_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("mnemo.toml"), "[recall
").unwrap();

    mnemo(&dir)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("mnemo.toml"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[recall]\nmin_relevance = 2.0\n").unwrap();

    mnemo(&dir)
        .args(["--config", config.to_str().unwrap(), "stats"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("min_relevance"));
}
