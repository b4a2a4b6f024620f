use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

use projorch::aggregate::{ScoringOptions, aggregate};
use projorch::core::OverallHealth;
use serde_json::Value;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

fn make_temp_home() -> PathBuf {
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "projorch-health-{}-{}-{}",
        std::process::id(),
        nanos,
        seq
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn projorch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_projorch"));
    cmd.env("HOME", home)
        .env_remove("PROJORCH_CONFIG")
        .env_remove("PROJORCH_REGISTRY")
        .env_remove("PROJORCH_RUN_WORKERS")
        .env_remove("PROJORCH_SCORING_ISSUE_FRACTION_THRESHOLD")
        .env_remove("PROJORCH_SCORING_STALE_AFTER_DAYS")
        .env_remove("PROJORCH_INSPECT_EXCLUDE")
        .env_remove("PROJORCH_REPORT_PERSIST")
        .env_remove("PROJORCH_REPORT_DIR")
        .env_remove("PROJORCH_UI_COLOR")
        .env_remove("PROJORCH_UI_MAX_TABLE_ROWS")
        .env_remove("PROJORCH_LOG");
    cmd
}

fn run(home: &Path, args: &[&str]) -> Output {
    projorch_cmd(home).args(args).output().unwrap()
}

fn write_registry(home: &Path, entries: &[(&str, &str, &Path)]) -> PathBuf {
    let mut body = String::new();
    for (id, ty, path) in entries {
        body.push_str(&format!(
            "[[project]]\nid = \"{id}\"\ntype = \"{ty}\"\npath = '{}'\n\n",
            path.display()
        ));
    }
    let path = home.join("registry.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn health_json(home: &Path, registry: &Path) -> Value {
    let out = run(
        home,
        &[
            "--registry",
            registry.to_str().unwrap(),
            "--no-persist",
            "--json",
            "health",
        ],
    );
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

#[test]
fn empty_run_list_is_vacuously_good() {
    let report = aggregate(&[], &ScoringOptions::default());
    assert_eq!(report.overall_health, OverallHealth::Good);
    assert_eq!(report.summary.projects, 0);
    assert_eq!(report.summary.issue_fraction, 0.0);
    assert!(report.issues.is_empty());
    assert!(report.recommendations.is_empty());
}

#[test]
fn all_unreachable_projects_are_fair_not_poor() {
    let home = make_temp_home();
    let registry = write_registry(
        &home,
        &[
            ("gone-1", "PythonPackage", &home.join("missing-1")),
            ("gone-2", "JSProject", &home.join("missing-2")),
        ],
    );

    let v = health_json(&home, &registry);
    assert_eq!(v["overall_health"], "Fair");
    assert_eq!(v["summary"]["projects"], 2);
    assert_eq!(v["summary"]["unreachable"], 2);
    assert_eq!(v["summary"]["with_issues"], 0);
    assert_eq!(v["summary"]["failed_steps"], 0);
    assert_eq!(v["projects"]["gone-1"]["reachable"], false);
    assert_eq!(v["projects"]["gone-1"]["statuses"]["HealthCheck"], "Succeeded");
    let categories: Vec<&str> = v["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["category"].as_str().unwrap())
        .collect();
    assert_eq!(categories, ["unreachable", "unreachable"]);
    assert_eq!(v["recommendations"].as_array().unwrap().len(), 1);
}

#[test]
fn repeated_health_checks_differ_only_in_timestamp() {
    let home = make_temp_home();
    let a = home.join("a");
    std::fs::create_dir_all(&a).unwrap();
    std::fs::write(a.join("main.py"), "print('hi')\n").unwrap();
    let registry = write_registry(
        &home,
        &[
            ("a", "PythonPackage", &a),
            ("b", "CSharpProject", &home.join("missing")),
        ],
    );

    let mut first = health_json(&home, &registry);
    let mut second = health_json(&home, &registry);
    first["generated_at"] = Value::Null;
    second["generated_at"] = Value::Null;
    assert_eq!(first, second);
}

#[test]
fn health_markdown_lists_overall_health() {
    let home = make_temp_home();
    let registry = write_registry(&home, &[("x", "Unknown", &home.join("nowhere"))]);
    let out = run(
        &home,
        &[
            "--registry",
            registry.to_str().unwrap(),
            "--no-persist",
            "health",
            "--markdown",
        ],
    );
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Fair"), "stdout={stdout}");
}

#[test]
fn health_persists_run_and_report_files() {
    let home = make_temp_home();
    let registry = write_registry(&home, &[("x", "Unknown", &home.join("nowhere"))]);
    let out = run(
        &home,
        &["--registry", registry.to_str().unwrap(), "--json", "health"],
    );
    assert_eq!(out.status.code(), Some(0));
    let reports = home.join(".config/projorch/reports");
    let mut names: Vec<String> = std::fs::read_dir(&reports)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("health-")));
    assert!(names.iter().any(|n| n.starts_with("run-health-check-")));
}
