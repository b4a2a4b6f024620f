use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::json;
use walkdir::WalkDir;

use super::{
    Scenario, ScenarioStep, StepContext, StepEffect, apply_journaled, display_rel, require_reachable,
};
use crate::core::{ProjectSnapshot, ProjectType, ScenarioName};
use crate::inspect;
use crate::journal::{self, Journal};

const ARTIFACT_EXTENSIONS: [&str; 3] = ["tmp", "bak", "log"];
const ARTIFACT_DIRS: [&str; 1] = ["TestResults"];
const QUARANTINE_STEP: &str = "quarantine-artifacts";

pub(super) fn scenario() -> Scenario {
    Scenario {
        name: ScenarioName::Cleanup,
        applies_to,
        steps: vec![
            ScenarioStep::validate("check-root", check_root),
            ScenarioStep::journaled(QUARANTINE_STEP, quarantine_artifacts),
            ScenarioStep::report("report-cleanup", report_cleanup),
        ],
    }
}

fn applies_to(project_type: ProjectType) -> bool {
    match project_type {
        ProjectType::PowerShellModule => true,
        ProjectType::PythonPackage
        | ProjectType::CSharpProject
        | ProjectType::JSProject
        | ProjectType::Unknown => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Artifact {
    path: PathBuf,
    rel: String,
    bytes: u64,
}

fn check_root(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    require_reachable(snapshot)?;
    let root = &snapshot.project.path;
    if root.parent().is_none() {
        return Err(anyhow!(
            "ファイルシステムのルートは掃除対象にできません: {}",
            root.display()
        ));
    }
    Ok(StepEffect::new(format!("対象ルート: {}", root.display())))
}

fn quarantine_artifacts(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let root = &snapshot.project.path;
    let artifacts = find_artifacts(root, ctx)?;
    let total_bytes: u64 = artifacts.iter().map(|a| a.bytes).sum();
    let payload = json!({
        "count": artifacts.len(),
        "total_bytes": total_bytes,
        "items": artifacts
            .iter()
            .map(|a| json!({ "path": a.rel, "bytes": a.bytes }))
            .collect::<Vec<_>>(),
    });

    if artifacts.is_empty() {
        return Ok(StepEffect::new("隔離対象はありません").with_payload(payload));
    }
    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!(
            "{} 件（{total_bytes} bytes）を隔離します",
            artifacts.len()
        ))
        .with_payload(payload));
    }

    let dest_root = journal::quarantine_dir(root, ctx.run_id);
    apply_journaled(snapshot, ctx, QUARANTINE_STEP, |journal| {
        for artifact in &artifacts {
            journal.move_path(&artifact.path, &dest_root.join(&artifact.rel))?;
        }
        Ok(())
    })?;
    Ok(StepEffect::new(format!(
        "{} 件（{total_bytes} bytes）を隔離しました: {}",
        artifacts.len(),
        display_rel(root, &dest_root)
    ))
    .with_payload(payload))
}

fn report_cleanup(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let root = &snapshot.project.path;
    if ctx.is_dry_run() {
        let pending = find_artifacts(root, ctx)?.len();
        return Ok(StepEffect::new(format!("隔離予定 {pending} 件"))
            .with_payload(json!({ "pending": pending, "quarantined": 0 })));
    }
    let quarantined = Journal::open(root, ctx.run_id, QUARANTINE_STEP)?
        .entries()
        .len();
    let remaining = find_artifacts(root, ctx)?.len();
    Ok(StepEffect::new(format!(
        "隔離済み {quarantined} 件、残り {remaining} 件"
    ))
    .with_payload(json!({ "pending": remaining, "quarantined": quarantined })))
}

/// Build artifacts under `root`, in walk order. `TestResults/` directories are
/// returned whole. Fails once the step's time limit passes.
fn find_artifacts(root: &Path, ctx: &StepContext<'_>) -> Result<Vec<Artifact>> {
    let exclude = inspect::build_exclude_set(&[])?;
    let deadline = ctx.deadline();
    let mut out = Vec::new();
    let mut it = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = it.next() {
        if past(deadline) {
            return Err(ctx.timed_out());
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let is_dir = entry.file_type().is_dir();
        if exclude.is_match(rel) {
            if is_dir {
                it.skip_current_dir();
            }
            continue;
        }
        if is_dir {
            if ARTIFACT_DIRS.iter().any(|d| entry.file_name() == *d) {
                out.push(Artifact {
                    path: entry.path().to_path_buf(),
                    rel: display_rel(root, entry.path()),
                    bytes: dir_size(entry.path(), deadline).ok_or_else(|| ctx.timed_out())?,
                });
                it.skip_current_dir();
            }
            continue;
        }
        let is_artifact = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| ARTIFACT_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if entry.file_type().is_file() && is_artifact {
            out.push(Artifact {
                path: entry.path().to_path_buf(),
                rel: display_rel(root, entry.path()),
                bytes: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
    }
    Ok(out)
}

/// `None` when the deadline passes mid-walk.
fn dir_size(path: &Path, deadline: Option<Instant>) -> Option<u64> {
    let mut total: u64 = 0;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if past(deadline) {
            return None;
        }
        if entry.file_type().is_file() {
            total = total.saturating_add(entry.metadata().map(|m| m.len()).unwrap_or(0));
        }
    }
    Some(total)
}

fn past(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}
