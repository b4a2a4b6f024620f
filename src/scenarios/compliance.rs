use anyhow::Result;
use serde_json::json;

use super::{Scenario, ScenarioStep, StepContext, StepEffect, apply_journaled, require_reachable};
use crate::core::{ProjectSnapshot, ProjectType, ScenarioName};

const REQUIRED_FILES: [&str; 3] = ["README.md", "LICENSE", ".gitignore"];

pub(super) fn scenario() -> Scenario {
    Scenario {
        name: ScenarioName::ComplianceSync,
        applies_to,
        steps: vec![
            ScenarioStep::validate("check-required-files", check_required_files),
            ScenarioStep::journaled("create-missing-files", create_missing_files),
            ScenarioStep::report("report-compliance", report_compliance),
        ],
    }
}

fn applies_to(project_type: ProjectType) -> bool {
    match project_type {
        ProjectType::PowerShellModule
        | ProjectType::PythonPackage
        | ProjectType::CSharpProject
        | ProjectType::JSProject => true,
        ProjectType::Unknown => false,
    }
}

fn missing_files(snapshot: &ProjectSnapshot) -> Vec<&'static str> {
    REQUIRED_FILES
        .into_iter()
        .filter(|f| !snapshot.project.path.join(f).exists())
        .collect()
}

fn check_required_files(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    require_reachable(snapshot)?;
    let missing = missing_files(snapshot);
    let message = if missing.is_empty() {
        "必須ファイルはすべて揃っています".to_string()
    } else {
        format!("不足している必須ファイル: {}", missing.join(", "))
    };
    Ok(StepEffect::new(message).with_payload(json!({ "missing": missing })))
}

fn create_missing_files(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    let missing = missing_files(snapshot);
    let payload = json!({ "files": missing });
    if missing.is_empty() {
        return Ok(StepEffect::new("作成するファイルはありません").with_payload(payload));
    }
    if ctx.is_dry_run() {
        return Ok(StepEffect::new(format!(
            "{} 件のファイルを作成します: {}",
            missing.len(),
            missing.join(", ")
        ))
        .with_payload(payload));
    }

    apply_journaled(snapshot, ctx, "create-missing-files", |journal| {
        for name in &missing {
            let body = placeholder(name, snapshot);
            journal.create_file(&snapshot.project.path.join(name), &body)?;
        }
        Ok(())
    })?;
    Ok(StepEffect::new(format!(
        "{} 件のファイルを作成しました: {}",
        missing.len(),
        missing.join(", ")
    ))
    .with_payload(payload))
}

fn report_compliance(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    let missing = missing_files(snapshot);
    let present = REQUIRED_FILES.len() - missing.len();
    Ok(StepEffect::new(format!(
        "必須ファイル {present}/{} 件",
        REQUIRED_FILES.len()
    ))
    .with_payload(json!({
        "required": REQUIRED_FILES,
        "present": present,
        "missing": missing,
    })))
}

fn placeholder(name: &str, snapshot: &ProjectSnapshot) -> String {
    match name {
        "README.md" => format!("# {}\n", snapshot.project.id),
        "LICENSE" => "All rights reserved.\n".to_string(),
        ".gitignore" => gitignore_for(snapshot.project.project_type).join("\n") + "\n",
        _ => String::new(),
    }
}

fn gitignore_for(project_type: ProjectType) -> Vec<&'static str> {
    let extra: &[&str] = match project_type {
        ProjectType::PowerShellModule => &["TestResults/", "*.log"],
        ProjectType::PythonPackage => &["__pycache__/", "*.pyc", ".venv/", "dist/"],
        ProjectType::CSharpProject => &["bin/", "obj/", "TestResults/"],
        ProjectType::JSProject => &["node_modules/", "dist/"],
        ProjectType::Unknown => &[],
    };
    let mut lines = vec![".projorch/"];
    lines.extend_from_slice(extra);
    lines
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::testing::{snapshot, temp_root, write};
    use super::*;
    use crate::core::{RepoState, RunMode};
    use crate::remote::OfflineRemote;
    use crate::scenarios::{JournalInverse, StepAction};

    fn ctx(mode: RunMode) -> StepContext<'static> {
        StepContext {
            run_id: "c1",
            mode,
            timeout: Duration::from_secs(5),
            remote: &OfflineRemote,
        }
    }

    #[test]
    fn creates_only_missing_files_and_inverse_removes_them() {
        let root = temp_root("compliance");
        write(&root.join("README.md"), "# keep\n");
        let snap = snapshot(&root, ProjectType::PythonPackage, RepoState::Clean);

        let preview = create_missing_files(&snap, &ctx(RunMode::DryRun)).unwrap();
        assert_eq!(preview.payload.unwrap()["files"], json!(["LICENSE", ".gitignore"]));
        assert!(!root.join("LICENSE").exists());

        create_missing_files(&snap, &ctx(RunMode::Live)).unwrap();
        assert!(root.join("LICENSE").exists());
        assert!(
            std::fs::read_to_string(root.join(".gitignore"))
                .unwrap()
                .contains("__pycache__/")
        );

        let inverse = JournalInverse {
            step: "create-missing-files",
        };
        inverse.run(&snap, &ctx(RunMode::Live)).unwrap();
        assert!(!root.join("LICENSE").exists());
        assert!(!root.join(".gitignore").exists());
        assert_eq!(std::fs::read_to_string(root.join("README.md")).unwrap(), "# keep\n");

        let _ = std::fs::remove_dir_all(&root);
    }
}
