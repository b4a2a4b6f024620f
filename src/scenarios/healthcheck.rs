use anyhow::Result;
use serde_json::json;

use super::{Scenario, ScenarioStep, StepContext, StepEffect};
use crate::core::{ProjectSnapshot, ProjectType, RepoState, ScenarioName};
use crate::quality;

/// Read-only. Every step reports what it sees and never fails on environmental
/// conditions; the findings reach the health report through snapshot issues.
pub(super) fn scenario() -> Scenario {
    Scenario {
        name: ScenarioName::HealthCheck,
        applies_to,
        steps: vec![
            ScenarioStep::validate("check-reachable", check_reachable),
            ScenarioStep::validate("check-repository", check_repository),
            ScenarioStep::validate("scan-quality", scan_quality),
            ScenarioStep::report("report-inventory", report_inventory),
        ],
    }
}

fn applies_to(project_type: ProjectType) -> bool {
    match project_type {
        ProjectType::PowerShellModule
        | ProjectType::PythonPackage
        | ProjectType::CSharpProject
        | ProjectType::JSProject
        | ProjectType::Unknown => true,
    }
}

fn check_reachable(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    let message = if snapshot.reachable {
        "到達可能です"
    } else if snapshot.exists {
        "存在しますが読み取れません"
    } else {
        "ルートパスが存在しません"
    };
    Ok(StepEffect::new(message).with_payload(json!({
        "exists": snapshot.exists,
        "reachable": snapshot.reachable,
    })))
}

fn check_repository(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    let message = match snapshot.repository {
        RepoState::Clean => "作業ツリーはクリーンです",
        RepoState::Dirty => "未コミットの変更があります",
        RepoState::Unknown => "リポジトリの状態は不明です",
    };
    Ok(StepEffect::new(message).with_payload(json!({ "repository": snapshot.repository })))
}

/// Security patterns, function density and CI presence. A scan cut short by
/// the time limit is reported as an issue, not a failure.
fn scan_quality(snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
    if !snapshot.reachable {
        return Ok(StepEffect::new("到達できないため品質スキャンを省略しました"));
    }
    let report = quality::scan(
        &snapshot.project.path,
        snapshot.project.project_type,
        ctx.deadline(),
    )?;
    let message = format!(
        "品質スコア {:.0}（{:?}）、危険な呼び出し {} 件",
        report.score,
        report.grade,
        report.security.len()
    );
    Ok(StepEffect::new(message)
        .with_payload(serde_json::to_value(&report)?)
        .with_issues(report.issues()))
}

fn report_inventory(snapshot: &ProjectSnapshot, _ctx: &StepContext<'_>) -> Result<StepEffect> {
    Ok(StepEffect::new(format!(
        "ファイル {} 件（スクリプト {} 件）、問題 {} 件",
        snapshot.file_count,
        snapshot.script_count,
        snapshot.issues.len()
    ))
    .with_payload(json!({
        "file_count": snapshot.file_count,
        "script_count": snapshot.script_count,
        "last_modified": snapshot.last_modified,
        "issues": snapshot.issues.len(),
    })))
}
