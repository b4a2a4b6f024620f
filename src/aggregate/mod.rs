use std::collections::{BTreeMap, BTreeSet};

use crate::core::{
    HealthReport, HealthSummary, IssueCategory, IssueEntry, OverallHealth, ProjectStatus,
    ProjectSummary, RunResult, SCHEMA_VERSION,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringOptions {
    /// Fraction of projects with issues above which health is `Poor`. In [0, 1].
    pub issue_fraction_threshold: f64,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        Self {
            issue_fraction_threshold: 0.5,
        }
    }
}

pub fn aggregate(runs: &[RunResult], opts: &ScoringOptions) -> HealthReport {
    aggregate_at(runs, opts, crate::core::now_rfc3339())
}

/// Deterministic given `runs`, `opts` and `generated_at`. When several runs
/// report the same scenario for a project, the worst status is kept.
pub fn aggregate_at(runs: &[RunResult], opts: &ScoringOptions, generated_at: String) -> HealthReport {
    let mut projects: BTreeMap<String, ProjectSummary> = BTreeMap::new();
    let mut issues: BTreeSet<IssueEntry> = BTreeSet::new();

    for run in runs {
        for (id, pr) in &run.projects {
            let summary = projects.entry(id.clone()).or_insert_with(|| ProjectSummary {
                project_type: pr.project.project_type,
                reachable: true,
                statuses: BTreeMap::new(),
                issue_count: 0,
                failed_steps: 0,
            });
            summary.reachable &= pr.reachable;
            summary
                .statuses
                .entry(run.scenario)
                .and_modify(|s| *s = s.worst(pr.status))
                .or_insert(pr.status);
            summary.failed_steps += pr.unrecovered_failures();
            for issue in &pr.issues {
                issues.insert(IssueEntry {
                    project: id.clone(),
                    category: issue.category,
                    severity: issue.severity,
                    message: issue.message.clone(),
                });
            }
        }
    }

    let mut counted: BTreeSet<&str> = BTreeSet::new();
    for entry in &issues {
        if let Some(summary) = projects.get_mut(&entry.project) {
            summary.issue_count += 1;
        }
        if entry.severity.is_actionable() && entry.category != IssueCategory::Unreachable {
            counted.insert(entry.project.as_str());
        }
    }

    let total = projects.len();
    let reachable = projects.values().filter(|p| p.reachable).count();
    let with_issues = counted.len();
    let issue_fraction = if total == 0 {
        0.0
    } else {
        with_issues as f64 / total as f64
    };
    let failed_steps: usize = projects.values().map(|p| p.failed_steps).sum();
    let rolled_back = count_status(&projects, ProjectStatus::RolledBack);
    let failed_projects = count_status(&projects, ProjectStatus::Failed);

    let mut health = OverallHealth::Good;
    if failed_steps > 0 || reachable < total {
        health = health.demote_to(OverallHealth::Fair);
    }
    if failed_projects > 0 || issue_fraction > opts.issue_fraction_threshold {
        health = health.demote_to(OverallHealth::Poor);
    }

    let recommendations = recommendations(&issues);
    HealthReport {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at,
        overall_health: health,
        summary: HealthSummary {
            projects: total,
            reachable,
            unreachable: total - reachable,
            with_issues,
            issue_fraction,
            failed_steps,
            rolled_back,
            failed_projects,
        },
        projects,
        issues: issues.into_iter().collect(),
        recommendations,
    }
}

fn count_status(projects: &BTreeMap<String, ProjectSummary>, status: ProjectStatus) -> usize {
    projects
        .values()
        .filter(|p| p.statuses.values().any(|s| *s == status))
        .count()
}

/// One line per category present, in category order.
fn recommendations(issues: &BTreeSet<IssueEntry>) -> Vec<String> {
    let mut by_category: BTreeMap<IssueCategory, BTreeSet<&str>> = BTreeMap::new();
    for entry in issues {
        by_category
            .entry(entry.category)
            .or_default()
            .insert(entry.project.as_str());
    }
    by_category
        .into_iter()
        .map(|(category, projects)| recommendation(category, projects.len()))
        .collect()
}

fn recommendation(category: IssueCategory, n: usize) -> String {
    match category {
        IssueCategory::Unreachable => {
            format!("{n} 件のプロジェクトに到達できません。registry のパスを確認してください")
        }
        IssueCategory::AccessDenied => {
            format!("{n} 件のプロジェクトで読み取り権限が不足しています")
        }
        IssueCategory::NotARepository => {
            format!("{n} 件のプロジェクトがリポジトリ管理されていません")
        }
        IssueCategory::RepositoryProbeFailed => {
            format!("{n} 件のプロジェクトでリポジトリ状態を取得できませんでした（git の有無を確認してください）")
        }
        IssueCategory::UncommittedChanges => {
            format!("{n} 件のプロジェクトに未コミットの変更があります")
        }
        IssueCategory::StaleActivity => {
            format!("{n} 件のプロジェクトが長期間更新されていません")
        }
        IssueCategory::InspectionTruncated => {
            format!("{n} 件のプロジェクトで走査が時間制限により打ち切られました（--timeout を延ばしてください）")
        }
        IssueCategory::SecurityPattern => {
            format!("{n} 件のプロジェクトで危険な呼び出しパターンが見つかりました。該当箇所を確認してください")
        }
        IssueCategory::LowMaintainability => {
            format!("{n} 件のプロジェクトで関数が長すぎます。分割を検討してください")
        }
        IssueCategory::MissingAutomation => {
            format!("{n} 件のプロジェクトに CI ワークフローがありません")
        }
        IssueCategory::StepFailed => {
            format!("{n} 件のプロジェクトでステップが失敗しました。実行結果を確認してください")
        }
        IssueCategory::RollbackFailed => {
            format!("{n} 件のプロジェクトでロールバックに失敗しました。手動での確認が必要です")
        }
    }
}
