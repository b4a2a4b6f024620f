use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::{
    HealthReport, OverallHealth, ProjectRef, ProjectSnapshot, ProjectStatus, RunResult,
    ScenarioName, StepPhase, StepStatus,
};
use crate::scenarios::Scenario;

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なコマンド/オプションは `projorch --help` を参照してください"
    );
}

pub fn print_run(result: &RunResult, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let mode = if result.mode.is_dry_run() {
        "dry-run"
    } else {
        "live"
    };
    let _ = writeln!(
        out,
        "シナリオ: {}（{mode}） run_id={}",
        result.scenario, result.run_id
    );
    let _ = writeln!(
        out,
        "結果: {}{}",
        paint(result.status.as_str(), status_color_run(result), cfg.color),
        if result.cancelled {
            "（途中で打ち切り）"
        } else {
            ""
        }
    );
    if result.projects.is_empty() {
        let _ = writeln!(out, "対象プロジェクトはありません。");
        return;
    }

    for (id, project) in result.projects.iter().take(cfg.max_table_rows.max(1)) {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "[{id}] {} {}",
            project.project.project_type,
            paint(
                project.status.as_str(),
                project_status_color(project.status),
                cfg.color
            )
        );
        for o in &project.outcomes {
            let phase = match o.phase {
                StepPhase::Forward => "",
                StepPhase::Rollback => "↩ ",
            };
            let _ = writeln!(
                out,
                "  {phase}{}  {}  {}",
                pad_end_ansi(&o.step, 22),
                pad_end_ansi(&format_step_status(o.status, cfg.color), 15),
                truncate_middle(&o.message, 100)
            );
            if cfg.verbose {
                if let Some(payload) = &o.payload {
                    let _ = writeln!(out, "      {payload}");
                }
            }
        }
    }
    if result.projects.len() > cfg.max_table_rows.max(1) {
        let _ = writeln!(
            out,
            "\n... ほか {} 件（--json で全件を出力できます）",
            result.projects.len() - cfg.max_table_rows.max(1)
        );
    }
}

pub fn print_health(report: &HealthReport, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let color = match report.overall_health {
        OverallHealth::Good => "32",
        OverallHealth::Fair => "33",
        OverallHealth::Poor => "31",
    };
    let s = &report.summary;
    let _ = writeln!(
        out,
        "総合評価: {}",
        paint(report.overall_health.as_str(), color, cfg.color)
    );
    let _ = writeln!(
        out,
        "プロジェクト: {}（到達不能 {}、問題あり {}、割合 {:.2}）",
        s.projects, s.unreachable, s.with_issues, s.issue_fraction
    );
    let _ = writeln!(out);

    let rows: Vec<Vec<String>> = report
        .projects
        .iter()
        .map(|(id, p)| {
            vec![
                id.clone(),
                p.project_type.to_string(),
                if p.reachable { "yes" } else { "no" }.to_string(),
                p.issue_count.to_string(),
                p.failed_steps.to_string(),
            ]
        })
        .collect();
    print_table(
        &mut out,
        &["id", "種別", "到達", "問題", "失敗"],
        &rows,
        cfg.max_table_rows,
    );

    if !report.recommendations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "推奨事項:");
        for rec in &report.recommendations {
            let _ = writeln!(out, "  - {rec}");
        }
    }
    if cfg.verbose && !report.issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "問題:");
        for issue in &report.issues {
            let _ = writeln!(
                out,
                "  - [{}] {} {}: {}",
                issue.severity,
                issue.project,
                issue.category.as_str(),
                issue.message
            );
        }
    }
}

pub fn print_inspect(snapshots: &[ProjectSnapshot], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let rows: Vec<Vec<String>> = snapshots
        .iter()
        .map(|s| {
            vec![
                s.project.id.clone(),
                s.project.project_type.to_string(),
                if s.reachable { "yes" } else { "no" }.to_string(),
                format!("{:?}", s.repository).to_ascii_lowercase(),
                s.file_count.to_string(),
                s.script_count.to_string(),
                s.issues.len().to_string(),
            ]
        })
        .collect();
    print_table(
        &mut out,
        &["id", "種別", "到達", "リポジトリ", "ファイル", "スクリプト", "問題"],
        &rows,
        cfg.max_table_rows,
    );
    if cfg.verbose {
        for s in snapshots {
            for issue in &s.issues {
                let _ = writeln!(
                    out,
                    "  - {} [{}] {}: {}",
                    s.project.id,
                    issue.severity,
                    issue.category.as_str(),
                    issue.message
                );
            }
        }
    }
}

pub fn print_projects(projects: &[ProjectRef], cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    let rows: Vec<Vec<String>> = projects
        .iter()
        .map(|p| {
            vec![
                p.id.clone(),
                p.project_type.to_string(),
                truncate_middle(&p.path.display().to_string(), 60),
                p.repo.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&mut out, &["id", "種別", "パス", "repo"], &rows, usize::MAX);
}

pub fn print_scenarios(cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    for name in ScenarioName::ALL {
        let scenario = Scenario::builtin(name);
        let types = scenario
            .applicable_types()
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "{}（{}）: {types}", name.slug(), name);
        for step in &scenario.steps {
            let _ = writeln!(
                out,
                "  - {} [{}]",
                step.name,
                step.capability.as_str()
            );
        }
    }
}

fn print_table(out: &mut dyn Write, headers: &[&str], rows: &[Vec<String>], max_rows: usize) {
    let mut widths: Vec<usize> = headers.iter().map(|h| visible_width_ansi(h)).collect();
    for row in rows.iter().take(max_rows) {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(visible_width_ansi(cell));
            }
        }
    }

    let header = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| pad_end_ansi(h, *w))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{}", header.trim_end());
    let rule = widths
        .iter()
        .map(|w| "-".repeat(*w))
        .collect::<Vec<_>>()
        .join("  ");
    let _ = writeln!(out, "{rule}");

    for row in rows.iter().take(max_rows) {
        let line = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| pad_end_ansi(c, *w))
            .collect::<Vec<_>>()
            .join("  ");
        let _ = writeln!(out, "{}", line.trim_end());
    }
    if rows.len() > max_rows {
        let _ = writeln!(out, "... ほか {} 件", rows.len() - max_rows);
    }
}

fn status_color_run(result: &RunResult) -> &'static str {
    match result.status {
        crate::core::RunStatus::Succeeded => "32",
        crate::core::RunStatus::RolledBack => "33",
        crate::core::RunStatus::PartiallyFailed => "33",
        crate::core::RunStatus::Failed => "31",
    }
}

fn project_status_color(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Succeeded => "32",
        ProjectStatus::Skipped => "90",
        ProjectStatus::Halted | ProjectStatus::RolledBack => "33",
        ProjectStatus::Failed => "31",
    }
}

fn format_step_status(status: StepStatus, color: bool) -> String {
    let (label, code) = match status {
        StepStatus::Succeeded => ("Succeeded", "32"),
        StepStatus::Skipped => ("Skipped", "90"),
        StepStatus::Failed => ("Failed", "31"),
        StepStatus::DryRunPreviewed => ("DryRunPreviewed", "36"),
    };
    paint(label, code, color)
}

fn paint(s: &str, code: &str, color: bool) -> String {
    if !color {
        return s.to_string();
    }
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn truncate_middle(s: &str, max_chars: usize) -> String {
    let len = s.chars().count();
    if len <= max_chars {
        return s.to_string();
    }

    let keep = max_chars.saturating_sub(3);
    let left = keep / 2;
    let right = keep.saturating_sub(left);

    let prefix: String = s.chars().take(left).collect();
    let suffix: String = s
        .chars()
        .rev()
        .take(right)
        .collect::<String>()
        .chars()
        .rev()
        .collect();

    format!("{prefix}...{suffix}")
}

fn pad_end_ansi(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
