use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use time::OffsetDateTime;

use crate::core::{HealthReport, RunResult};

/// A finished document handed to a sink. Both variants are immutable values.
#[derive(Debug, Clone, Copy)]
pub enum Persistable<'a> {
    Run(&'a RunResult),
    Health(&'a HealthReport),
}

impl Persistable<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Persistable::Run(_) => "run",
            Persistable::Health(_) => "health",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Persistable::Run(run) => run.scenario.slug(),
            Persistable::Health(_) => "report",
        }
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        let buf = match self {
            Persistable::Run(run) => serde_json::to_vec_pretty(run)?,
            Persistable::Health(report) => serde_json::to_vec_pretty(report)?,
        };
        Ok(buf)
    }
}

pub trait ReportSink {
    /// Stores the document durably and returns where it went.
    fn persist(&self, doc: &Persistable<'_>) -> Result<PathBuf>;
}

/// Writes each document to its own pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ReportSink for JsonFileSink {
    fn persist(&self, doc: &Persistable<'_>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("レポートディレクトリの作成に失敗しました: {}", self.dir.display())
        })?;

        let pid = std::process::id();
        let ts = OffsetDateTime::now_utc().unix_timestamp_nanos();
        let file_name = format!("{}-{}-{pid}-{ts}.json", doc.kind(), doc.label());
        let path = self.dir.join(file_name);

        let mut buf = doc.to_json_pretty()?;
        buf.push(b'\n');
        std::fs::write(&path, buf)
            .with_context(|| format!("レポートの書き込みに失敗しました: {}", path.display()))?;
        tracing::debug!(path = %path.display(), kind = doc.kind(), "report persisted");
        Ok(path)
    }
}

pub fn format_health_markdown(report: &HealthReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# projorch ヘルスレポート");
    let _ = writeln!(out);
    let _ = writeln!(out, "- 総合評価: **{}**", report.overall_health.as_str());
    let _ = writeln!(out, "- ツールバージョン: {}", report.tool_version);
    let _ = writeln!(out, "- 生成日時: {}", report.generated_at);
    let s = &report.summary;
    let _ = writeln!(
        out,
        "- プロジェクト: {}（到達可能 {}、到達不能 {}）",
        s.projects, s.reachable, s.unreachable
    );
    let _ = writeln!(
        out,
        "- 問題のあるプロジェクト: {}（割合 {:.2}）",
        s.with_issues, s.issue_fraction
    );
    let _ = writeln!(
        out,
        "- 失敗ステップ: {} / ロールバック: {} / 失敗プロジェクト: {}",
        s.failed_steps, s.rolled_back, s.failed_projects
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "## プロジェクト ({})", report.projects.len());
    let _ = writeln!(out);
    if report.projects.is_empty() {
        let _ = writeln!(out, "_対象プロジェクトはありません。_");
    } else {
        let _ = writeln!(out, "| id | 種別 | 到達 | 状態 | 問題 | 失敗ステップ |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for (id, p) in &report.projects {
            let statuses = p
                .statuses
                .iter()
                .map(|(scenario, status)| format!("{scenario}={}", status.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "| `{id}` | {} | {} | {statuses} | {} | {} |",
                p.project_type,
                if p.reachable { "yes" } else { "no" },
                p.issue_count,
                p.failed_steps
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## 問題 ({})", report.issues.len());
    let _ = writeln!(out);
    if report.issues.is_empty() {
        let _ = writeln!(out, "_問題はありません。_");
    }
    for issue in &report.issues {
        let _ = writeln!(
            out,
            "- [{}] `{}` {}: {}",
            issue.severity,
            issue.project,
            issue.category.as_str(),
            issue.message
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "## 推奨事項 ({})", report.recommendations.len());
    let _ = writeln!(out);
    if report.recommendations.is_empty() {
        let _ = writeln!(out, "_推奨事項はありません。_");
    }
    for rec in &report.recommendations {
        let _ = writeln!(out, "- {rec}");
    }

    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::aggregate::{ScoringOptions, aggregate_at};

    fn temp_dir() -> PathBuf {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "projorch-sink-test-{}-{seq}",
            std::process::id()
        ))
    }

    #[test]
    fn json_sink_writes_a_parseable_document() {
        let dir = temp_dir();
        let report = aggregate_at(&[], &ScoringOptions::default(), "t".to_string());
        let path = JsonFileSink::new(&dir)
            .persist(&Persistable::Health(&report))
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("health-report-"), "name={name}");

        let v: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["schema_version"], "1.0");
        assert_eq!(v["overall_health"], "Good");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn markdown_has_all_sections() {
        let report = aggregate_at(&[], &ScoringOptions::default(), "t".to_string());
        let md = format_health_markdown(&report);
        assert!(md.contains("総合評価: **Good**"));
        assert!(md.contains("## プロジェクト (0)"));
        assert!(md.contains("## 問題 (0)"));
        assert!(md.contains("## 推奨事項 (0)"));
    }
}
