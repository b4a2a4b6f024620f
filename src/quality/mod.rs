use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;

use crate::core::{Issue, IssueCategory, ProjectType, Severity};
use crate::inspect;

/// Average lines per function at or below which complexity scores 100.
const TARGET_LINES_PER_FUNCTION: f64 = 16.18;
/// Complexity score below which a project is flagged.
const COMPLEXITY_PASS_SCORE: f64 = 70.0;
/// Larger files are counted but not read.
const MAX_SCAN_BYTES: u64 = 1024 * 1024;
const AUTOMATION_KEYWORDS: [&str; 7] = [
    "automation",
    "invoke",
    "setup",
    "validate",
    "build",
    "deploy",
    "release",
];
const CI_FILES: [&str; 2] = [".gitlab-ci.yml", "azure-pipelines.yml"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityFinding {
    pub file: String,
    pub patterns: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Complexity {
    pub files: u64,
    pub lines: u64,
    pub functions: u64,
    pub lines_per_function: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Automation {
    pub ci: Vec<String>,
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityGrade {
    Excellent,
    VeryGood,
    Good,
    Acceptable,
    NeedsImprovement,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            QualityGrade::Excellent
        } else if score >= 80.0 {
            QualityGrade::VeryGood
        } else if score >= 70.0 {
            QualityGrade::Good
        } else if score >= 60.0 {
            QualityGrade::Acceptable
        } else {
            QualityGrade::NeedsImprovement
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub security: Vec<SecurityFinding>,
    pub complexity: Complexity,
    pub automation: Automation,
    pub score: f64,
    pub grade: QualityGrade,
    /// The walk hit its deadline; every figure covers only the files seen.
    pub truncated: bool,
}

impl QualityReport {
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .security
            .iter()
            .map(|f| {
                Issue::new(
                    IssueCategory::SecurityPattern,
                    Severity::Warning,
                    format!("{}: 危険な呼び出し {}", f.file, f.patterns.join(", ")),
                )
            })
            .collect();
        if self.complexity.score < COMPLEXITY_PASS_SCORE {
            issues.push(Issue::new(
                IssueCategory::LowMaintainability,
                Severity::Info,
                format!(
                    "関数あたり平均 {:.1} 行です（スコア {:.0}）",
                    self.complexity.lines_per_function, self.complexity.score
                ),
            ));
        }
        if self.automation.ci.is_empty() {
            issues.push(Issue::new(
                IssueCategory::MissingAutomation,
                Severity::Info,
                "CI ワークフローがありません",
            ));
        }
        if self.truncated {
            issues.push(Issue::new(
                IssueCategory::InspectionTruncated,
                Severity::Warning,
                "品質スキャンが時間制限により打ち切られました",
            ));
        }
        issues
    }
}

/// Risky calls per language. PowerShell patterns match case-insensitively.
fn security_patterns(project_type: ProjectType) -> &'static [&'static str] {
    match project_type {
        ProjectType::PythonPackage => &[
            "subprocess.run",
            "eval(",
            "exec(",
            "os.system",
            "shell=True",
            "input(",
            "__import__",
        ],
        ProjectType::PowerShellModule => &[
            "invoke-expression",
            "iex ",
            "-encodedcommand",
            "downloadstring(",
            "-asplaintext",
        ],
        ProjectType::CSharpProject => &["Process.Start(", "Assembly.Load", "BinaryFormatter"],
        ProjectType::JSProject => &["eval(", "new Function(", "child_process", "innerHTML ="],
        ProjectType::Unknown => &[],
    }
}

fn is_function_start(project_type: ProjectType, line: &str) -> bool {
    let line = line.trim_start();
    match project_type {
        ProjectType::PythonPackage => line.starts_with("def ") || line.starts_with("async def "),
        ProjectType::PowerShellModule => {
            let lower = line.to_ascii_lowercase();
            lower.starts_with("function ") || lower.starts_with("filter ")
        }
        ProjectType::CSharpProject => {
            ["public ", "private ", "protected ", "internal "]
                .iter()
                .any(|m| line.starts_with(m))
                && line.contains('(')
                && !line.contains(" class ")
        }
        ProjectType::JSProject => line.contains("function ") || line.contains("=> {"),
        ProjectType::Unknown => false,
    }
}

/// Read-only pass over the project's scripts: security patterns, function
/// density and automation inventory. Stops at `deadline` and marks the result
/// truncated.
pub fn scan(root: &Path, project_type: ProjectType, deadline: Option<Instant>) -> Result<QualityReport> {
    let exclude = inspect::build_exclude_set(&[
        "**/node_modules/**".to_string(),
        "**/.venv/**".to_string(),
    ])?;
    let extensions = project_type.script_extensions();
    let patterns = security_patterns(project_type);
    let case_insensitive = project_type == ProjectType::PowerShellModule;

    let mut security = Vec::new();
    let mut complexity = Complexity::default();
    let mut automation = Automation::default();

    let stats = inspect::walk_files(root, &exclude, deadline, |entry| {
        let rel = crate::scenarios::display_rel(root, entry.path());
        let is_workflow = rel.starts_with(".github/workflows/")
            && (rel.ends_with(".yml") || rel.ends_with(".yaml"));
        if is_workflow || CI_FILES.contains(&rel.as_str()) {
            automation.ci.push(rel.clone());
        }

        let is_script = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if !is_script {
            return;
        }
        let name = entry.file_name().to_string_lossy().to_ascii_lowercase();
        if AUTOMATION_KEYWORDS.iter().any(|k| name.contains(k)) {
            automation.scripts.push(rel.clone());
        }

        complexity.files += 1;
        // No language to judge against.
        if project_type == ProjectType::Unknown {
            return;
        }
        if entry.metadata().map(|m| m.len()).unwrap_or(0) > MAX_SCAN_BYTES {
            return;
        }
        let Ok(body) = std::fs::read_to_string(entry.path()) else {
            tracing::debug!(path = %entry.path().display(), "skipping unreadable script");
            return;
        };
        for line in body.lines() {
            complexity.lines += 1;
            if is_function_start(project_type, line) {
                complexity.functions += 1;
            }
        }

        let haystack = if case_insensitive {
            body.to_ascii_lowercase()
        } else {
            body
        };
        let hits: Vec<&'static str> = patterns
            .iter()
            .copied()
            .filter(|p| haystack.contains(p))
            .collect();
        if !hits.is_empty() {
            security.push(SecurityFinding {
                file: rel,
                patterns: hits,
            });
        }
    });

    complexity.lines_per_function = if complexity.lines == 0 {
        0.0
    } else {
        complexity.lines as f64 / complexity.functions.max(1) as f64
    };
    complexity.score =
        (TARGET_LINES_PER_FUNCTION / complexity.lines_per_function.max(1.0) * 100.0).min(100.0);

    let security_score = if security.is_empty() { 100.0 } else { 50.0 };
    let score = (security_score + complexity.score) / 2.0;

    Ok(QualityReport {
        security,
        complexity,
        automation,
        score,
        grade: QualityGrade::from_score(score),
        truncated: stats.truncated,
    })
}
