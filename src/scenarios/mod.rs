use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::core::{Issue, ProjectSnapshot, ProjectType, RunMode, ScenarioName};
use crate::journal::{self, Journal};
use crate::remote::RemoteApi;

mod cleanup;
mod compliance;
mod docsync;
mod healthcheck;
mod release;

/// Everything a step may need besides the snapshot. Built once per run.
pub struct StepContext<'a> {
    pub run_id: &'a str,
    pub mode: RunMode,
    pub timeout: Duration,
    pub remote: &'a dyn RemoteApi,
}

impl StepContext<'_> {
    pub fn is_dry_run(&self) -> bool {
        self.mode.is_dry_run()
    }

    /// Deadline for a filesystem pass that starts now.
    pub fn deadline(&self) -> Option<Instant> {
        Instant::now().checked_add(self.timeout)
    }

    pub fn timed_out(&self) -> anyhow::Error {
        anyhow!("時間制限（{:?}）内に走査が終わりませんでした", self.timeout)
    }

    pub fn journal(&self, snapshot: &ProjectSnapshot, step: &str) -> Result<Journal> {
        Journal::open(&snapshot.project.path, self.run_id, step)
    }
}

/// What a step did (or, in dry-run, would do).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepEffect {
    pub message: String,
    pub payload: Option<Value>,
    /// Findings added to the project's issues.
    pub issues: Vec<Issue>,
}

impl StepEffect {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            payload: None,
            issues: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }
}

/// A step body. Must not mutate anything when `ctx.is_dry_run()`; must report
/// the exact effect it would have instead.
pub trait StepAction: Send + Sync {
    fn run(&self, snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect>;
}

impl<F> StepAction for F
where
    F: Fn(&ProjectSnapshot, &StepContext<'_>) -> Result<StepEffect> + Send + Sync,
{
    fn run(&self, snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
        self(snapshot, ctx)
    }
}

pub enum Capability {
    Validate,
    Report,
    /// The inverse must be idempotent and safe after a partial forward run.
    Mutate { inverse: Box<dyn StepAction> },
}

impl Capability {
    pub fn is_mutating(&self) -> bool {
        matches!(self, Capability::Mutate { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Validate => "validate",
            Capability::Report => "report",
            Capability::Mutate { .. } => "mutate",
        }
    }
}

pub struct ScenarioStep {
    pub name: String,
    pub capability: Capability,
    pub action: Box<dyn StepAction>,
}

impl ScenarioStep {
    pub fn validate(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            capability: Capability::Validate,
            action: Box::new(action),
        }
    }

    pub fn report(name: impl Into<String>, action: impl StepAction + 'static) -> Self {
        Self {
            name: name.into(),
            capability: Capability::Report,
            action: Box::new(action),
        }
    }

    pub fn mutate(
        name: impl Into<String>,
        action: impl StepAction + 'static,
        inverse: impl StepAction + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            capability: Capability::Mutate {
                inverse: Box::new(inverse),
            },
            action: Box::new(action),
        }
    }

    /// A mutating step whose effects all go through the journal of `name`.
    pub fn journaled(name: &'static str, action: impl StepAction + 'static) -> Self {
        Self::mutate(name, action, JournalInverse { step: name })
    }
}

pub struct Scenario {
    pub name: ScenarioName,
    pub applies_to: fn(ProjectType) -> bool,
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn builtin(name: ScenarioName) -> Scenario {
        match name {
            ScenarioName::Release => release::scenario(),
            ScenarioName::ComplianceSync => compliance::scenario(),
            ScenarioName::Cleanup => cleanup::scenario(),
            ScenarioName::DocSync => docsync::scenario(),
            ScenarioName::HealthCheck => healthcheck::scenario(),
        }
    }

    pub fn applies(&self, project_type: ProjectType) -> bool {
        (self.applies_to)(project_type)
    }

    pub fn applicable_types(&self) -> Vec<ProjectType> {
        ProjectType::ALL
            .into_iter()
            .filter(|t| self.applies(*t))
            .collect()
    }
}

/// Replays the journal of one step in reverse.
pub struct JournalInverse {
    pub step: &'static str,
}

impl StepAction for JournalInverse {
    fn run(&self, snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
        let summary = journal::replay(&snapshot.project.path, ctx.run_id, self.step, ctx.remote)?;
        Ok(StepEffect::new(format!(
            "{} 件の変更を取り消しました（未実施 {} 件）",
            summary.undone, summary.absent
        ))
        .with_payload(serde_json::json!({
            "undone": summary.undone,
            "absent": summary.absent,
        })))
    }
}

/// Runs `apply` against the step's journal. On error, whatever `apply` already
/// did is undone before the error is returned, so a failed step leaves nothing
/// behind for the executor to roll back.
pub(crate) fn apply_journaled<T>(
    snapshot: &ProjectSnapshot,
    ctx: &StepContext<'_>,
    step: &str,
    apply: impl FnOnce(&mut Journal) -> Result<T>,
) -> Result<T> {
    let mut journal = ctx.journal(snapshot, step)?;
    match apply(&mut journal) {
        Ok(value) => Ok(value),
        Err(err) => {
            drop(journal);
            if let Err(undo_err) =
                journal::replay(&snapshot.project.path, ctx.run_id, step, ctx.remote)
            {
                tracing::error!(
                    project = %snapshot.project.id,
                    step,
                    error = %format!("{undo_err:#}"),
                    "failed to undo partial step"
                );
                return Err(err.context(format!("途中までの変更も取り消せませんでした: {undo_err:#}")));
            }
            Err(err)
        }
    }
}

pub(crate) fn require_reachable(snapshot: &ProjectSnapshot) -> Result<()> {
    if snapshot.reachable {
        return Ok(());
    }
    Err(anyhow!(
        "プロジェクトのルートに到達できません: {}",
        snapshot.project.path.display()
    ))
}

/// Relative, `/`-separated form of `path` for messages and payloads.
pub(crate) fn display_rel(root: &std::path::Path, path: &std::path::Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
