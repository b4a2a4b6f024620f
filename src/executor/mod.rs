use std::collections::BTreeMap;
use std::time::Duration;

use crate::core::{
    Issue, IssueCategory, ProjectRun, ProjectSnapshot, ProjectStatus, RunMode, RunResult,
    SCHEMA_VERSION, Severity, StepOutcome, StepStatus,
};
use crate::remote::RemoteApi;
use crate::scenarios::{Capability, Scenario, ScenarioStep, StepContext};
use crate::workers::{self, CancelToken};

#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub run_id: String,
    pub timeout: Duration,
    pub workers: usize,
    /// Stop starting new projects once one ends `Failed` or `RolledBack`.
    pub fail_fast: bool,
}

pub fn new_run_id() -> String {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    format!("{nanos}-{}", std::process::id())
}

/// Runs `scenario` against every snapshot. Projects run in parallel up to
/// `opts.workers`; steps within one project run strictly in order. Snapshots
/// are consumed: each run needs a fresh inspection.
pub fn execute(
    scenario: &Scenario,
    snapshots: Vec<ProjectSnapshot>,
    mode: RunMode,
    opts: &ExecuteOptions,
    remote: &dyn RemoteApi,
    cancel: &CancelToken,
) -> RunResult {
    let started_at = crate::core::now_rfc3339();
    let _span = tracing::info_span!(
        "execute",
        scenario = %scenario.name,
        run_id = %opts.run_id,
        dry_run = mode.is_dry_run()
    )
    .entered();

    let targeted = snapshots.len();
    let any_applicable = snapshots
        .iter()
        .any(|s| scenario.applies(s.project.project_type));

    let ctx = StepContext {
        run_id: &opts.run_id,
        mode,
        timeout: opts.timeout,
        remote,
    };

    let runs = if any_applicable {
        workers::run_bounded(snapshots, opts.workers, cancel, |snapshot| {
            let run = run_project(scenario, snapshot, &ctx);
            if opts.fail_fast
                && matches!(run.status, ProjectStatus::Failed | ProjectStatus::RolledBack)
            {
                tracing::warn!(project = %run.project.id, "fail-fast: cancelling remaining projects");
                cancel.cancel();
            }
            run
        })
    } else {
        tracing::info!(targeted, "scenario applies to no targeted project");
        Vec::new()
    };

    let cancelled = any_applicable && runs.len() < targeted;
    let projects: BTreeMap<String, ProjectRun> = runs
        .into_iter()
        .map(|run| (run.project.id.clone(), run))
        .collect();
    let status = RunResult::derive_status(projects.values(), cancelled);

    RunResult {
        schema_version: SCHEMA_VERSION.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        run_id: opts.run_id.clone(),
        scenario: scenario.name,
        mode,
        started_at,
        finished_at: crate::core::now_rfc3339(),
        status,
        cancelled,
        projects,
    }
}

/// Executes one project's step sequence, including at most one rollback pass.
pub fn run_project(
    scenario: &Scenario,
    snapshot: ProjectSnapshot,
    ctx: &StepContext<'_>,
) -> ProjectRun {
    let project_id = snapshot.project.id.clone();
    let mut issues = snapshot.issues.clone();
    let mut outcomes: Vec<StepOutcome> = Vec::new();

    if !scenario.applies(snapshot.project.project_type) {
        outcomes.push(StepOutcome::forward(
            scenario.name.slug(),
            StepStatus::Skipped,
            format!(
                "{} は {} に適用されません",
                scenario.name, snapshot.project.project_type
            ),
        ));
        return finish(snapshot, issues, ProjectStatus::Skipped, outcomes);
    }

    let success = if ctx.is_dry_run() {
        StepStatus::DryRunPreviewed
    } else {
        StepStatus::Succeeded
    };
    let mut completed: Vec<&ScenarioStep> = Vec::new();
    let mut status = ProjectStatus::Succeeded;

    for (idx, step) in scenario.steps.iter().enumerate() {
        tracing::debug!(project = %project_id, step = %step.name, "running step");
        match step.action.run(&snapshot, ctx) {
            Ok(effect) => {
                outcomes.push(
                    StepOutcome::forward(&step.name, success, effect.message)
                        .with_payload(effect.payload),
                );
                issues.extend(effect.issues);
                if step.capability.is_mutating() {
                    completed.push(step);
                }
            }
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(project = %project_id, step = %step.name, error = %message, "step failed");
                outcomes.push(StepOutcome::forward(&step.name, StepStatus::Failed, &message));

                if step.capability.is_mutating() {
                    status = rollback(&snapshot, ctx, &completed, &mut outcomes, &mut issues);
                    let severity = if status == ProjectStatus::RolledBack {
                        Severity::Info
                    } else {
                        Severity::Warning
                    };
                    issues.push(Issue::new(
                        IssueCategory::StepFailed,
                        severity,
                        format!("{} が失敗しました: {message}", step.name),
                    ));
                } else {
                    status = ProjectStatus::Halted;
                    issues.push(Issue::new(
                        IssueCategory::StepFailed,
                        Severity::Warning,
                        format!("{} が失敗しました: {message}", step.name),
                    ));
                }

                for rest in &scenario.steps[idx + 1..] {
                    outcomes.push(StepOutcome::forward(
                        &rest.name,
                        StepStatus::Skipped,
                        format!("{} が失敗したためスキップしました", step.name),
                    ));
                }
                break;
            }
        }
    }

    tracing::info!(project = %project_id, status = status.as_str(), "project finished");
    finish(snapshot, issues, status, outcomes)
}

/// One pass over the already-succeeded mutating steps in reverse order. Inverse
/// failures are recorded and the pass continues with the next inverse.
fn rollback(
    snapshot: &ProjectSnapshot,
    ctx: &StepContext<'_>,
    completed: &[&ScenarioStep],
    outcomes: &mut Vec<StepOutcome>,
    issues: &mut Vec<Issue>,
) -> ProjectStatus {
    let mut failed = false;
    for step in completed.iter().rev() {
        let Capability::Mutate { inverse } = &step.capability else {
            continue;
        };
        if ctx.is_dry_run() {
            outcomes.push(StepOutcome::rollback(
                &step.name,
                StepStatus::DryRunPreviewed,
                "ロールバックで取り消します",
            ));
            continue;
        }
        match inverse.run(snapshot, ctx) {
            Ok(effect) => outcomes.push(
                StepOutcome::rollback(&step.name, StepStatus::Succeeded, effect.message)
                    .with_payload(effect.payload),
            ),
            Err(err) => {
                let message = format!("{err:#}");
                tracing::error!(
                    project = %snapshot.project.id,
                    step = %step.name,
                    error = %message,
                    "rollback failed; project may be left partially modified"
                );
                issues.push(Issue::new(
                    IssueCategory::RollbackFailed,
                    Severity::Error,
                    format!("{} の取り消しに失敗しました: {message}", step.name),
                ));
                outcomes.push(StepOutcome::rollback(&step.name, StepStatus::Failed, message));
                failed = true;
            }
        }
    }
    if failed {
        ProjectStatus::Failed
    } else {
        ProjectStatus::RolledBack
    }
}

fn finish(
    snapshot: ProjectSnapshot,
    mut issues: Vec<Issue>,
    status: ProjectStatus,
    outcomes: Vec<StepOutcome>,
) -> ProjectRun {
    issues.sort();
    ProjectRun {
        reachable: snapshot.reachable,
        project: snapshot.project,
        issues,
        status,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{Result, anyhow};

    use super::*;
    use crate::core::{ProjectRef, ProjectType, RepoState, RunStatus, ScenarioName, StepPhase};
    use crate::remote::OfflineRemote;
    use crate::scenarios::{StepAction, StepEffect};

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        log: Log,
        label: String,
        fail: bool,
    }

    impl StepAction for Recorder {
        fn run(&self, _snapshot: &ProjectSnapshot, ctx: &StepContext<'_>) -> Result<StepEffect> {
            if !ctx.is_dry_run() {
                self.log.lock().unwrap().push(self.label.clone());
            }
            if self.fail {
                return Err(anyhow!("{} failed", self.label));
            }
            Ok(StepEffect::new(self.label.clone()))
        }
    }

    fn rec(log: &Log, label: &str, fail: bool) -> Recorder {
        Recorder {
            log: Arc::clone(log),
            label: label.to_string(),
            fail,
        }
    }

    fn mutate(log: &Log, name: &str, fail: bool, inverse_fails: bool) -> ScenarioStep {
        ScenarioStep::mutate(
            name,
            rec(log, name, fail),
            rec(log, &format!("undo-{name}"), inverse_fails),
        )
    }

    fn any_type(_: ProjectType) -> bool {
        true
    }

    fn powershell_only(t: ProjectType) -> bool {
        matches!(t, ProjectType::PowerShellModule)
    }

    fn snapshot(id: &str, project_type: ProjectType) -> ProjectSnapshot {
        ProjectSnapshot {
            project: ProjectRef::new(id, project_type, format!("/nonexistent/projorch/{id}")),
            exists: true,
            reachable: true,
            repository: RepoState::Clean,
            file_count: 1,
            script_count: 0,
            last_modified: None,
            issues: vec![],
        }
    }

    fn opts() -> ExecuteOptions {
        ExecuteOptions {
            run_id: "test-run".to_string(),
            timeout: Duration::from_secs(5),
            workers: 2,
            fail_fast: false,
        }
    }

    fn run(scenario: &Scenario, snapshots: Vec<ProjectSnapshot>, mode: RunMode) -> RunResult {
        execute(scenario, snapshots, mode, &opts(), &OfflineRemote, &CancelToken::new())
    }

    #[test]
    fn rollback_runs_inverses_in_reverse_and_skips_the_failed_step() {
        let log: Log = Arc::default();
        let scenario = Scenario {
            name: ScenarioName::Release,
            applies_to: any_type,
            steps: vec![
                ScenarioStep::validate("v", rec(&log, "v", false)),
                mutate(&log, "m1", false, false),
                mutate(&log, "m2", false, false),
                mutate(&log, "m3", true, false),
                ScenarioStep::report("r", rec(&log, "r", false)),
            ],
        };

        let result = run(&scenario, vec![snapshot("A", ProjectType::JSProject)], RunMode::Live);
        assert_eq!(
            *log.lock().unwrap(),
            ["v", "m1", "m2", "m3", "undo-m2", "undo-m1"]
        );
        let a = &result.projects["A"];
        assert_eq!(a.status, ProjectStatus::RolledBack);
        assert_eq!(result.status, RunStatus::RolledBack);
        let rollback_steps: Vec<&str> = a
            .outcomes
            .iter()
            .filter(|o| o.phase == StepPhase::Rollback)
            .map(|o| o.step.as_str())
            .collect();
        assert_eq!(rollback_steps, ["m2", "m1"]);
        assert_eq!(a.outcomes.last().unwrap().step, "r");
        assert_eq!(a.outcomes.last().unwrap().status, StepStatus::Skipped);
    }

    #[test]
    fn failing_inverse_is_recorded_once_and_marks_project_failed() {
        let log: Log = Arc::default();
        let scenario = Scenario {
            name: ScenarioName::Cleanup,
            applies_to: any_type,
            steps: vec![
                mutate(&log, "m1", false, false),
                mutate(&log, "m2", false, true),
                mutate(&log, "m3", true, false),
            ],
        };
        let result = run(
            &scenario,
            vec![snapshot("A", ProjectType::PowerShellModule), snapshot("B", ProjectType::PowerShellModule)],
            RunMode::Live,
        );
        let a = &result.projects["A"];
        assert_eq!(a.status, ProjectStatus::Failed);
        assert!(a.issues.iter().any(|i| i.category == IssueCategory::RollbackFailed));
        assert_eq!(
            a.outcomes
                .iter()
                .filter(|o| o.phase == StepPhase::Rollback)
                .map(|o| (o.step.as_str(), o.status))
                .collect::<Vec<_>>(),
            [("m2", StepStatus::Failed), ("m1", StepStatus::Succeeded)]
        );
        assert_eq!(result.projects["B"].status, ProjectStatus::Failed);
        assert_eq!(result.status, RunStatus::Failed);
    }

    #[test]
    fn validation_failure_halts_without_rollback() {
        let log: Log = Arc::default();
        let scenario = Scenario {
            name: ScenarioName::DocSync,
            applies_to: any_type,
            steps: vec![
                mutate(&log, "m1", false, false),
                ScenarioStep::validate("v", rec(&log, "v", true)),
                mutate(&log, "m2", false, false),
            ],
        };
        let result = run(&scenario, vec![snapshot("A", ProjectType::JSProject)], RunMode::Live);
        assert_eq!(*log.lock().unwrap(), ["m1", "v"]);
        assert_eq!(result.projects["A"].status, ProjectStatus::Halted);
        assert_eq!(result.status, RunStatus::PartiallyFailed);
    }

    #[test]
    fn dry_run_visits_the_same_steps_as_live() {
        let log: Log = Arc::default();
        let scenario = Scenario {
            name: ScenarioName::Release,
            applies_to: powershell_only,
            steps: vec![
                ScenarioStep::validate("v", rec(&log, "v", false)),
                mutate(&log, "m1", false, false),
                mutate(&log, "m2", true, false),
            ],
        };
        let snaps = || {
            vec![
                snapshot("A", ProjectType::PowerShellModule),
                snapshot("B", ProjectType::PythonPackage),
            ]
        };
        let dry = run(&scenario, snaps(), RunMode::DryRun);
        assert!(log.lock().unwrap().is_empty());
        let live = run(&scenario, snaps(), RunMode::Live);

        let visited = |r: &RunResult| -> Vec<(String, String)> {
            r.projects
                .values()
                .flat_map(|p| {
                    p.outcomes
                        .iter()
                        .filter(|o| o.is_forward())
                        .map(|o| (p.project.id.clone(), o.step.clone()))
                })
                .collect()
        };
        assert_eq!(visited(&dry), visited(&live));
        assert_eq!(dry.projects["A"].outcomes[0].status, StepStatus::DryRunPreviewed);
        assert_eq!(dry.projects["B"].outcomes.len(), 1);
        assert_eq!(dry.projects["B"].outcomes[0].status, StepStatus::Skipped);
    }

    #[test]
    fn zero_applicable_projects_is_an_empty_success() {
        let scenario = Scenario {
            name: ScenarioName::Cleanup,
            applies_to: powershell_only,
            steps: vec![],
        };
        let result = run(&scenario, vec![snapshot("B", ProjectType::PythonPackage)], RunMode::Live);
        assert!(result.projects.is_empty());
        assert_eq!(result.status, RunStatus::Succeeded);
        assert!(!result.cancelled);
    }

    #[test]
    fn fail_fast_stops_enqueueing_after_a_rollback() {
        let log: Log = Arc::default();
        let scenario = Scenario {
            name: ScenarioName::ComplianceSync,
            applies_to: any_type,
            steps: vec![mutate(&log, "m", true, false)],
        };
        let snaps: Vec<ProjectSnapshot> = (0..5)
            .map(|i| snapshot(&format!("p{i}"), ProjectType::JSProject))
            .collect();
        let opts = ExecuteOptions {
            workers: 1,
            fail_fast: true,
            ..opts()
        };
        let result = execute(&scenario, snaps, RunMode::Live, &opts, &OfflineRemote, &CancelToken::new());
        assert_eq!(result.projects.len(), 1);
        assert!(result.cancelled);
        assert_eq!(result.status, RunStatus::PartiallyFailed);
    }

    #[test]
    fn one_project_failure_does_not_touch_another() {
        let log: Log = Arc::default();
        let failing = Scenario {
            name: ScenarioName::Release,
            applies_to: any_type,
            steps: vec![ScenarioStep::validate("v", rec(&log, "v", true))],
        };
        let mut bad = snapshot("A", ProjectType::JSProject);
        bad.reachable = false;
        let result = run(&failing, vec![bad, snapshot("B", ProjectType::JSProject)], RunMode::Live);
        assert!(!result.projects["A"].reachable);
        assert_eq!(result.projects["B"].outcomes.len(), 1);
        assert_eq!(result.projects.len(), 2);
    }
}
