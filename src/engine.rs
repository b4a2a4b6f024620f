use std::time::Duration;

use anyhow::Result;

use crate::aggregate::{self, ScoringOptions};
use crate::core::{HealthReport, ProjectSnapshot, RunMode, RunResult, ScenarioName};
use crate::executor::{self, ExecuteOptions};
use crate::inspect::{GitCliProbe, InspectOptions, Inspector, RepoProbe};
use crate::registry::{Registry, Selection};
use crate::remote::{GhCliRemote, OfflineRemote, RemoteApi};
use crate::scenarios::Scenario;
use crate::workers::CancelToken;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub timeout: Duration,
    pub workers: usize,
    pub exclude: Vec<String>,
    pub stale_after_days: u64,
    pub scoring: ScoringOptions,
    pub show_progress: bool,
}

/// Wires inspection, execution and aggregation for one invocation. Holds no
/// registry or mode of its own; both are passed to every entry point.
pub struct Engine {
    opts: EngineOptions,
    probe: Box<dyn RepoProbe>,
    remote: Box<dyn RemoteApi>,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub scenario: ScenarioName,
    pub selection: Selection,
    pub mode: RunMode,
    pub fail_fast: bool,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        let remote: Box<dyn RemoteApi> = if crate::platform::find_executable("gh").is_some() {
            Box::new(GhCliRemote::new(opts.timeout))
        } else {
            tracing::debug!("gh not found on PATH; remote calls will fail");
            Box::new(OfflineRemote)
        };
        Self::with_collaborators(opts, Box::new(GitCliProbe), remote)
    }

    pub fn with_collaborators(
        opts: EngineOptions,
        probe: Box<dyn RepoProbe>,
        remote: Box<dyn RemoteApi>,
    ) -> Self {
        Self {
            opts,
            probe,
            remote,
        }
    }

    pub fn inspect(
        &self,
        registry: &Registry,
        selection: &Selection,
        cancel: &CancelToken,
    ) -> Result<Vec<ProjectSnapshot>> {
        let targets = registry
            .select(selection)
            .map_err(crate::exit::invalid_args_err)?;
        let inspector = Inspector::new(
            InspectOptions {
                timeout: self.opts.timeout,
                exclude: self.opts.exclude.clone(),
                stale_after_days: self.opts.stale_after_days,
            },
            self.probe.as_ref(),
        )?;
        let pb = self.spinner(format!("{} 件のプロジェクトを検査中...", targets.len()));
        let snapshots = inspector.inspect_all(&targets, self.opts.workers, cancel);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(snapshots)
    }

    /// Inspects the selected projects afresh and runs the scenario over them.
    pub fn run(&self, registry: &Registry, req: &RunRequest, cancel: &CancelToken) -> Result<RunResult> {
        let scenario = Scenario::builtin(req.scenario);
        let snapshots = self.inspect(registry, &req.selection, cancel)?;

        let opts = ExecuteOptions {
            run_id: executor::new_run_id(),
            timeout: self.opts.timeout,
            workers: self.opts.workers,
            fail_fast: req.fail_fast,
        };
        tracing::info!(
            scenario = %req.scenario,
            run_id = %opts.run_id,
            projects = snapshots.len(),
            "starting run"
        );
        let pb = self.spinner(format!("{} を実行中...", req.scenario));
        let result = executor::execute(
            &scenario,
            snapshots,
            req.mode,
            &opts,
            self.remote.as_ref(),
            cancel,
        );
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        Ok(result)
    }

    /// Runs HealthCheck and aggregates it into a report.
    pub fn health(
        &self,
        registry: &Registry,
        selection: &Selection,
        mode: RunMode,
    ) -> Result<(RunResult, HealthReport)> {
        let run = self.run(
            registry,
            &RunRequest {
                scenario: ScenarioName::HealthCheck,
                selection: selection.clone(),
                mode,
                fail_fast: false,
            },
            &CancelToken::new(),
        )?;
        let report = aggregate::aggregate(std::slice::from_ref(&run), &self.opts.scoring);
        Ok((run, report))
    }

    fn spinner(&self, message: String) -> Option<indicatif::ProgressBar> {
        use std::io::IsTerminal;
        if !(self.opts.show_progress && std::io::stderr().is_terminal()) {
            return None;
        }
        let pb = indicatif::ProgressBar::new_spinner();
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(120));
        Some(pb)
    }
}
