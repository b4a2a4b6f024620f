use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{Issue, ProjectRef, ScenarioName, StepOutcome, StepStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    DryRun,
    Live,
}

impl RunMode {
    pub const fn is_dry_run(self) -> bool {
        matches!(self, RunMode::DryRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    PartiallyFailed,
    RolledBack,
    Failed,
}

impl RunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "Succeeded",
            RunStatus::PartiallyFailed => "PartiallyFailed",
            RunStatus::RolledBack => "RolledBack",
            RunStatus::Failed => "Failed",
        }
    }
}

/// Final state of one project within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    Succeeded,
    /// The scenario does not apply to this project type.
    Skipped,
    /// A non-mutating step failed; later steps were skipped, nothing rolled back.
    Halted,
    /// A mutating step failed and every registered inverse succeeded.
    RolledBack,
    /// An inverse failed during rollback; the project may be left half-mutated.
    Failed,
}

impl ProjectStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Succeeded => "Succeeded",
            ProjectStatus::Skipped => "Skipped",
            ProjectStatus::Halted => "Halted",
            ProjectStatus::RolledBack => "RolledBack",
            ProjectStatus::Failed => "Failed",
        }
    }

    /// The more alarming of two statuses for the same project and scenario.
    pub fn worst(self, other: ProjectStatus) -> ProjectStatus {
        if other.rank() > self.rank() { other } else { self }
    }

    const fn rank(self) -> u8 {
        match self {
            ProjectStatus::Skipped => 0,
            ProjectStatus::Succeeded => 1,
            ProjectStatus::RolledBack => 2,
            ProjectStatus::Halted => 3,
            ProjectStatus::Failed => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRun {
    pub project: ProjectRef,
    pub reachable: bool,
    pub issues: Vec<Issue>,
    pub status: ProjectStatus,
    pub outcomes: Vec<StepOutcome>,
}

impl ProjectRun {
    /// Forward-phase failures that were not undone by a successful rollback.
    pub fn unrecovered_failures(&self) -> usize {
        if self.status == ProjectStatus::RolledBack {
            return 0;
        }
        self.outcomes
            .iter()
            .filter(|o| o.is_forward() && o.status == StepStatus::Failed)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub schema_version: String,
    pub tool_version: String,
    pub run_id: String,
    pub scenario: ScenarioName,
    pub mode: RunMode,
    pub started_at: String,
    pub finished_at: String,
    pub status: RunStatus,
    pub cancelled: bool,
    pub projects: BTreeMap<String, ProjectRun>,
}

impl RunResult {
    /// Folds project states into the run status: any `Failed` project fails the
    /// run; halts or cancellation make it partial; otherwise a rollback marks it
    /// `RolledBack`.
    pub fn derive_status<'a>(
        projects: impl IntoIterator<Item = &'a ProjectRun>,
        cancelled: bool,
    ) -> RunStatus {
        let mut halted = false;
        let mut rolled_back = false;
        for p in projects {
            match p.status {
                ProjectStatus::Failed => return RunStatus::Failed,
                ProjectStatus::Halted => halted = true,
                ProjectStatus::RolledBack => rolled_back = true,
                ProjectStatus::Succeeded | ProjectStatus::Skipped => {}
            }
        }
        if halted || cancelled {
            RunStatus::PartiallyFailed
        } else if rolled_back {
            RunStatus::RolledBack
        } else {
            RunStatus::Succeeded
        }
    }
}
