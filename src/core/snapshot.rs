use serde::{Deserialize, Serialize};

use crate::core::{ProjectRef, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoState {
    Clean,
    Dirty,
    /// Not a repository, or its status could not be determined.
    Unknown,
}

impl RepoState {
    pub const fn is_clean(self) -> Option<bool> {
        match self {
            RepoState::Clean => Some(true),
            RepoState::Dirty => Some(false),
            RepoState::Unknown => None,
        }
    }
}

/// Declaration order is the order recommendations are emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Unreachable,
    AccessDenied,
    NotARepository,
    RepositoryProbeFailed,
    UncommittedChanges,
    StaleActivity,
    InspectionTruncated,
    SecurityPattern,
    LowMaintainability,
    MissingAutomation,
    StepFailed,
    RollbackFailed,
}

impl IssueCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            IssueCategory::Unreachable => "unreachable",
            IssueCategory::AccessDenied => "access_denied",
            IssueCategory::NotARepository => "not_a_repository",
            IssueCategory::RepositoryProbeFailed => "repository_probe_failed",
            IssueCategory::UncommittedChanges => "uncommitted_changes",
            IssueCategory::StaleActivity => "stale_activity",
            IssueCategory::InspectionTruncated => "inspection_truncated",
            IssueCategory::SecurityPattern => "security_pattern",
            IssueCategory::LowMaintainability => "low_maintainability",
            IssueCategory::MissingAutomation => "missing_automation",
            IssueCategory::StepFailed => "step_failed",
            IssueCategory::RollbackFailed => "rollback_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn new(category: IssueCategory, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
        }
    }
}

/// Point-in-time view of one project. Deliberately not `Clone`: a snapshot is
/// consumed by the run that created it and never fed into a second run.
#[derive(Debug, PartialEq, Serialize)]
pub struct ProjectSnapshot {
    pub project: ProjectRef,
    pub exists: bool,
    pub reachable: bool,
    pub repository: RepoState,
    pub file_count: u64,
    pub script_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub issues: Vec<Issue>,
}

impl ProjectSnapshot {
    pub fn has_issue(&self, category: IssueCategory) -> bool {
        self.issues.iter().any(|i| i.category == category)
    }
}
