use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{IssueCategory, ProjectStatus, ProjectType, ScenarioName, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OverallHealth {
    Good,
    Fair,
    Poor,
}

impl OverallHealth {
    pub const fn as_str(self) -> &'static str {
        match self {
            OverallHealth::Good => "Good",
            OverallHealth::Fair => "Fair",
            OverallHealth::Poor => "Poor",
        }
    }

    /// Only ever moves toward `Poor`.
    pub fn demote_to(self, other: OverallHealth) -> OverallHealth {
        self.max(other)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub projects: usize,
    pub reachable: usize,
    pub unreachable: usize,
    pub with_issues: usize,
    pub issue_fraction: f64,
    pub failed_steps: usize,
    pub rolled_back: usize,
    pub failed_projects: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_type: ProjectType,
    pub reachable: bool,
    pub statuses: BTreeMap<ScenarioName, ProjectStatus>,
    pub issue_count: usize,
    pub failed_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueEntry {
    pub project: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub schema_version: String,
    pub tool_version: String,
    pub generated_at: String,
    pub overall_health: OverallHealth,
    pub summary: HealthSummary,
    pub projects: BTreeMap<String, ProjectSummary>,
    pub issues: Vec<IssueEntry>,
    pub recommendations: Vec<String>,
}
