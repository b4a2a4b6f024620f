mod health;
mod outcome;
mod project;
mod run;
mod scenario;
mod severity;
mod snapshot;

pub use health::{HealthReport, HealthSummary, IssueEntry, OverallHealth, ProjectSummary};
pub use outcome::{StepOutcome, StepPhase, StepStatus};
pub use project::{ProjectRef, ProjectType};
pub use run::{ProjectRun, ProjectStatus, RunMode, RunResult, RunStatus};
pub use scenario::ScenarioName;
pub use severity::Severity;
pub use snapshot::{Issue, IssueCategory, ProjectSnapshot, RepoState};

pub const SCHEMA_VERSION: &str = "1.0";

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
