use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScenarioName {
    Release,
    ComplianceSync,
    Cleanup,
    DocSync,
    HealthCheck,
}

impl ScenarioName {
    pub const ALL: [ScenarioName; 5] = [
        ScenarioName::Release,
        ScenarioName::ComplianceSync,
        ScenarioName::Cleanup,
        ScenarioName::DocSync,
        ScenarioName::HealthCheck,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ScenarioName::Release => "Release",
            ScenarioName::ComplianceSync => "ComplianceSync",
            ScenarioName::Cleanup => "Cleanup",
            ScenarioName::DocSync => "DocSync",
            ScenarioName::HealthCheck => "HealthCheck",
        }
    }

    /// CLI spelling, also used in file names.
    pub const fn slug(self) -> &'static str {
        match self {
            ScenarioName::Release => "release",
            ScenarioName::ComplianceSync => "compliance-sync",
            ScenarioName::Cleanup => "cleanup",
            ScenarioName::DocSync => "doc-sync",
            ScenarioName::HealthCheck => "health-check",
        }
    }
}

impl fmt::Display for ScenarioName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "release" => Ok(ScenarioName::Release),
            "compliancesync" | "compliance" => Ok(ScenarioName::ComplianceSync),
            "cleanup" => Ok(ScenarioName::Cleanup),
            "docsync" | "docs" => Ok(ScenarioName::DocSync),
            "healthcheck" | "health" => Ok(ScenarioName::HealthCheck),
            _ => Err(format!(
                "未知のシナリオです: {s}（release|compliance-sync|cleanup|doc-sync|health-check を指定してください）"
            )),
        }
    }
}
