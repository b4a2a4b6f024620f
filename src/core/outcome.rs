use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Succeeded,
    Skipped,
    Failed,
    DryRunPreviewed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepPhase {
    Forward,
    Rollback,
}

/// One entry of a project's append-only outcome log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: String,
    pub phase: StepPhase,
    pub status: StepStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl StepOutcome {
    pub fn forward(step: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            phase: StepPhase::Forward,
            status,
            message: message.into(),
            payload: None,
        }
    }

    pub fn rollback(step: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            phase: StepPhase::Rollback,
            ..Self::forward(step, status, message)
        }
    }

    pub fn with_payload(mut self, payload: Option<serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_forward(&self) -> bool {
        self.phase == StepPhase::Forward
    }
}
