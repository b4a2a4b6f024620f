use std::fmt;

use crate::core::RunStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    InvalidArgs,
    RunFailed,
    RunPartiallyFailed,
    PersistFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::InvalidArgs => 2,
            ExitCode::RunFailed => 10,
            ExitCode::RunPartiallyFailed => 11,
            ExitCode::PersistFailed => 20,
        }
    }

    /// A rollback that completed cleanly is an expected outcome, not a failure.
    pub const fn for_run_status(status: RunStatus) -> ExitCode {
        match status {
            RunStatus::Succeeded | RunStatus::RolledBack => ExitCode::Success,
            RunStatus::PartiallyFailed => ExitCode::RunPartiallyFailed,
            RunStatus::Failed => ExitCode::RunFailed,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.err.as_ref())
    }
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(exit) = err.downcast_ref::<ExitError>() {
        return exit.code.as_i32();
    }
    ExitCode::RunFailed.as_i32()
}

pub fn invalid_args(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, anyhow::anyhow!(message.into())).into()
}

pub fn invalid_args_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::InvalidArgs, err).into()
}

pub fn persist_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::PersistFailed, err).into()
}

pub fn run_status(status: RunStatus, message: impl Into<String>) -> anyhow::Error {
    ExitError::new(
        ExitCode::for_run_status(status),
        anyhow::anyhow!(message.into()),
    )
    .into()
}
