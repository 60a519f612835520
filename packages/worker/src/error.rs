use thiserror::Error;

use crate::models::archive::ArchiveError;
use crate::models::checker::CheckerError;
use crate::models::executor::ProcessError;
use crate::models::sandbox::error::SandboxError;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("MQ error: {0}")]
    Mq(String),

    #[error("Toolchain error: {0}")]
    Toolchain(#[from] JudgeError),
}

impl From<mq::error::MqError> for WorkerError {
    fn from(e: mq::error::MqError) -> Self {
        WorkerError::Mq(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;

/// Failure to produce a judged outcome for a job.
///
/// Compile failures and per-test faults are not errors; they are part of the
/// execution result.
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Unknown toolchain '{0}'")]
    UnknownToolchain(String),

    #[error("Toolchain '{toolchain}' is misconfigured: {reason}")]
    InvalidToolchain { toolchain: String, reason: String },

    #[error("Required tool '{tool}' not found: {reason}")]
    MissingTool { tool: String, reason: String },

    #[error("No container sandbox is configured")]
    ContainerUnavailable,

    #[error("Invalid execution context: {0}")]
    InvalidContext(String),

    #[error(transparent)]
    Checker(#[from] CheckerError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

impl JudgeError {
    /// Machine-readable code carried in the failure payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownToolchain(_) => "UNKNOWN_TOOLCHAIN",
            Self::InvalidToolchain { .. } => "INVALID_TOOLCHAIN",
            Self::MissingTool { .. } => "MISSING_TOOL",
            Self::ContainerUnavailable => "CONTAINER_UNAVAILABLE",
            Self::InvalidContext(_) => "INVALID_CONTEXT",
            Self::Checker(_) => "CHECKER_ERROR",
            Self::Workspace(_) => "WORKSPACE_ERROR",
            Self::Archive(_) => "ARCHIVE_ERROR",
            Self::Process(_) => "PROCESS_ERROR",
            Self::Sandbox(_) => "SANDBOX_ERROR",
        }
    }

    /// Infrastructure faults may succeed on another attempt; configuration
    /// faults will fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Workspace(_) | Self::Process(_) | Self::Sandbox(_)
        )
    }
}
