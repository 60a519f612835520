use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a submission inside the judging pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ProcessingState {
    /// Waiting to be published to the job queue.
    #[default]
    Pending,
    /// Accepted by the job queue, not yet picked up by a worker.
    Enqueued,
    /// A worker reported that it started judging.
    Processing,
    /// Test runs and points are durably saved.
    Processed,
    /// Judging failed with a non-retryable error.
    Failed,
}

impl ProcessingState {
    /// Returns true if no further pipeline work is expected for this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }

    /// Returns true if the reconciliation sweep may pick a stale row in this state.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Pending | Self::Enqueued | Self::Processing)
    }

    pub const ALL: &'static [ProcessingState] = &[
        Self::Pending,
        Self::Enqueued,
        Self::Processing,
        Self::Processed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Enqueued => "Enqueued",
            Self::Processing => "Processing",
            Self::Processed => "Processed",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid state or result type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    invalid: String,
    valid: Vec<&'static str>,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid {} '{}'. Valid values: {}",
            self.kind,
            self.invalid,
            self.valid.join(", ")
        )
    }
}

impl std::error::Error for ParseEnumError {}

impl FromStr for ProcessingState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "processing state",
                invalid: s.to_string(),
                valid: Self::ALL.iter().map(|s| s.as_str()).collect(),
            })
    }
}

/// Outcome of a single test run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResultType {
    CorrectAnswer,
    WrongAnswer,
    TimeLimit,
    MemoryLimit,
    RunTimeError,
}

impl ResultType {
    pub const ALL: &'static [ResultType] = &[
        Self::CorrectAnswer,
        Self::WrongAnswer,
        Self::TimeLimit,
        Self::MemoryLimit,
        Self::RunTimeError,
    ];

    pub fn is_correct(&self) -> bool {
        matches!(self, Self::CorrectAnswer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CorrectAnswer => "CorrectAnswer",
            Self::WrongAnswer => "WrongAnswer",
            Self::TimeLimit => "TimeLimit",
            Self::MemoryLimit => "MemoryLimit",
            Self::RunTimeError => "RunTimeError",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEnumError {
                kind: "result type",
                invalid: s.to_string(),
                valid: Self::ALL.iter().map(|s| s.as_str()).collect(),
            })
    }
}
