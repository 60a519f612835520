use common::ProcessingState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    #[error("Cannot build judge job: {0}")]
    InvalidJob(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Processing row for submission {0} was modified concurrently")]
    Conflict(i32),

    #[error(transparent)]
    Queue(#[from] mq::MqError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: i32) -> Self {
        Self::NotFound { entity, id }
    }

    /// The submission can never be judged as stored; retrying will not help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidJob(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Rejected state machine edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Submission {submission_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub submission_id: i32,
    pub from: ProcessingState,
    pub to: ProcessingState,
}
