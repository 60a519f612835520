use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Failed to publish {message_type} to '{queue}': {reason}")]
    Publish {
        queue: String,
        message_type: &'static str,
        reason: String,
    },

    #[error("{0}")]
    Internal(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Internal(e.to_string())
    }
}
