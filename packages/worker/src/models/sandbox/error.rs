use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Sandbox initialization failed: {0}")]
    Initialization(String),

    #[error("Sandbox execution error: {0}")]
    Execution(String),

    #[error("docker {command} did not finish within {limit_ms} ms")]
    Timeout { command: String, limit_ms: u64 },

    #[error("Sandbox not ready after {0} ms")]
    NotReady(u64),

    #[error("Invalid harness report: {0}")]
    Report(String),
}
