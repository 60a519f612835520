pub mod docker;
pub mod error;

pub use docker::{DockerSandbox, SandboxHandle, run_sandbox_reaper};
pub use error::SandboxError;
