pub mod config;
pub mod error;
pub mod handlers;
pub mod models;

pub use config::{WorkerAppConfig, WorkerConfig};
pub use error::{JudgeError, Result, WorkerError};
pub use handlers::JudgeHandler;
