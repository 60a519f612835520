pub mod config;
pub mod judge_job;
pub mod judge_result;
pub mod mq;
pub mod processing_state;
pub mod retry;

pub use processing_state::{ProcessingState, ResultType};
