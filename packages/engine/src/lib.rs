pub mod config;
pub mod consumer;
pub mod error;
pub mod models;
pub mod processor;
pub mod publisher;
pub mod reconcile;
pub mod retest;
pub mod scoring;
pub mod store;
pub mod view;

pub use config::EngineAppConfig;
pub use error::{EngineError, Result};
pub use processor::{ReportOutcome, ResultProcessor};
pub use publisher::{BrokerJobQueue, JobQueue, Publisher};
pub use reconcile::{Reconciler, SweepReport};
pub use retest::Retester;
