pub mod archive;
pub mod checker;
pub mod executor;
pub mod sandbox;
pub mod strategy;
pub mod workspace;
