use db::DbError;
use sandbox::SandboxError;
use thiserror::Error;

pub mod config;
pub mod engine;
pub mod outcome;
pub mod progress;
pub mod prompt;

pub use config::{EngineConfig, ExecutionLimits};
pub use engine::{ExecutionEngine, ExecutionRequest};
pub use progress::ProgressUpdate;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("execution not found")]
    NotFound,
    #[error("execution is not running")]
    NotRunning,
    #[error("workspace setup failed: {0}")]
    Setup(String),
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Driver(#[from] SandboxError),
}
