//! Execution unit error types.

use thiserror::Error;

/// Errors raised by the execution-unit primitive itself.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("failed to spawn execution unit: {0}")]
    SpawnFailed(String),

    #[error("execution unit is no longer reachable")]
    Disconnected,
}

pub type UnitResult<T> = Result<T, UnitError>;
