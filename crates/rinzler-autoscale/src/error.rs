//! Engine error types.

use thiserror::Error;

use rinzler_scheduler::{SchedulerError, WorkerError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is already started, shut it down first")]
    AlreadyStarted,

    #[error("engine is not configured, call configure_and_start first")]
    NotConfigured,

    #[error("cannot heat up by {requested}: target {target} would exceed max {max}")]
    Overheat {
        target: isize,
        requested: usize,
        max: usize,
    },

    #[error("cannot cool down by {requested}: {live} live workers would drop below min {min}")]
    Underheat {
        live: usize,
        requested: usize,
        min: usize,
    },

    #[error("cannot cool down by {requested}: only {live} live workers")]
    SubZero { live: usize, requested: usize },

    #[error("engine has been shut down")]
    ShutDown,

    #[error("a targeted cool-down removes exactly one worker, got {0}")]
    InvalidCoolDown(usize),

    #[error("max capacity {max} is below min capacity {min}")]
    InvalidCapacity { max: usize, min: usize },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl EngineError {
    /// Guard violations of the temperature bounds.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            EngineError::Overheat { .. } | EngineError::Underheat { .. } | EngineError::SubZero { .. }
        )
    }

    /// Message reported by the work routine, if this is a job failure.
    pub fn job_failure(&self) -> Option<&str> {
        match self {
            EngineError::Scheduler(SchedulerError::JobFailed { message }) => Some(message),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
