//! Scheduler error types.

use thiserror::Error;

use rinzler_core::WorkerId;
use rinzler_runtime::UnitError;

/// Errors raised by a single worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} is not taking new jobs")]
    NotAccepting(WorkerId),

    #[error("worker {worker} failed: {message}")]
    Fatal { worker: WorkerId, message: String },

    #[error("execution unit error: {0}")]
    Unit(#[from] UnitError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while routing a job.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no active worker available")]
    NoWorkerAvailable,

    #[error("job failed: {message}")]
    JobFailed { message: String },

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
