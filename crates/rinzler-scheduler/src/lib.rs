//! rinzler-scheduler — worker wrappers and least-busy load balancing.
//!
//! Owns the pool registry and routes every job to the active worker with
//! the shortest queue. Each `Worker` serializes dispatch to its execution
//! unit: one job in flight, FIFO queue behind it.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Registry (insertion-ordered worker_id → Worker)
//!   ├── pressure (jobs dispatched, not yet completed)
//!   ├── RollingSamples (recent job durations)
//!   └── Worker
//!       ├── VecDeque<Job> (head is the job in flight)
//!       ├── EventEmitter (durable + one-shot listeners)
//!       └── UnitHandle (execution unit)
//! ```

pub mod error;
pub mod events;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult, WorkerError, WorkerResult};
pub use events::{Completion, EventEmitter, JobOutcome, Topic, WorkerEvent};
pub use registry::Registry;
pub use scheduler::{LeastBusy, Scheduler};
pub use stats::{RollingSamples, median};
pub use worker::{Job, Worker};
