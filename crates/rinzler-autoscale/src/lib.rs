//! rinzler-autoscale — a worker pool that sizes itself.
//!
//! The `Engine` owns a `Scheduler` and moves the pool's "temperature"
//! (worker count) between a floor and a ceiling:
//!
//! # Scaling Algorithm
//!
//! ```text
//! before every job:
//!     q              = queue length of the least-busy worker
//!     cost_waiting   = q * median(job duration)
//!     cost_spawning  = median(fork latency)
//!     if cost_waiting > cost_spawning:
//!         heat_up(1)              // best effort, capped at max
//!
//! whenever a worker goes idle:
//!     if no cooldown timer armed and live > min:
//!         arm timer(cooling_delay) for that worker
//!     on expiry:      cool_down(1, worker), then look for the next idle worker
//!     on new job for that worker before expiry:
//!                     disarm, then look for another idle worker
//! ```
//!
//! Only one cooldown timer exists at a time, so an idle pool shrinks one
//! worker per `cooling_delay` until it reaches the floor.

pub mod cooling;
pub mod engine;
pub mod error;
pub mod policy;
pub mod snapshot;

pub use engine::{Engine, Temperature};
pub use error::{EngineError, EngineResult};
pub use snapshot::{CoolingSnapshot, EngineSnapshot, WorkerSnapshot};

pub use rinzler_core::{EngineConfig, JobId, Payload, WorkerId, WorkerState};
pub use rinzler_runtime::{Routines, ThreadSpawner, UnitSpawner};
