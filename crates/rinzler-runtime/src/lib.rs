//! rinzler-runtime — execution units that actually run jobs.
//!
//! An execution unit is spawned with a work routine and an optional init
//! routine, receives messages, and reports back over an event channel.
//! The pool above it only ever sees the `UnitSpawner` / `UnitHandle`
//! traits and the four protocol messages:
//!
//! ```text
//! host ──init{payload}──────────▶ unit
//! host ◀─ready────────────────── unit
//! host ──job{id, payload}───────▶ unit
//! host ◀─accepted{id}─────────── unit
//! host ◀─completed{id, error, payload}── unit
//! ```
//!
//! `ThreadSpawner` is the default implementation: one OS thread per unit,
//! jobs processed strictly in arrival order. `ManualSpawner` hands control
//! of every reply to the caller.

pub mod error;
pub mod manual;
pub mod protocol;
pub mod thread;
pub mod unit;

pub use error::{UnitError, UnitResult};
pub use manual::{ManualSpawner, ManualUnit};
pub use protocol::{UnitEvent, UnitMessage};
pub use thread::ThreadSpawner;
pub use unit::{InitFn, Routines, UnitHandle, UnitSpawner, WorkFn};
