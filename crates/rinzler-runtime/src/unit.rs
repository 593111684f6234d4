//! The capability the pool needs from an execution unit.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use rinzler_core::Payload;

use crate::error::UnitResult;
use crate::protocol::{UnitEvent, UnitMessage};

/// Processes one job. An `Err` is reported to the job's caller as a
/// failed job; the unit keeps serving its queue.
pub type WorkFn = Arc<dyn Fn(Payload) -> anyhow::Result<Payload> + Send + Sync>;

/// Prepares a unit before it takes jobs. Receives the engine's init
/// arguments, if any. An `Err` makes the unit fatal.
pub type InitFn = Arc<dyn Fn(Option<Payload>) -> anyhow::Result<()> + Send + Sync>;

/// The `(init, work)` pair every unit of a pool is built from.
#[derive(Clone)]
pub struct Routines {
    pub work: WorkFn,
    pub init: Option<InitFn>,
}

impl Routines {
    pub fn new<F>(work: F) -> Self
    where
        F: Fn(Payload) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        Self {
            work: Arc::new(work),
            init: None,
        }
    }

    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(Option<Payload>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }
}

impl std::fmt::Debug for Routines {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routines")
            .field("init", &self.init.is_some())
            .finish_non_exhaustive()
    }
}

/// Launches execution units.
pub trait UnitSpawner: Send + Sync {
    /// Start a unit. Everything the unit reports, readiness included,
    /// arrives on `events`.
    fn spawn(
        &self,
        routines: &Routines,
        events: UnboundedSender<UnitEvent>,
    ) -> UnitResult<Box<dyn UnitHandle>>;
}

/// A running execution unit.
pub trait UnitHandle: Send + Sync {
    /// Fire-and-forget. Messages are delivered in send order.
    fn send(&self, message: UnitMessage) -> UnitResult<()>;

    /// Tear the unit down. Nothing it reports afterwards is delivered.
    fn terminate(&self);
}
