//! Thread-backed execution units.
//!
//! Each unit is a dedicated OS thread fed through a channel. The thread
//! runs the init routine on `Init`, then processes jobs one at a time in
//! arrival order, acknowledging each before running it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::error::{UnitError, UnitResult};
use crate::protocol::{UnitEvent, UnitMessage};
use crate::unit::{Routines, UnitHandle, UnitSpawner};

/// Spawns one named OS thread per execution unit.
pub struct ThreadSpawner {
    name_prefix: String,
    spawned: AtomicUsize,
}

impl ThreadSpawner {
    pub fn new() -> Self {
        Self::with_name_prefix("rinzler-unit")
    }

    pub fn with_name_prefix(prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: prefix.into(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of units spawned so far (for diagnostics).
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Default for ThreadSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitSpawner for ThreadSpawner {
    fn spawn(
        &self,
        routines: &Routines,
        events: UnboundedSender<UnitEvent>,
    ) -> UnitResult<Box<dyn UnitHandle>> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{n}", self.name_prefix);
        let (tx, rx) = mpsc::unbounded_channel();
        let terminated = Arc::new(AtomicBool::new(false));

        let outbox = Outbox {
            events,
            terminated: terminated.clone(),
        };
        let routines = routines.clone();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_unit(routines, rx, outbox))
            .map_err(|e| UnitError::SpawnFailed(e.to_string()))?;

        debug!(unit = %name, "execution unit thread spawned");
        Ok(Box::new(ThreadHandle {
            name,
            inbox: Mutex::new(Some(tx)),
            terminated,
        }))
    }
}

/// Host side of a thread-backed unit.
struct ThreadHandle {
    name: String,
    inbox: Mutex<Option<UnboundedSender<UnitMessage>>>,
    terminated: Arc<AtomicBool>,
}

impl UnitHandle for ThreadHandle {
    fn send(&self, message: UnitMessage) -> UnitResult<()> {
        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        match inbox.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| UnitError::Disconnected),
            None => Err(UnitError::Disconnected),
        }
    }

    // An OS thread cannot be killed from outside. Closing the inbox ends
    // the loop after the current message, and the flag silences anything
    // the thread still reports.
    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(unit = %self.name, "execution unit terminated");
    }
}

/// Unit side of the event channel.
struct Outbox {
    events: UnboundedSender<UnitEvent>,
    terminated: Arc<AtomicBool>,
}

impl Outbox {
    fn post(&self, event: UnitEvent) -> bool {
        if self.terminated.load(Ordering::SeqCst) {
            return false;
        }
        self.events.send(event).is_ok()
    }
}

fn run_unit(routines: Routines, mut inbox: UnboundedReceiver<UnitMessage>, outbox: Outbox) {
    while let Some(message) = inbox.blocking_recv() {
        if outbox.terminated.load(Ordering::SeqCst) {
            break;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handle_message(&routines, message, &outbox)));
        match outcome {
            Ok(true) => {}
            Ok(false) => break,
            Err(cause) => {
                let message = panic_message(cause.as_ref());
                warn!(%message, "execution unit panicked");
                outbox.post(UnitEvent::Fatal {
                    message: format!("execution unit panicked: {message}"),
                });
                break;
            }
        }
    }
}

/// Returns `false` once the unit should stop.
fn handle_message(routines: &Routines, message: UnitMessage, outbox: &Outbox) -> bool {
    match message {
        UnitMessage::Init(args) => {
            let result = match &routines.init {
                Some(init) => init(args),
                None => Ok(()),
            };
            match result {
                Ok(()) => outbox.post(UnitEvent::Ready),
                Err(e) => {
                    outbox.post(UnitEvent::Fatal {
                        message: format!("init routine failed: {e:#}"),
                    });
                    false
                }
            }
        }
        UnitMessage::Job { id, payload } => {
            if !outbox.post(UnitEvent::Accepted { id: id.clone() }) {
                return false;
            }
            let event = match (routines.work)(payload) {
                Ok(payload) => UnitEvent::Completed {
                    id,
                    error: false,
                    payload,
                },
                Err(e) => UnitEvent::failed(id, format!("{e:#}")),
            };
            outbox.post(event)
        }
    }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
