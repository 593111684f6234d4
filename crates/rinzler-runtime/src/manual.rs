//! Hand-driven execution units.
//!
//! `ManualSpawner` records every message sent to its units and lets the
//! caller decide when each unit reports `ready`, `accepted`, `completed`
//! or a fatal error. Useful for exercising the pool protocol step by
//! step without real threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use rinzler_core::{JobId, Payload};

use crate::error::{UnitError, UnitResult};
use crate::protocol::{UnitEvent, UnitMessage};
use crate::unit::{Routines, UnitHandle, UnitSpawner};

/// Spawns `ManualUnit`s.
pub struct ManualSpawner {
    auto_ready: bool,
    units: Mutex<Vec<ManualUnit>>,
}

impl ManualSpawner {
    /// Units answer `init` with `ready` on their own.
    pub fn new() -> Self {
        Self {
            auto_ready: true,
            units: Mutex::new(Vec::new()),
        }
    }

    /// Units stay silent after `init` until `ManualUnit::ready` is called.
    pub fn without_auto_ready() -> Self {
        Self {
            auto_ready: false,
            units: Mutex::new(Vec::new()),
        }
    }

    /// Units spawned so far, in spawn order.
    pub fn units(&self) -> Vec<ManualUnit> {
        lock(&self.units).clone()
    }

    pub fn unit(&self, index: usize) -> Option<ManualUnit> {
        lock(&self.units).get(index).cloned()
    }
}

impl Default for ManualSpawner {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitSpawner for ManualSpawner {
    fn spawn(
        &self,
        _routines: &Routines,
        events: UnboundedSender<UnitEvent>,
    ) -> UnitResult<Box<dyn UnitHandle>> {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let unit = ManualUnit {
            inner: Arc::new(ManualInner {
                auto_ready: self.auto_ready,
                events: Mutex::new(Some(events)),
                received: Mutex::new(Vec::new()),
                job_tx,
                job_rx: tokio::sync::Mutex::new(job_rx),
                terminated: AtomicBool::new(false),
            }),
        };
        lock(&self.units).push(unit.clone());
        Ok(Box::new(unit))
    }
}

struct ManualInner {
    auto_ready: bool,
    events: Mutex<Option<UnboundedSender<UnitEvent>>>,
    received: Mutex<Vec<UnitMessage>>,
    job_tx: UnboundedSender<JobId>,
    job_rx: tokio::sync::Mutex<UnboundedReceiver<JobId>>,
    terminated: AtomicBool,
}

/// One scripted execution unit. Clones share the same unit.
#[derive(Clone)]
pub struct ManualUnit {
    inner: Arc<ManualInner>,
}

impl ManualUnit {
    pub fn ready(&self) {
        self.post(UnitEvent::Ready);
    }

    pub fn accept(&self, id: &JobId) {
        self.post(UnitEvent::Accepted { id: id.clone() });
    }

    pub fn complete(&self, id: &JobId, payload: Payload) {
        self.post(UnitEvent::Completed {
            id: id.clone(),
            error: false,
            payload,
        });
    }

    pub fn fail_job(&self, id: &JobId, message: &str) {
        self.post(UnitEvent::failed(id.clone(), message));
    }

    pub fn crash(&self, message: &str) {
        self.post(UnitEvent::Fatal {
            message: message.to_string(),
        });
    }

    /// Accept and complete a job in one go, echoing its id back.
    pub fn run(&self, id: &JobId) {
        self.accept(id);
        self.complete(id, Payload::new(serde_json::json!(id.to_string())));
    }

    /// Waits for the next job sent to this unit.
    pub async fn next_job(&self) -> Option<JobId> {
        self.inner.job_rx.lock().await.recv().await
    }

    /// Every message received, in order.
    pub fn received(&self) -> Vec<UnitMessage> {
        lock(&self.inner.received).clone()
    }

    /// Ids of every job received, in order.
    pub fn jobs(&self) -> Vec<JobId> {
        self.received()
            .into_iter()
            .filter_map(|message| match message {
                UnitMessage::Job { id, .. } => Some(id),
                UnitMessage::Init(_) => None,
            })
            .collect()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    fn post(&self, event: UnitEvent) {
        if let Some(events) = lock(&self.inner.events).as_ref() {
            let _ = events.send(event);
        }
    }
}

impl UnitHandle for ManualUnit {
    fn send(&self, message: UnitMessage) -> UnitResult<()> {
        if self.is_terminated() {
            return Err(UnitError::Disconnected);
        }
        lock(&self.inner.received).push(message.clone());
        match message {
            UnitMessage::Init(_) if self.inner.auto_ready => self.ready(),
            UnitMessage::Init(_) => {}
            UnitMessage::Job { id, .. } => {
                let _ = self.inner.job_tx.send(id);
            }
        }
        Ok(())
    }

    fn terminate(&self) {
        self.inner.terminated.store(true, Ordering::SeqCst);
        lock(&self.inner.events).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routines() -> Routines {
        Routines::new(Ok)
    }

    #[tokio::test]
    async fn auto_ready_answers_init() {
        let spawner = ManualSpawner::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(&routines(), tx).unwrap();

        handle.send(UnitMessage::Init(None)).unwrap();
        assert!(matches!(rx.recv().await, Some(UnitEvent::Ready)));
    }

    #[tokio::test]
    async fn scripted_job_flow() {
        let spawner = ManualSpawner::without_auto_ready();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(&routines(), tx).unwrap();
        let unit = spawner.unit(0).unwrap();

        let id = JobId::new();
        handle
            .send(UnitMessage::Job {
                id: id.clone(),
                payload: Payload::empty(),
            })
            .unwrap();
        assert_eq!(unit.next_job().await, Some(id.clone()));
        assert_eq!(unit.jobs(), vec![id.clone()]);

        unit.run(&id);
        assert!(matches!(rx.recv().await, Some(UnitEvent::Accepted { .. })));
        assert!(matches!(rx.recv().await, Some(UnitEvent::Completed { error: false, .. })));
    }

    #[tokio::test]
    async fn terminate_closes_event_channel() {
        let spawner = ManualSpawner::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = spawner.spawn(&routines(), tx).unwrap();

        handle.terminate();
        assert!(spawner.unit(0).unwrap().is_terminated());
        assert!(rx.recv().await.is_none());
        assert!(handle.send(UnitMessage::Init(None)).is_err());
    }
}
