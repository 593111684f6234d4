//! Per-worker event notification.
//!
//! Listeners are either durable (called on every matching event) or
//! one-shot (called on the next matching event, then discarded). One-shot
//! listeners for a topic are taken out of the registry in one step before
//! any of them runs, so each fires exactly once even if a listener
//! registers new ones while being called.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use rinzler_core::{JobId, Payload};

/// What a listener subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Ready,
    Idle,
    /// Any job accepted by the execution unit.
    Accepted,
    /// One specific job accepted.
    AcceptedJob(JobId),
    /// Any job completed.
    Completed,
    /// One specific job completed.
    CompletedJob(JobId),
    Fatal,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Succeeded(Payload),
    /// The work routine reported an error.
    Failed(String),
    /// The worker died before the job completed.
    Lost(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: JobId,
    pub outcome: JobOutcome,
}

/// Something a worker reports.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Ready,
    Idle,
    Accepted(JobId),
    Completed(Completion),
    Fatal(String),
}

pub type Listener = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;
type OnceListener = Box<dyn FnOnce(&WorkerEvent) + Send>;

#[derive(Default)]
struct Listeners {
    durable: HashMap<Topic, Vec<Listener>>,
    once: HashMap<Topic, Vec<OnceListener>>,
}

#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<Listeners>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: Topic, listener: F)
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.lock()
            .durable
            .entry(topic)
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn once<F>(&self, topic: Topic, listener: F)
    where
        F: FnOnce(&WorkerEvent) + Send + 'static,
    {
        self.lock()
            .once
            .entry(topic)
            .or_default()
            .push(Box::new(listener));
    }

    /// Resolves with the next event on `topic`.
    pub fn wait_for(&self, topic: Topic) -> oneshot::Receiver<WorkerEvent> {
        let (tx, rx) = oneshot::channel();
        self.once(topic, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Call every listener for `topic`. Listeners run outside the lock.
    pub fn emit(&self, topic: Topic, event: &WorkerEvent) {
        let (durable, once) = {
            let mut listeners = self.lock();
            let durable = listeners.durable.get(&topic).cloned().unwrap_or_default();
            let once = listeners.once.remove(&topic).unwrap_or_default();
            (durable, once)
        };
        for listener in durable {
            listener(event);
        }
        for listener in once {
            listener(event);
        }
    }

    #[cfg(test)]
    fn pending_once(&self, topic: &Topic) -> usize {
        self.lock().once.get(topic).map_or(0, Vec::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
