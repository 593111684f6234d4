//! Worker — one execution unit plus its job queue.
//!
//! The worker sends the head of its queue to the unit and holds the rest
//! back until the unit reports completion, so at most one job is in flight
//! and jobs finish in submission order. A background task pumps the
//! unit's reports into the worker's state and its `EventEmitter`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, trace, warn};

use rinzler_core::{JobId, Payload, WorkerId, WorkerState};
use rinzler_runtime::{Routines, UnitEvent, UnitHandle, UnitMessage, UnitSpawner};

use crate::error::{WorkerError, WorkerResult};
use crate::events::{Completion, EventEmitter, JobOutcome, Topic, WorkerEvent};

/// A unit of work waiting in (or at the head of) a worker's queue.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    /// Taken when the job is sent to the unit.
    payload: Option<Payload>,
}

impl Job {
    pub fn new(id: JobId, payload: Payload) -> Self {
        Self {
            id,
            payload: Some(payload),
        }
    }
}

/// Dispatch slot of the execution unit.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Free,
    /// Sent, waiting for `accepted`.
    Sent(JobId),
    Running(JobId),
}

struct WorkerInner {
    queue: VecDeque<Job>,
    active: bool,
    slot: Slot,
    state: WorkerState,
}

pub struct Worker {
    id: WorkerId,
    unit: Box<dyn UnitHandle>,
    init_args: Option<Payload>,
    events: EventEmitter,
    inner: Mutex<WorkerInner>,
}

impl Worker {
    /// Launch an execution unit and wrap it. The worker takes no jobs
    /// until `start` completes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        spawner: &dyn UnitSpawner,
        routines: &Routines,
        init_args: Option<Payload>,
    ) -> WorkerResult<Arc<Self>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let unit = spawner.spawn(routines, tx)?;

        let worker = Arc::new(Self {
            id: WorkerId::new(),
            unit,
            init_args,
            events: EventEmitter::new(),
            inner: Mutex::new(WorkerInner {
                queue: VecDeque::new(),
                active: false,
                slot: Slot::Free,
                state: WorkerState::Spawning,
            }),
        });

        tokio::spawn(pump(worker.clone(), rx));
        Ok(worker)
    }

    /// Send the init message and wait for the unit to report ready.
    ///
    /// There is no timeout: a unit that never answers keeps this pending.
    pub async fn start(&self) -> WorkerResult<()> {
        let ready = self.events.wait_for(Topic::Ready);
        let fatal = self.events.wait_for(Topic::Fatal);
        self.unit.send(UnitMessage::Init(self.init_args.clone()))?;

        tokio::select! {
            event = ready => {
                if event.is_err() {
                    return Err(self.fatal_error("event channel closed before ready"));
                }
            }
            event = fatal => {
                let message = match event {
                    Ok(WorkerEvent::Fatal(message)) => message,
                    _ => "execution unit failed during init".to_string(),
                };
                return Err(self.fatal_error(message));
            }
        }

        {
            let mut inner = self.lock();
            if inner.state != WorkerState::Spawning {
                return Err(WorkerError::NotAccepting(self.id.clone()));
            }
            inner.active = true;
            inner.state = WorkerState::Idle;
        }
        info!(worker = %self.id, "worker ready");
        self.events.emit(Topic::Idle, &WorkerEvent::Idle);
        Ok(())
    }

    /// Queue a job. Fails immediately once the worker stops accepting.
    pub fn submit_job(&self, job: Job) -> WorkerResult<()> {
        self.try_submit(job)
            .map_err(|_| WorkerError::NotAccepting(self.id.clone()))
    }

    /// Like `submit_job`, but hands a rejected job back to the caller.
    pub(crate) fn try_submit(&self, job: Job) -> Result<(), Job> {
        let result = {
            let mut inner = self.lock();
            if !inner.active {
                return Err(job);
            }
            debug!(worker = %self.id, job = %job.id, queued = inner.queue.len(), "job queued");
            inner.queue.push_back(job);
            inner.state = WorkerState::Busy;
            self.dispatch(&mut inner)
        };
        if let Err(e) = result {
            self.fail(format!("failed to reach execution unit: {e}"));
        }
        Ok(())
    }

    /// Reject new jobs from now on. Queued jobs still run.
    pub fn stop_accepting(&self) {
        let mut inner = self.lock();
        inner.active = false;
        if inner.state == WorkerState::Busy {
            inner.state = WorkerState::Draining;
        }
    }

    /// Stop accepting, wait until every queued job has completed, then
    /// terminate the execution unit.
    pub async fn shutdown(&self) {
        let drained = {
            let mut inner = self.lock();
            inner.active = false;
            match inner.state {
                WorkerState::Terminated | WorkerState::Failed => return,
                _ => {}
            }
            if inner.queue.is_empty() {
                None
            } else {
                inner.state = WorkerState::Draining;
                // Registered under the state lock: the idle event for the
                // last job cannot fire before these listeners exist.
                Some((
                    self.events.wait_for(Topic::Idle),
                    self.events.wait_for(Topic::Fatal),
                ))
            }
        };

        if let Some((idle, fatal)) = drained {
            debug!(worker = %self.id, "waiting for worker to drain");
            tokio::select! {
                _ = idle => {}
                _ = fatal => {}
            }
        }

        {
            let mut inner = self.lock();
            if inner.state == WorkerState::Failed {
                return;
            }
            inner.state = WorkerState::Terminated;
        }
        self.unit.terminate();
        info!(worker = %self.id, "worker terminated");
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Jobs queued, including the one in flight.
    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn state(&self) -> WorkerState {
        self.lock().state
    }

    /// Job currently sent to or running on the unit.
    pub fn in_flight(&self) -> Option<JobId> {
        match &self.lock().slot {
            Slot::Free => None,
            Slot::Sent(id) | Slot::Running(id) => Some(id.clone()),
        }
    }

    pub fn on<F>(&self, topic: Topic, listener: F)
    where
        F: Fn(&WorkerEvent) + Send + Sync + 'static,
    {
        self.events.on(topic, listener);
    }

    pub fn once<F>(&self, topic: Topic, listener: F)
    where
        F: FnOnce(&WorkerEvent) + Send + 'static,
    {
        self.events.once(topic, listener);
    }

    pub fn wait_for(&self, topic: Topic) -> tokio::sync::oneshot::Receiver<WorkerEvent> {
        self.events.wait_for(topic)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Send the head of the queue if the unit is free.
    fn dispatch(&self, inner: &mut WorkerInner) -> WorkerResult<()> {
        if inner.slot != Slot::Free {
            return Ok(());
        }
        let Some(job) = inner.queue.front_mut() else {
            return Ok(());
        };
        let id = job.id.clone();
        let payload = job.payload.take().unwrap_or_default();
        inner.slot = Slot::Sent(id.clone());
        debug!(worker = %self.id, job = %id, "job dispatched");
        self.unit.send(UnitMessage::Job { id, payload })?;
        Ok(())
    }

    fn handle(&self, event: UnitEvent) {
        match event {
            UnitEvent::Ready => self.events.emit(Topic::Ready, &WorkerEvent::Ready),
            UnitEvent::Accepted { id } => {
                {
                    let mut inner = self.lock();
                    if inner.slot == Slot::Sent(id.clone()) {
                        inner.slot = Slot::Running(id.clone());
                    }
                }
                let event = WorkerEvent::Accepted(id.clone());
                self.events.emit(Topic::Accepted, &event);
                self.events.emit(Topic::AcceptedJob(id), &event);
            }
            UnitEvent::Completed { id, error, payload } => self.complete(id, error, payload),
            UnitEvent::Fatal { message } => self.fail(message),
        }
    }

    fn complete(&self, id: JobId, error: bool, payload: Payload) {
        let (idle, dispatched) = {
            let mut inner = self.lock();
            if let Some(pos) = inner.queue.iter().position(|job| job.id == id) {
                inner.queue.remove(pos);
            }
            if matches!(&inner.slot, Slot::Sent(cur) | Slot::Running(cur) if *cur == id) {
                inner.slot = Slot::Free;
            }
            if inner.queue.is_empty() {
                if inner.state == WorkerState::Busy {
                    inner.state = WorkerState::Idle;
                }
                (true, Ok(()))
            } else {
                (false, self.dispatch(&mut inner))
            }
        };

        let outcome = if error {
            JobOutcome::Failed(error_message(&payload))
        } else {
            JobOutcome::Succeeded(payload)
        };
        debug!(worker = %self.id, job = %id, failed = error, "job completed");
        let event = WorkerEvent::Completed(Completion {
            id: id.clone(),
            outcome,
        });
        self.events.emit(Topic::Completed, &event);
        self.events.emit(Topic::CompletedJob(id), &event);

        if let Err(e) = dispatched {
            self.fail(format!("failed to reach execution unit: {e}"));
        } else if idle {
            self.events.emit(Topic::Idle, &WorkerEvent::Idle);
        }
    }

    /// The unit is unusable: stop it and resolve every queued job as lost.
    fn fail(&self, message: String) {
        let lost: Vec<JobId> = {
            let mut inner = self.lock();
            if matches!(inner.state, WorkerState::Failed | WorkerState::Terminated) {
                return;
            }
            inner.active = false;
            inner.state = WorkerState::Failed;
            inner.slot = Slot::Free;
            inner.queue.drain(..).map(|job| job.id).collect()
        };
        self.unit.terminate();
        warn!(worker = %self.id, %message, lost = lost.len(), "worker failed");

        self.events
            .emit(Topic::Fatal, &WorkerEvent::Fatal(message.clone()));
        for id in lost {
            let event = WorkerEvent::Completed(Completion {
                id: id.clone(),
                outcome: JobOutcome::Lost(message.clone()),
            });
            self.events.emit(Topic::CompletedJob(id), &event);
        }
    }

    fn fatal_error(&self, message: impl Into<String>) -> WorkerError {
        WorkerError::Fatal {
            worker: self.id.clone(),
            message: message.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WorkerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("queued", &self.queued())
            .field("state", &self.state())
            .finish()
    }
}

/// Feeds unit reports into the worker until the unit goes away.
async fn pump(worker: Arc<Worker>, mut events: UnboundedReceiver<UnitEvent>) {
    while let Some(event) = events.recv().await {
        trace!(worker = %worker.id, event = event.label(), "unit event");
        worker.handle(event);
    }
    if worker.state() != WorkerState::Terminated {
        worker.fail("execution unit disconnected".to_string());
    }
}

fn error_message(payload: &Payload) -> String {
    match &payload.data {
        serde_json::Value::String(message) => message.clone(),
        serde_json::Value::Null => "job failed".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rinzler_runtime::{ManualSpawner, ThreadSpawner};
    use std::time::Duration;

    fn echo() -> Routines {
        Routines::new(Ok)
    }

    async fn started(spawner: &ManualSpawner) -> Arc<Worker> {
        let worker = Worker::spawn(spawner, &echo(), None).unwrap();
        worker.start().await.unwrap();
        worker
    }

    #[tokio::test]
    async fn start_marks_active_and_emits_idle() {
        let spawner = ManualSpawner::without_auto_ready();
        let worker = Worker::spawn(&spawner, &echo(), None).unwrap();
        assert_eq!(worker.state(), WorkerState::Spawning);
        assert!(!worker.is_active());

        let idle = worker.wait_for(Topic::Idle);
        let w = worker.clone();
        let start = tokio::spawn(async move { w.start().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!start.is_finished());

        spawner.unit(0).unwrap().ready();
        start.await.unwrap().unwrap();
        idle.await.unwrap();
        assert!(worker.is_active());
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn start_sends_init_args() {
        let spawner = ManualSpawner::new();
        let args = Payload::new(serde_json::json!({"model": "small"}));
        let worker = Worker::spawn(&spawner, &echo(), Some(args.clone())).unwrap();
        worker.start().await.unwrap();

        match &spawner.unit(0).unwrap().received()[0] {
            UnitMessage::Init(Some(payload)) => assert_eq!(payload, &args),
            other => panic!("unexpected first message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_fails_when_init_is_fatal() {
        let spawner = ManualSpawner::without_auto_ready();
        let worker = Worker::spawn(&spawner, &echo(), None).unwrap();
        let w = worker.clone();
        let start = tokio::spawn(async move { w.start().await });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        spawner.unit(0).unwrap().crash("init exploded");
        let err = start.await.unwrap().unwrap_err();
        assert!(matches!(err, WorkerError::Fatal { .. }));
        assert_eq!(worker.state(), WorkerState::Failed);
    }

    #[tokio::test]
    async fn submit_before_start_is_rejected() {
        let spawner = ManualSpawner::new();
        let worker = Worker::spawn(&spawner, &echo(), None).unwrap();
        let err = worker
            .submit_job(Job::new(JobId::new(), Payload::empty()))
            .unwrap_err();
        assert!(matches!(err, WorkerError::NotAccepting(_)));
    }

    #[tokio::test]
    async fn only_one_job_in_flight() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        let unit = spawner.unit(0).unwrap();

        let a = JobId::new();
        let b = JobId::new();
        worker.submit_job(Job::new(a.clone(), Payload::empty())).unwrap();
        worker.submit_job(Job::new(b.clone(), Payload::empty())).unwrap();

        assert_eq!(unit.next_job().await, Some(a.clone()));
        assert_eq!(unit.jobs(), vec![a.clone()]);
        assert_eq!(worker.queued(), 2);
        assert_eq!(worker.in_flight(), Some(a.clone()));

        let accepted = worker.wait_for(Topic::AcceptedJob(a.clone()));
        unit.accept(&a);
        accepted.await.unwrap();
        assert_eq!(unit.jobs(), vec![a.clone()]);

        let done = worker.wait_for(Topic::CompletedJob(a.clone()));
        unit.complete(&a, Payload::empty());
        done.await.unwrap();

        assert_eq!(unit.next_job().await, Some(b.clone()));
        assert_eq!(worker.queued(), 1);
        assert_eq!(worker.in_flight(), Some(b));
    }

    #[tokio::test]
    async fn idle_fires_when_queue_empties() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        let unit = spawner.unit(0).unwrap();

        let id = JobId::new();
        worker.submit_job(Job::new(id.clone(), Payload::empty())).unwrap();
        assert_eq!(worker.state(), WorkerState::Busy);

        let idle = worker.wait_for(Topic::Idle);
        unit.next_job().await;
        unit.run(&id);
        idle.await.unwrap();
        assert_eq!(worker.queued(), 0);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn job_failure_is_not_worker_fatal() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        let unit = spawner.unit(0).unwrap();

        let id = JobId::new();
        let done = worker.wait_for(Topic::CompletedJob(id.clone()));
        worker.submit_job(Job::new(id.clone(), Payload::empty())).unwrap();
        unit.next_job().await;
        unit.accept(&id);
        unit.fail_job(&id, "division by zero");

        match done.await.unwrap() {
            WorkerEvent::Completed(c) => {
                assert_eq!(c.outcome, JobOutcome::Failed("division by zero".into()))
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(worker.is_active());
    }

    #[tokio::test]
    async fn fatal_resolves_queued_jobs_as_lost() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        let unit = spawner.unit(0).unwrap();

        let a = JobId::new();
        let b = JobId::new();
        let done_a = worker.wait_for(Topic::CompletedJob(a.clone()));
        let done_b = worker.wait_for(Topic::CompletedJob(b.clone()));
        worker.submit_job(Job::new(a.clone(), Payload::empty())).unwrap();
        worker.submit_job(Job::new(b, Payload::empty())).unwrap();
        unit.next_job().await;
        unit.crash("segfault");

        for done in [done_a, done_b] {
            match done.await.unwrap() {
                WorkerEvent::Completed(c) => {
                    assert_eq!(c.outcome, JobOutcome::Lost("segfault".into()))
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(worker.state(), WorkerState::Failed);
        assert!(!worker.is_active());
        assert!(unit.is_terminated());
    }

    #[tokio::test]
    async fn shutdown_drains_queue_before_terminating() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        let unit = spawner.unit(0).unwrap();

        let a = JobId::new();
        let b = JobId::new();
        worker.submit_job(Job::new(a.clone(), Payload::empty())).unwrap();
        worker.submit_job(Job::new(b.clone(), Payload::empty())).unwrap();

        let w = worker.clone();
        let shutdown = tokio::spawn(async move { w.shutdown().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!shutdown.is_finished());
        assert_eq!(worker.state(), WorkerState::Draining);
        assert!(matches!(
            worker.submit_job(Job::new(JobId::new(), Payload::empty())),
            Err(WorkerError::NotAccepting(_))
        ));

        assert_eq!(unit.next_job().await, Some(a.clone()));
        unit.run(&a);
        assert_eq!(unit.next_job().await, Some(b.clone()));
        assert!(!unit.is_terminated());
        unit.run(&b);

        shutdown.await.unwrap();
        assert!(unit.is_terminated());
        assert_eq!(worker.state(), WorkerState::Terminated);
        assert_eq!(unit.jobs(), vec![a, b]);
    }

    #[tokio::test]
    async fn shutdown_of_idle_worker_terminates_immediately() {
        let spawner = ManualSpawner::new();
        let worker = started(&spawner).await;
        worker.shutdown().await;
        assert!(spawner.unit(0).unwrap().is_terminated());
        assert_eq!(worker.state(), WorkerState::Terminated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fifo_order_with_real_unit() {
        let routines = Routines::new(|payload: Payload| {
            let ms = payload.data.as_u64().unwrap_or_default();
            std::thread::sleep(Duration::from_millis(ms));
            Ok(payload)
        });
        let spawner = ThreadSpawner::new();
        let worker = Worker::spawn(&spawner, &routines, None).unwrap();
        worker.start().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let o = order.clone();
        worker.on(Topic::Completed, move |event| {
            if let WorkerEvent::Completed(c) = event {
                o.lock().unwrap().push(c.id.clone());
            }
        });

        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        let idle = worker.wait_for(Topic::Idle);
        for (id, ms) in ids.iter().zip([40u64, 5, 20]) {
            worker
                .submit_job(Job::new(id.clone(), Payload::new(serde_json::json!(ms))))
                .unwrap();
        }
        idle.await.unwrap();

        assert_eq!(*order.lock().unwrap(), ids);
        worker.shutdown().await;
    }
}
