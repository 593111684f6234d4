//! Engine — the temperature controller around a `Scheduler`.
//!
//! Tracks `min <= target <= max` worker counts, spawns workers on
//! heat-up, drains them on cool-down, and grows the pool before a job
//! when queueing looks more expensive than spawning.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use rinzler_core::{EngineConfig, Payload, WorkerId, WorkerState};
use rinzler_runtime::{Routines, ThreadSpawner, UnitSpawner};
use rinzler_scheduler::{RollingSamples, Scheduler, Topic, Worker, WorkerEvent};

use crate::cooling::CoolingTimer;
use crate::error::{EngineError, EngineResult};
use crate::policy;

/// Pool size bounds and the size the engine is moving towards.
///
/// `target` is `-1` before the first start and after a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Temperature {
    pub min: usize,
    pub target: isize,
    pub max: usize,
}

/// Everything needed to build another worker.
#[derive(Clone)]
struct WorkerSetup {
    routines: Routines,
    init_args: Option<Payload>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    spawner: Arc<dyn UnitSpawner>,
    pub(crate) scheduler: Scheduler,
    temperature: Mutex<Temperature>,
    setup: Mutex<Option<WorkerSetup>>,
    pub(crate) cooling: Mutex<Option<CoolingTimer>>,
    fork_times: Mutex<RollingSamples>,
    /// Held for the whole of every heat-up and cool-down.
    scaling: tokio::sync::Mutex<()>,
}

/// Self-sizing worker pool. Clones share the same pool.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

impl Engine {
    /// Engine backed by one OS thread per worker.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_spawner(config, Arc::new(ThreadSpawner::new()))
    }

    /// Engine backed by a custom execution-unit primitive.
    pub fn with_spawner(config: EngineConfig, spawner: Arc<dyn UnitSpawner>) -> Self {
        let temperature = Temperature {
            min: config.min_capacity,
            target: -1,
            max: config.max_capacity,
        };
        let backlog = config.sample_backlog;
        Self {
            inner: Arc::new(EngineInner {
                config,
                spawner,
                scheduler: Scheduler::new(backlog),
                temperature: Mutex::new(temperature),
                setup: Mutex::new(None),
                cooling: Mutex::new(None),
                fork_times: Mutex::new(RollingSamples::new(backlog)),
                scaling: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Store how workers are built and start the first one.
    pub async fn configure_and_start(
        &self,
        routines: Routines,
        init_args: Option<Payload>,
    ) -> EngineResult<&Self> {
        {
            let _scaling = self.inner.scaling.lock().await;
            if self.inner.scheduler.size() > 0 {
                return Err(EngineError::AlreadyStarted);
            }
            *lock(&self.inner.setup) = Some(WorkerSetup {
                routines,
                init_args,
            });
            lock(&self.inner.temperature).target = 0;
            self.heat_up_locked(1).await?;
        }
        info!(max = self.temperature().max, "engine started");
        Ok(self)
    }

    /// Run one job on the pool and wait for its result.
    pub async fn run_job(&self, payload: Payload) -> EngineResult<Payload> {
        if lock(&self.inner.setup).is_none() {
            return Err(EngineError::NotConfigured);
        }
        if self.temperature().target < 0 {
            return Err(EngineError::ShutDown);
        }
        self.automatic_heat_up().await;
        Ok(self.inner.scheduler.submit_job(payload).await?)
    }

    /// Grow straight to max capacity.
    pub async fn pre_heat(&self) -> EngineResult<&Self> {
        let _scaling = self.inner.scaling.lock().await;
        let temp = self.temperature();
        let missing = (temp.max as isize - temp.target.max(0)).max(0) as usize;
        self.heat_up_locked(missing).await?;
        Ok(self)
    }

    /// Move the capacity ceiling. Workers above a lowered ceiling are
    /// drained right away, least busy first.
    pub async fn afterburner(&self, max: usize) -> EngineResult<&Self> {
        let _scaling = self.inner.scaling.lock().await;
        let min = self.inner.config.min_capacity;
        if max < min {
            return Err(EngineError::InvalidCapacity { max, min });
        }
        lock(&self.inner.temperature).max = max;
        let live = self.inner.scheduler.size();
        info!(max, live, "capacity ceiling moved");
        if live > max {
            self.cool_down_locked(live - max, false, None).await?;
        }
        Ok(self)
    }

    /// Drain and terminate every worker. Safe to call repeatedly.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.clear_cooling();
        let _scaling = self.inner.scaling.lock().await;
        let live = self.inner.scheduler.size();
        self.cool_down_locked(live + 1, true, None).await?;
        // A heat-up that held the lock ahead of us may have armed a timer.
        self.clear_cooling();
        info!("engine shut down");
        Ok(())
    }

    /// Add `n` workers.
    pub async fn heat_up(&self, n: usize) -> EngineResult<()> {
        let _scaling = self.inner.scaling.lock().await;
        self.heat_up_locked(n).await
    }

    /// Remove `n` workers, or exactly the given one. `force` skips the
    /// floor checks and is meant for shutdown.
    pub async fn cool_down(
        &self,
        n: usize,
        force: bool,
        worker: Option<&WorkerId>,
    ) -> EngineResult<()> {
        let _scaling = self.inner.scaling.lock().await;
        self.cool_down_locked(n, force, worker).await
    }

    /// Grow by one worker if waiting on the least-busy queue is expected
    /// to take longer than spawning. Never fails: growth is best effort.
    pub async fn automatic_heat_up(&self) {
        let Some(least_busy) = self.inner.scheduler.least_busy() else {
            return;
        };
        let median_job = self.inner.scheduler.median_exec_time();
        let median_fork = self.median_fork_time();
        if !policy::should_heat_up(least_busy.queued, median_job, median_fork) {
            return;
        }

        // A scaling operation already in flight settles the size.
        let Ok(_scaling) = self.inner.scaling.try_lock() else {
            debug!("scaling in progress, skipping automatic heat-up");
            return;
        };
        match self.heat_up_locked(1).await {
            Ok(()) => debug!(
                queued = least_busy.queued,
                ?median_job,
                ?median_fork,
                "automatic heat-up"
            ),
            Err(e) if e.is_capacity() => debug!(error = %e, "automatic heat-up skipped"),
            Err(e) => warn!(error = %e, "automatic heat-up failed"),
        }
    }

    pub fn temperature(&self) -> Temperature {
        *lock(&self.inner.temperature)
    }

    /// Workers currently registered.
    pub fn live(&self) -> usize {
        self.inner.scheduler.size()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Median time from spawn request to ready handshake.
    pub fn median_fork_time(&self) -> Duration {
        lock(&self.inner.fork_times).median()
    }

    pub fn fork_time_samples(&self) -> Vec<Duration> {
        lock(&self.inner.fork_times).to_vec()
    }

    // ── Internal helpers ────────────────────────────────────────────

    async fn heat_up_locked(&self, n: usize) -> EngineResult<()> {
        let setup = lock(&self.inner.setup)
            .clone()
            .ok_or(EngineError::NotConfigured)?;
        {
            let mut temp = lock(&self.inner.temperature);
            policy::check_heat_up(temp.target, n, temp.max)?;
            temp.target = (self.inner.scheduler.size() + n) as isize;
        }

        for _ in 0..n {
            if let Err(e) = self.spawn_worker(&setup).await {
                self.sync_target();
                return Err(e);
            }
        }
        Ok(())
    }

    async fn spawn_worker(&self, setup: &WorkerSetup) -> EngineResult<()> {
        let started = Instant::now();
        let worker = Worker::spawn(
            self.inner.spawner.as_ref(),
            &setup.routines,
            setup.init_args.clone(),
        )?;
        worker.start().await?;
        let id = self.inner.scheduler.extend_pool(worker.clone());
        self.watch(&worker);
        // Failed between registration and the fatal listener.
        if worker.state() == WorkerState::Failed {
            self.evict(&id, "execution unit failed while joining the pool");
        }

        let elapsed = started.elapsed();
        lock(&self.inner.fork_times).push(elapsed);
        debug!(worker = %id, fork_ms = elapsed.as_millis() as u64, "worker spawned");

        if worker.queued() == 0 {
            self.automatic_cool_down(Some(id));
        }
        Ok(())
    }

    async fn cool_down_locked(
        &self,
        n: usize,
        force: bool,
        worker: Option<&WorkerId>,
    ) -> EngineResult<()> {
        if worker.is_some() && n != 1 {
            return Err(EngineError::InvalidCoolDown(n));
        }
        if let Some(id) = worker
            && !self.inner.scheduler.contains(id)
        {
            debug!(worker = %id, "cool-down target already gone");
            return Ok(());
        }

        let live = self.inner.scheduler.size();
        if !force {
            policy::check_cool_down(live, n, self.inner.config.min_capacity)?;
        }
        lock(&self.inner.temperature).target = live as isize - n as isize;

        for _ in 0..n {
            let Some(removed) = self.inner.scheduler.reduce_pool(worker).await else {
                break;
            };
            if !force {
                self.cancel_cooling(&removed);
            }
        }
        if !force {
            self.sync_target();
        }
        Ok(())
    }

    /// Feed the worker's idle, accepted and fatal reports back into the
    /// engine.
    fn watch(&self, worker: &Worker) {
        let id = worker.id().clone();
        let engine = self.downgrade();
        worker.on(Topic::Idle, move |_| {
            if let Some(engine) = upgrade(&engine) {
                engine.automatic_cool_down(Some(id.clone()));
            }
        });

        let id = worker.id().clone();
        let engine = self.downgrade();
        worker.on(Topic::Accepted, move |_| {
            if let Some(engine) = upgrade(&engine) {
                engine.cancel_cooling(&id);
            }
        });

        let id = worker.id().clone();
        let engine = self.downgrade();
        worker.on(Topic::Fatal, move |event| {
            if let Some(engine) = upgrade(&engine) {
                let message = match event {
                    WorkerEvent::Fatal(message) => message.as_str(),
                    _ => "unknown failure",
                };
                engine.evict(&id, message);
            }
        });
    }

    /// A failed worker leaves the pool for good. It is not replaced.
    fn evict(&self, id: &WorkerId, message: &str) {
        if self.inner.scheduler.evict(id).is_none() {
            return;
        }
        {
            let mut temp = lock(&self.inner.temperature);
            if temp.target > 0 {
                temp.target -= 1;
            }
        }
        warn!(worker = %id, %message, live = self.live(), "failed worker evicted");
        self.cancel_cooling(id);
    }

    /// Target follows the live count once an operation has settled.
    fn sync_target(&self) {
        let live = self.inner.scheduler.size() as isize;
        let mut temp = lock(&self.inner.temperature);
        if temp.target != live {
            debug!(target = temp.target, live, "target resynced to live workers");
            temp.target = live;
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }
}

pub(crate) fn upgrade(inner: &Weak<EngineInner>) -> Option<Engine> {
    inner.upgrade().map(|inner| Engine { inner })
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
