//! Scheduler — pool registry and least-busy job routing.
//!
//! The `Scheduler`:
//! - Registers started workers and removes them with a graceful drain
//! - Routes each job to the active worker with the shortest queue
//! - Tracks pressure (jobs dispatched but not completed)
//! - Keeps a rolling sample of job durations for the autoscaler

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use rinzler_core::{JobId, Payload, WorkerId};

use crate::error::{SchedulerError, SchedulerResult, WorkerError};
use crate::events::{JobOutcome, Topic, WorkerEvent};
use crate::registry::Registry;
use crate::stats::RollingSamples;
use crate::worker::{Job, Worker};

/// Result of a least-busy scan.
#[derive(Debug, Clone)]
pub struct LeastBusy {
    pub worker: Arc<Worker>,
    pub queued: usize,
}

pub struct Scheduler {
    pool: RwLock<Registry>,
    pressure: AtomicUsize,
    job_times: Mutex<RollingSamples>,
}

impl Scheduler {
    /// Create a scheduler keeping `sample_backlog` job durations.
    pub fn new(sample_backlog: usize) -> Self {
        Self {
            pool: RwLock::new(Registry::new()),
            pressure: AtomicUsize::new(0),
            job_times: Mutex::new(RollingSamples::new(sample_backlog)),
        }
    }

    /// Register a started worker. It becomes eligible for jobs as soon
    /// as it is both registered and active.
    pub fn extend_pool(&self, worker: Arc<Worker>) -> WorkerId {
        let id = worker.id().clone();
        let mut pool = self.write();
        pool.insert(id.clone(), worker);
        info!(worker = %id, size = pool.len(), "pool extended");
        id
    }

    /// Remove a worker and wait for it to drain. Without an id, the
    /// least-busy worker goes. Returns the removed worker's id, or `None`
    /// when there was nothing to remove.
    pub async fn reduce_pool(&self, id: Option<&WorkerId>) -> Option<WorkerId> {
        let worker = {
            let mut pool = self.write();
            let id = match id {
                Some(id) => id.clone(),
                None => least_busy_in(&pool)?.worker.id().clone(),
            };
            let worker = pool.remove(&id)?;
            // Same critical section as the removal: once out of the
            // registry, the worker takes no more jobs.
            worker.stop_accepting();
            worker
        };

        worker.shutdown().await;
        info!(worker = %worker.id(), size = self.size(), "pool reduced");
        Some(worker.id().clone())
    }

    /// Drop a worker from the registry without draining it.
    pub fn evict(&self, id: &WorkerId) -> Option<Arc<Worker>> {
        let worker = self.write().remove(id)?;
        worker.stop_accepting();
        Some(worker)
    }

    /// Run a job on the least-busy worker and wait for its result.
    pub async fn submit_job(&self, payload: Payload) -> SchedulerResult<Payload> {
        let id = JobId::new();
        let (worker, done) = self.dispatch(&id, payload)?;

        let _pressure = PressureGuard::new(&self.pressure);
        let started = Instant::now();
        let event = done.await;

        let outcome = match event {
            Ok(WorkerEvent::Completed(completion)) => completion.outcome,
            _ => JobOutcome::Lost("completion never arrived".to_string()),
        };

        match outcome {
            JobOutcome::Succeeded(payload) => {
                self.record(started.elapsed());
                debug!(job = %id, worker = %worker.id(), "job succeeded");
                Ok(payload)
            }
            JobOutcome::Failed(message) => {
                self.record(started.elapsed());
                debug!(job = %id, worker = %worker.id(), %message, "job failed");
                Err(SchedulerError::JobFailed { message })
            }
            JobOutcome::Lost(message) => Err(WorkerError::Fatal {
                worker: worker.id().clone(),
                message,
            }
            .into()),
        }
    }

    /// Active worker with the fewest queued jobs, ties going to the one
    /// registered first. `None` if no worker is eligible.
    pub fn least_busy(&self) -> Option<LeastBusy> {
        least_busy_in(&self.read())
    }

    /// Median of recent job durations, zero before the first job.
    pub fn median_exec_time(&self) -> Duration {
        self.job_times().median()
    }

    pub fn job_time_samples(&self) -> Vec<Duration> {
        self.job_times().to_vec()
    }

    /// Jobs dispatched and not yet completed, pool-wide.
    pub fn pressure(&self) -> usize {
        self.pressure.load(Ordering::SeqCst)
    }

    /// Registered workers.
    pub fn size(&self) -> usize {
        self.read().len()
    }

    pub fn contains(&self, id: &WorkerId) -> bool {
        self.read().contains(id)
    }

    pub fn get(&self, id: &WorkerId) -> Option<Arc<Worker>> {
        self.read().get(id).cloned()
    }

    /// Registered workers in registration order.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.read().iter().map(|(_, w)| w.clone()).collect()
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Hand a job to the least-busy worker. A worker picked by the scan
    /// can stop accepting before the job reaches it; the scan is then
    /// repeated over what is left.
    fn dispatch(
        &self,
        id: &JobId,
        payload: Payload,
    ) -> SchedulerResult<(Arc<Worker>, tokio::sync::oneshot::Receiver<WorkerEvent>)> {
        let mut job = Job::new(id.clone(), payload);
        for _ in 0..=self.size() {
            let Some(LeastBusy { worker, .. }) = self.least_busy() else {
                break;
            };
            let done = worker.wait_for(Topic::CompletedJob(id.clone()));
            match worker.try_submit(job) {
                Ok(()) => return Ok((worker, done)),
                Err(rejected) => {
                    debug!(job = %id, worker = %worker.id(), "worker stopped accepting, rescanning");
                    job = rejected;
                }
            }
        }
        Err(SchedulerError::NoWorkerAvailable)
    }

    fn record(&self, elapsed: Duration) {
        self.job_times().push(elapsed);
    }

    fn job_times(&self) -> std::sync::MutexGuard<'_, RollingSamples> {
        self.job_times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.pool.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.pool.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn least_busy_in(pool: &Registry) -> Option<LeastBusy> {
    let entries = pool
        .iter()
        .map(|(_, worker)| (worker, worker.is_active(), worker.queued()));
    pick_least_busy(entries).map(|(worker, queued)| LeastBusy {
        worker: worker.clone(),
        queued,
    })
}

/// Single pass over `(item, active, queued)` in registration order.
/// Inactive entries are skipped; an empty queue ends the scan early.
fn pick_least_busy<T, I>(entries: I) -> Option<(T, usize)>
where
    I: IntoIterator<Item = (T, bool, usize)>,
{
    let mut lowest: Option<(T, usize)> = None;
    for (item, active, queued) in entries {
        if !active {
            continue;
        }
        if lowest.as_ref().is_none_or(|(_, best)| queued < *best) {
            lowest = Some((item, queued));
            if queued == 0 {
                break;
            }
        }
    }
    lowest
}

/// Counts a job as in flight for as long as it is alive, including when
/// the caller stops waiting.
struct PressureGuard<'a>(&'a AtomicUsize);

impl<'a> PressureGuard<'a> {
    fn new(pressure: &'a AtomicUsize) -> Self {
        pressure.fetch_add(1, Ordering::SeqCst);
        Self(pressure)
    }
}

impl Drop for PressureGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
