//! Idle cooldown: at most one armed timer, aimed at one idle worker.

use std::sync::Weak;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use rinzler_core::WorkerId;
use rinzler_scheduler::Worker;

use crate::engine::{lock, upgrade, Engine, EngineInner};

/// The single pending cooldown.
pub(crate) struct CoolingTimer {
    pub(crate) worker: WorkerId,
    pub(crate) deadline: Instant,
    /// Set once the delay has elapsed and the cool-down is running.
    pub(crate) firing: bool,
    /// Dropping this disarms the timer task.
    cancel: Option<oneshot::Sender<()>>,
}

impl Engine {
    /// Arm the cooldown timer for an idle worker, or for the first idle
    /// worker found when `candidate` is `None`. Does nothing when a timer
    /// is already armed or the pool sits at its floor.
    pub fn automatic_cool_down(&self, candidate: Option<WorkerId>) {
        let delay = self.inner.config.cooling_delay;
        let mut cooling = lock(&self.inner.cooling);
        if cooling.is_some() {
            return;
        }
        let temp = self.temperature();
        if temp.target < 0 || self.live() <= temp.min {
            return;
        }

        let scheduler = &self.inner.scheduler;
        let worker = match candidate {
            Some(id) => scheduler.get(&id).filter(|w| is_idle(w)),
            None => scheduler.workers().into_iter().find(|w| is_idle(w)),
        };
        let Some(worker) = worker else {
            return;
        };

        let id = worker.id().clone();
        let (tx, rx) = oneshot::channel();
        *cooling = Some(CoolingTimer {
            worker: id.clone(),
            deadline: Instant::now() + delay,
            firing: false,
            cancel: Some(tx),
        });
        drop(cooling);

        debug!(worker = %id, delay_ms = delay.as_millis() as u64, "cooldown armed");
        tokio::spawn(run_cooling_timer(self.downgrade(), id, delay, rx));
    }

    /// Disarm the timer if it is aimed at `worker` and has not fired yet,
    /// then look for another idle worker. Returns whether a timer was
    /// disarmed.
    pub fn cancel_cooling(&self, worker: &WorkerId) -> bool {
        let disarmed = {
            let mut cooling = lock(&self.inner.cooling);
            match cooling.as_ref() {
                Some(timer) if timer.worker == *worker && !timer.firing => cooling.take(),
                _ => None,
            }
        };
        let Some(mut timer) = disarmed else {
            return false;
        };
        drop(timer.cancel.take());
        debug!(worker = %worker, "cooldown cancelled, worker busy again");
        self.automatic_cool_down(None);
        true
    }

    /// Worker the armed timer is aimed at, if any.
    pub fn cooling_target(&self) -> Option<WorkerId> {
        lock(&self.inner.cooling).as_ref().map(|t| t.worker.clone())
    }

    /// Drop any timer, fired or not.
    pub(crate) fn clear_cooling(&self) {
        if let Some(timer) = lock(&self.inner.cooling).take() {
            debug!(worker = %timer.worker, "cooldown cleared");
        }
    }
}

fn is_idle(worker: &Worker) -> bool {
    worker.is_active() && worker.queued() == 0
}

async fn run_cooling_timer(
    engine: Weak<EngineInner>,
    worker: WorkerId,
    delay: Duration,
    cancelled: oneshot::Receiver<()>,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancelled => return,
    }
    let Some(engine) = upgrade(&engine) else {
        return;
    };

    {
        let mut cooling = lock(&engine.inner.cooling);
        match cooling.as_mut() {
            Some(timer) if timer.worker == worker => timer.firing = true,
            _ => return,
        }
    }

    match engine.cool_down(1, false, Some(&worker)).await {
        Ok(()) => debug!(worker = %worker, live = engine.live(), "idle worker cooled down"),
        Err(e) if e.is_capacity() => debug!(worker = %worker, error = %e, "cooldown skipped"),
        Err(e) => warn!(worker = %worker, error = %e, "cooldown failed"),
    }

    {
        let mut cooling = lock(&engine.inner.cooling);
        if cooling.as_ref().is_some_and(|t| t.worker == worker) {
            *cooling = None;
        }
    }
    engine.automatic_cool_down(None);
}
