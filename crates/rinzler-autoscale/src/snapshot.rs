//! Point-in-time view of an engine, serializable for monitoring.

use std::time::{Duration, Instant};

use serde::Serialize;

use rinzler_core::{WorkerId, WorkerState};

use crate::engine::{lock, Engine};

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub min: usize,
    pub max: usize,
    pub target: isize,
    pub live: usize,
    /// Jobs dispatched and not yet completed.
    pub pressure: usize,
    pub median_job_ms: f64,
    pub median_fork_ms: f64,
    pub workers: Vec<WorkerSnapshot>,
    pub cooling: Option<CoolingSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub queued: usize,
    pub active: bool,
    pub state: WorkerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoolingSnapshot {
    pub worker: WorkerId,
    pub remaining_ms: u64,
    pub firing: bool,
}

impl Engine {
    pub fn snapshot(&self) -> EngineSnapshot {
        let cooling = lock(&self.inner.cooling).as_ref().map(|timer| CoolingSnapshot {
            worker: timer.worker.clone(),
            remaining_ms: timer
                .deadline
                .saturating_duration_since(Instant::now())
                .as_millis() as u64,
            firing: timer.firing,
        });

        let scheduler = self.scheduler();
        let workers = scheduler
            .workers()
            .iter()
            .map(|w| WorkerSnapshot {
                id: w.id().clone(),
                queued: w.queued(),
                active: w.is_active(),
                state: w.state(),
            })
            .collect::<Vec<_>>();

        let temp = self.temperature();
        EngineSnapshot {
            min: temp.min,
            max: temp.max,
            target: temp.target,
            live: workers.len(),
            pressure: scheduler.pressure(),
            median_job_ms: millis(scheduler.median_exec_time()),
            median_fork_ms: millis(self.median_fork_time()),
            workers,
            cooling,
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rinzler_core::EngineConfig;
    use rinzler_runtime::{ManualSpawner, Routines};

    use super::*;

    #[tokio::test]
    async fn snapshot_reports_pool_and_timer() {
        let config = EngineConfig {
            max_capacity: 3,
            cooling_delay: Duration::from_secs(60),
            ..EngineConfig::default()
        };
        let engine = Engine::with_spawner(config, Arc::new(ManualSpawner::new()));
        engine
            .configure_and_start(Routines::new(|p| Ok(p)), None)
            .await
            .unwrap();
        engine.heat_up(1).await.unwrap();

        let snap = engine.snapshot();
        assert_eq!((snap.min, snap.max, snap.target, snap.live), (1, 3, 2, 2));
        assert_eq!(snap.pressure, 0);
        assert!(snap.workers.iter().all(|w| w.active && w.queued == 0));
        assert!(snap.workers.iter().all(|w| w.state == WorkerState::Idle));

        let cooling = snap.cooling.as_ref().expect("second worker should be cooling");
        assert_eq!(cooling.worker, snap.workers[1].id);
        assert!(!cooling.firing);
        assert!(cooling.remaining_ms > 50_000);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["workers"][0]["state"], "idle");
        assert_eq!(json["target"], 2);
    }

    #[test]
    fn unstarted_engine_snapshot() {
        let engine = Engine::with_spawner(EngineConfig::default(), Arc::new(ManualSpawner::new()));
        let snap = engine.snapshot();
        assert_eq!(snap.target, -1);
        assert_eq!(snap.live, 0);
        assert!(snap.workers.is_empty());
        assert!(snap.cooling.is_none());
        assert_eq!(snap.median_job_ms, 0.0);
    }
}
