//! `rinzler load` / `rinzler monitor` — synthetic busy-loop jobs at a
//! fixed rate against a self-sizing pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use rinzler_autoscale::{Engine, EngineConfig, Payload, Routines, ThreadSpawner};
use rinzler_core::RinzlerConfig;

use crate::LoadArgs;

const DEFAULT_INTERVAL_MS: u64 = 100;
const DEFAULT_JOB_MS: u64 = 250;
const DEFAULT_JOBS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadPlan {
    interval: Duration,
    job: Duration,
    jobs: u64,
    preheat: bool,
}

impl LoadPlan {
    /// Flags win over the config file, which wins over defaults.
    fn resolve(config: &RinzlerConfig, args: &LoadArgs) -> Self {
        let section = config.load.clone().unwrap_or_default();
        Self {
            interval: Duration::from_millis(
                args.interval_ms
                    .or(section.interval_ms)
                    .unwrap_or(DEFAULT_INTERVAL_MS),
            ),
            job: Duration::from_millis(args.job_ms.or(section.job_ms).unwrap_or(DEFAULT_JOB_MS)),
            jobs: args.jobs.or(section.jobs).unwrap_or(DEFAULT_JOBS),
            preheat: args.preheat || section.preheat.unwrap_or(false),
        }
    }
}

fn engine_config(config: &RinzlerConfig, args: &LoadArgs) -> EngineConfig {
    let mut engine = config.engine_config();
    if let Some(max) = args.max_capacity {
        engine.max_capacity = max.max(engine.min_capacity);
    }
    if let Some(ms) = args.cooling_delay_ms {
        engine.cooling_delay = Duration::from_millis(ms);
    }
    engine
}

/// Spin on the CPU for `ms` milliseconds taken from the payload.
fn busy_loop() -> Routines {
    Routines::new(|payload: Payload| {
        let ms = payload.data["ms"].as_u64().unwrap_or(0);
        let deadline = Instant::now() + Duration::from_millis(ms);
        let mut spins: u64 = 0;
        while Instant::now() < deadline {
            spins = spins.wrapping_add(1);
            std::hint::spin_loop();
        }
        Ok(Payload::new(json!({ "ms": ms, "spins": spins })))
    })
}

pub async fn run(
    config: &RinzlerConfig,
    args: &LoadArgs,
    every_ms: Option<u64>,
) -> anyhow::Result<()> {
    let plan = LoadPlan::resolve(config, args);
    let spawner = Arc::new(ThreadSpawner::with_name_prefix("rinzler-load"));
    let engine = Engine::with_spawner(engine_config(config, args), spawner.clone());
    engine.configure_and_start(busy_loop(), None).await?;
    if plan.preheat {
        engine.pre_heat().await?;
    }
    let temp = engine.temperature();
    info!(
        jobs = plan.jobs,
        job_ms = plan.job.as_millis() as u64,
        interval_ms = plan.interval.as_millis() as u64,
        min = temp.min,
        max = temp.max,
        live = engine.live(),
        "load starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = every_ms.map(|ms| {
        tokio::spawn(monitor(
            engine.clone(),
            Duration::from_millis(ms.max(1)),
            shutdown_rx,
        ))
    });

    let mut jobs = JoinSet::new();
    let mut ticker = tokio::time::interval(plan.interval);
    let mut submitted = 0;
    while submitted < plan.jobs {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!(submitted, "interrupted, waiting for submitted jobs");
                break;
            }
        }
        let engine = engine.clone();
        let payload = Payload::new(json!({ "ms": plan.job.as_millis() as u64 }));
        jobs.spawn(async move {
            let started = Instant::now();
            (engine.run_job(payload).await, started.elapsed())
        });
        submitted += 1;
    }

    let (mut succeeded, mut failed) = (0u64, 0u64);
    while let Some(joined) = jobs.join_next().await {
        match joined? {
            (Ok(_), latency) => {
                succeeded += 1;
                debug!(latency_ms = latency.as_millis() as u64, "job done");
            }
            (Err(e), _) => {
                failed += 1;
                warn!(error = %e, "job failed");
            }
        }
    }

    let temp = engine.temperature();
    info!(
        succeeded,
        failed,
        live = engine.live(),
        target = temp.target,
        median_job_ms = engine.scheduler().median_exec_time().as_millis() as u64,
        median_fork_ms = engine.median_fork_time().as_millis() as u64,
        units_spawned = spawner.spawned(),
        "load finished"
    );

    let _ = shutdown_tx.send(true);
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    engine.shutdown().await?;
    Ok(())
}

/// Print a JSON snapshot of the pool every `every` until told to stop.
async fn monitor(engine: Engine, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ticker.tick() => match serde_json::to_string(&engine.snapshot()) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "snapshot serialization failed"),
            },
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rinzler_core::config::LoadSection;

    #[test]
    fn defaults_without_config_or_flags() {
        let plan = LoadPlan::resolve(&RinzlerConfig::default(), &LoadArgs::default());
        assert_eq!(plan.interval, Duration::from_millis(DEFAULT_INTERVAL_MS));
        assert_eq!(plan.job, Duration::from_millis(DEFAULT_JOB_MS));
        assert_eq!(plan.jobs, DEFAULT_JOBS);
        assert!(!plan.preheat);
    }

    #[test]
    fn flags_override_config() {
        let config = RinzlerConfig {
            load: Some(LoadSection {
                interval_ms: Some(10),
                job_ms: Some(20),
                jobs: Some(30),
                preheat: Some(true),
            }),
            ..RinzlerConfig::default()
        };
        let args = LoadArgs {
            jobs: Some(5),
            ..LoadArgs::default()
        };
        let plan = LoadPlan::resolve(&config, &args);
        assert_eq!(plan.interval, Duration::from_millis(10));
        assert_eq!(plan.job, Duration::from_millis(20));
        assert_eq!(plan.jobs, 5);
        assert!(plan.preheat);
    }

    #[test]
    fn capacity_flag_never_drops_below_floor() {
        let args = LoadArgs {
            max_capacity: Some(0),
            cooling_delay_ms: Some(50),
            ..LoadArgs::default()
        };
        let engine = engine_config(&RinzlerConfig::default(), &args);
        assert_eq!(engine.max_capacity, engine.min_capacity);
        assert_eq!(engine.cooling_delay, Duration::from_millis(50));
    }

    #[test]
    fn busy_loop_reports_duration() {
        let routines = busy_loop();
        let out = (routines.work)(Payload::new(json!({ "ms": 5 }))).unwrap();
        assert_eq!(out.data["ms"], 5);
        assert!(out.data["spins"].as_u64().unwrap() > 0);
    }
}
