//! Temperature guards and the heat-up heuristic.
//!
//! Pure functions over counts and durations so the decisions can be
//! checked without a running pool.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Guard for adding `requested` workers.
pub fn check_heat_up(target: isize, requested: usize, max: usize) -> EngineResult<()> {
    if target + requested as isize > max as isize {
        return Err(EngineError::Overheat {
            target,
            requested,
            max,
        });
    }
    if target < 0 {
        return Err(EngineError::ShutDown);
    }
    Ok(())
}

/// Guard for removing `requested` workers, checked against the workers
/// that actually exist rather than the target.
pub fn check_cool_down(live: usize, requested: usize, min: usize) -> EngineResult<()> {
    if live < requested + min {
        return Err(EngineError::Underheat {
            live,
            requested,
            min,
        });
    }
    if live <= requested {
        return Err(EngineError::SubZero { live, requested });
    }
    Ok(())
}

/// Spawn when letting the least-busy queue drain would take longer than
/// starting a fresh worker.
pub fn should_heat_up(queued: usize, median_job: Duration, median_fork: Duration) -> bool {
    let waiting = median_job.saturating_mul(queued.min(u32::MAX as usize) as u32);
    waiting > median_fork
}
