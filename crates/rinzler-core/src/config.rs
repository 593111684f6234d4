//! rinzler.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay before an idle worker is cooled down.
pub const DEFAULT_COOLING_DELAY: Duration = Duration::from_millis(4000);

/// Default capacity of the rolling job-time and fork-latency samples.
pub const DEFAULT_SAMPLE_BACKLOG: usize = 20;

/// Smallest pool the engine keeps while running.
pub const MIN_CAPACITY: usize = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RinzlerConfig {
    pub engine: Option<EngineSection>,
    pub load: Option<LoadSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub max_capacity: Option<usize>,
    pub cooling_delay_ms: Option<u64>,
    pub sample_backlog: Option<usize>,
}

/// Synthetic load used by the `rinzler` binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadSection {
    pub interval_ms: Option<u64>,
    pub job_ms: Option<u64>,
    pub jobs: Option<u64>,
    pub preheat: Option<bool>,
}

impl RinzlerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RinzlerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with every default spelled out.
    pub fn scaffold() -> Self {
        RinzlerConfig {
            engine: Some(EngineSection {
                max_capacity: Some(default_max_capacity()),
                cooling_delay_ms: Some(DEFAULT_COOLING_DELAY.as_millis() as u64),
                sample_backlog: Some(DEFAULT_SAMPLE_BACKLOG),
            }),
            load: Some(LoadSection {
                interval_ms: Some(100),
                job_ms: Some(250),
                jobs: Some(100),
                preheat: Some(false),
            }),
        }
    }

    /// Resolve the engine section into runtime settings.
    pub fn engine_config(&self) -> EngineConfig {
        let section = self.engine.clone().unwrap_or_default();
        let defaults = EngineConfig::default();
        EngineConfig {
            max_capacity: section.max_capacity.unwrap_or(defaults.max_capacity),
            min_capacity: MIN_CAPACITY,
            cooling_delay: section
                .cooling_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cooling_delay),
            sample_backlog: section
                .sample_backlog
                .unwrap_or(defaults.sample_backlog)
                .max(1),
        }
    }
}

/// Settings the engine runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity ceiling. Can be moved at runtime with `afterburner`.
    pub max_capacity: usize,
    /// Capacity floor.
    pub min_capacity: usize,
    /// How long a worker must stay idle before it is cooled down.
    pub cooling_delay: Duration,
    /// Samples kept for job-time and fork-latency medians.
    pub sample_backlog: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            min_capacity: MIN_CAPACITY,
            cooling_delay: DEFAULT_COOLING_DELAY,
            sample_backlog: DEFAULT_SAMPLE_BACKLOG,
        }
    }
}

/// Host concurrency hint: one core is left to the caller, floor 1.
pub fn default_max_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold_round_trips_through_toml() {
        let config = RinzlerConfig::scaffold();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("cooling_delay_ms = 4000"));

        let parsed: RinzlerConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.engine_config().sample_backlog, 20);
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: RinzlerConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_parse_partial_engine_section() {
        let toml_str = r#"
[engine]
max_capacity = 3
cooling_delay_ms = 50
"#;
        let config: RinzlerConfig = toml::from_str(toml_str).unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.max_capacity, 3);
        assert_eq!(engine.min_capacity, 1);
        assert_eq!(engine.cooling_delay, Duration::from_millis(50));
        assert_eq!(engine.sample_backlog, DEFAULT_SAMPLE_BACKLOG);
    }

    #[test]
    fn test_zero_backlog_is_clamped() {
        let toml_str = "[engine]\nsample_backlog = 0\n";
        let config: RinzlerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine_config().sample_backlog, 1);
    }

    #[test]
    fn test_default_max_capacity_is_at_least_one() {
        assert!(default_max_capacity() >= 1);
    }

    #[test]
    fn test_from_file_missing_path_fails() {
        let result = RinzlerConfig::from_file(Path::new("/nonexistent/rinzler.toml"));
        assert!(result.is_err());
    }
}
