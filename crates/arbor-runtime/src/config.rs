//! Runtime configuration loading and management.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use arbor_bt::{BuildOptions, IdStrategy};
use serde::{Deserialize, Serialize};

use crate::scheduler::{SchedulerMode, StartOptions};

/// Main runtime configuration, loaded from .arbor/config.yaml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Config version
    pub version: Option<String>,

    pub builder: BuilderConfig,

    pub scheduler: SchedulerConfig,

    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Deepest allowed nesting after subtree references are resolved
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Most nodes a tree may expand to once subtree references are inlined
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,

    /// Derive missing node ids from type, name and position
    #[serde(default = "default_true")]
    pub deterministic_ids: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_nodes: default_max_nodes(),
            deterministic_ids: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub mode: SchedulerMode,

    /// Tick period in interval mode
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Stop after this many ticks
    #[serde(default)]
    pub max_ticks: Option<u64>,

    /// Stop once the root reports SUCCESS or FAILURE
    #[serde(default = "default_true")]
    pub stop_on_terminal: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: SchedulerMode::default(),
            interval_ms: default_interval_ms(),
            max_ticks: None,
            stop_on_terminal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are dropped
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_max_depth() -> usize {
    arbor_bt::DEFAULT_MAX_DEPTH
}
fn default_max_nodes() -> usize {
    arbor_bt::DEFAULT_MAX_NODES
}
fn default_true() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    100
}
fn default_event_capacity() -> usize {
    1024
}

impl RuntimeConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load from project root (looks for .arbor/config.yaml)
    pub fn load_from_project(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".arbor/config.yaml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            max_depth: self.builder.max_depth,
            max_nodes: self.builder.max_nodes,
            id_strategy: if self.builder.deterministic_ids {
                IdStrategy::Deterministic
            } else {
                IdStrategy::Random
            },
        }
    }

    pub fn start_options(&self) -> StartOptions {
        StartOptions {
            mode: self.scheduler.mode,
            interval: Duration::from_millis(self.scheduler.interval_ms),
            max_ticks: self.scheduler.max_ticks,
            stop_on_terminal: self.scheduler.stop_on_terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.builder.max_depth, 100);
        assert_eq!(config.events.capacity, 1024);
        assert!(config.scheduler.stop_on_terminal);
    }

    #[test]
    fn partial_yaml_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".arbor")).unwrap();
        std::fs::write(
            dir.path().join(".arbor/config.yaml"),
            "version: \"1\"\nscheduler:\n  mode: interval\n  interval_ms: 250\nbuilder:\n  deterministic_ids: false\n",
        )
        .unwrap();

        let config = RuntimeConfig::load_from_project(dir.path()).unwrap();
        assert_eq!(config.version.as_deref(), Some("1"));
        assert_eq!(config.builder.max_depth, 100);

        let start = config.start_options();
        assert_eq!(start.mode, SchedulerMode::Interval);
        assert_eq!(start.interval, Duration::from_millis(250));
        assert!(start.stop_on_terminal);
        assert_eq!(config.build_options().id_strategy, IdStrategy::Random);
    }

    #[test]
    fn malformed_yaml_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "scheduler: [not, a, map]").unwrap();
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.yaml"));
    }
}
