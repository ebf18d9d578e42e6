// Run Configuration - options recognised by every test run
// Validation happens here, at the boundary, before any pipeline task starts.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error::HarnessError;
use crate::generators::GeneratorSpec;
use crate::types::CollectionStats;

/// How many transforms may be in flight at once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerOption {
    /// Exactly this many workers
    Fixed(u32),
    /// Up to this many workers
    Range(u32),
}

impl WorkerOption {
    /// Concurrency limit this option resolves to
    pub fn value(&self) -> u32 {
        match self {
            WorkerOption::Fixed(workers) => *workers,
            WorkerOption::Range(max_workers) => *max_workers,
        }
    }
}

impl Default for WorkerOption {
    fn default() -> Self {
        WorkerOption::Fixed(1)
    }
}

fn default_interval_seconds() -> u64 {
    1
}

/// Options of one test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    /// Maximum number of items to produce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Wall-clock cutoff for production
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub workers: WorkerOption,
    #[serde(default = "default_interval_seconds")]
    pub stats_collection_interval_seconds: u64,
    /// Generator resume position
    #[serde(default)]
    pub start_offset: u64,
    /// Pass-through flag for bulk operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    /// Pass-through batch size for bulk operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    /// Wait before each transform starts
    #[serde(default)]
    pub delay_millis: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            limit: None,
            timeout_seconds: None,
            workers: WorkerOption::default(),
            stats_collection_interval_seconds: default_interval_seconds(),
            start_offset: 0,
            ordered: None,
            batch_size: None,
            delay_millis: 0,
        }
    }
}

impl TestConfig {
    /// Check the configuration before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.limit.is_none() && self.timeout_seconds.is_none() {
            bail!(HarnessError::configuration(
                "limit/timeoutSeconds",
                "at least one of limit or timeoutSeconds must be set",
            ));
        }
        if self.timeout_seconds == Some(0) {
            bail!(HarnessError::configuration(
                "timeoutSeconds",
                "timeout must be greater than zero",
            ));
        }
        if self.stats_collection_interval_seconds == 0 {
            bail!(HarnessError::configuration(
                "statsCollectionIntervalSeconds",
                "interval must be positive",
            ));
        }
        if self.workers.value() == 0 {
            bail!(HarnessError::configuration(
                "workers",
                "at least one worker is required",
            ));
        }
        Ok(())
    }

    /// Window size of the statistics pipeline
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.stats_collection_interval_seconds)
    }

    /// Wall-clock cutoff, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Per-item start delay
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_millis)
    }

    /// Concurrency limit as a buffer size
    pub fn concurrency(&self) -> usize {
        self.workers.value() as usize
    }

    /// Pass-through ordering flag; bulk operations refuse to run without it
    pub fn require_ordered(&self) -> Result<bool> {
        match self.ordered {
            Some(ordered) => Ok(ordered),
            None => bail!(HarnessError::configuration("ordered", "'ordered' config not set")),
        }
    }

    /// Load and validate a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TestConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

/// Fluent builder for a validated [`TestConfig`]
#[derive(Debug, Default)]
pub struct TestConfigBuilder {
    config: TestConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.config.limit = Some(limit);
        self
    }

    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.config.timeout_seconds = Some(seconds);
        self
    }

    pub fn workers(mut self, workers: WorkerOption) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn stats_collection_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.stats_collection_interval_seconds = seconds;
        self
    }

    pub fn start_offset(mut self, offset: u64) -> Self {
        self.config.start_offset = offset;
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.config.ordered = Some(ordered);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.config.batch_size = Some(batch_size);
        self
    }

    pub fn delay_millis(mut self, millis: u64) -> Self {
        self.config.delay_millis = millis;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<TestConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A named, self-describing test run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDefinition {
    pub name: String,
    pub description: String,
    #[serde(default = "Utc::now")]
    pub start_time: DateTime<Utc>,
    pub generator: GeneratorSpec,
    pub config: TestConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_stats: Option<CollectionStats>,
}

impl TestDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        generator: GeneratorSpec,
        config: TestConfig,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            start_time: Utc::now(),
            generator,
            config,
            tags: None,
            collection_stats: None,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Pretty JSON rendering, logged when the run starts
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
