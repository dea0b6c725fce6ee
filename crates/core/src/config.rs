use crate::{
    error::{CoreError, Result},
    model::{MetricType, OutputFormat},
};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sampling interval in milliseconds
    pub interval_ms: u64,

    /// Run length in seconds; `None` runs until interrupted
    pub duration_secs: Option<u64>,

    /// Persistence backend
    pub format: OutputFormat,

    /// Directory the per-run output directory is created in
    pub output_dir: PathBuf,

    /// Metric types to record; empty means all of them
    pub metrics: Vec<MetricType>,

    /// Measurements buffered between a sampler and its sink
    pub channel_capacity: usize,

    /// Longest a single provider call may take before the tick is skipped
    pub provider_timeout_ms: u64,

    /// Time each shutdown phase may take
    pub shutdown_grace_ms: u64,

    /// Consecutive write failures after which a sink is reported unhealthy
    pub sink_failure_limit: u32,

    /// Stop the run when a sink is reported unhealthy
    pub fail_on_sink_error: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            duration_secs: None,
            format: OutputFormat::Csv,
            output_dir: PathBuf::from("."),
            metrics: Vec::new(),
            channel_capacity: 64,
            provider_timeout_ms: 800,
            shutdown_grace_ms: 5000,
            sink_failure_limit: 10,
            fail_on_sink_error: false,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources in order of preference:
    /// 1. CLI arguments override everything
    /// 2. JSON config file if specified
    /// 3. Default config file locations
    /// 4. Built-in defaults
    pub fn load(cli_config: Option<&CliConfig>, json_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(default_config) = Self::load_default_config()? {
            config = default_config;
        }

        if let Some(path) = json_path {
            config = Self::load_from_file(path)?;
        }

        if let Some(cli) = cli_config {
            config.apply_cli_overrides(cli)?;
        }

        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific JSON file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CoreError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            CoreError::config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        Ok(config)
    }

    fn load_default_config() -> Result<Option<Self>> {
        for path in Self::default_config_paths() {
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(Some(config)),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                        continue;
                    }
                }
            }
        }

        Ok(None)
    }

    /// Get default configuration file search paths
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("stattrack").join("config.json"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".stattrack.json"));
        }

        paths.push(PathBuf::from("stattrack.json"));

        paths
    }

    fn apply_cli_overrides(&mut self, cli: &CliConfig) -> Result<()> {
        if let Some(interval) = cli.interval_ms {
            self.interval_ms = interval;
            // Keep the provider timeout inside a shorter interval.
            if self.provider_timeout_ms >= interval {
                self.provider_timeout_ms = (interval / 5 * 4).max(1);
            }
        }
        if let Some(secs) = cli.duration_secs {
            // Negative durations mean "until interrupted".
            self.duration_secs = u64::try_from(secs).ok();
        }
        if let Some(format) = &cli.format {
            self.format = format.parse()?;
        }
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
        if !cli.metrics.is_empty() {
            self.metrics = cli
                .metrics
                .iter()
                .map(|m| m.parse())
                .collect::<Result<Vec<MetricType>>>()?;
        }
        Ok(())
    }

    /// Collapse the metric selection to a sorted, duplicate-free list.
    fn normalize(&mut self) {
        if self.metrics.is_empty() {
            self.metrics = MetricType::ALL.to_vec();
        }
        self.metrics.sort();
        self.metrics.dedup();
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms < 10 {
            return Err(CoreError::config("Sampling interval must be at least 10ms"));
        }

        if self.interval_ms > 3_600_000 {
            return Err(CoreError::config("Sampling interval must be at most one hour"));
        }

        if self.provider_timeout_ms == 0 || self.provider_timeout_ms >= self.interval_ms {
            return Err(CoreError::config(format!(
                "Provider timeout must be between 1ms and the sampling interval ({}ms)",
                self.interval_ms
            )));
        }

        if self.channel_capacity == 0 {
            return Err(CoreError::config("Channel capacity must be at least 1"));
        }

        if self.shutdown_grace_ms == 0 {
            return Err(CoreError::config("Shutdown grace period must be positive"));
        }

        if self.sink_failure_limit == 0 {
            return Err(CoreError::config("Sink failure limit must be at least 1"));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Metric types to record, with the empty selection expanded.
    pub fn selected_metrics(&self) -> Vec<MetricType> {
        if self.metrics.is_empty() {
            MetricType::ALL.to_vec()
        } else {
            self.metrics.clone()
        }
    }
}

/// CLI configuration (raw values, parsed during [`Config::load`])
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub interval_ms: Option<u64>,
    pub duration_secs: Option<i64>,
    pub format: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub metrics: Vec<String>,
}
