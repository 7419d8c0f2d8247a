use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::metrics::{MetricEntry, MetricProfile, Topology};
use crate::pmu::WireFormat;

/// Top-level configuration for a pmuscope run.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Capture files and per-device lookup tables.
    #[serde(default)]
    pub input: InputConfig,

    /// Hardware topology used for time derivation.
    #[serde(default)]
    pub topology: Topology,

    /// Metric selection.
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Maximum number of devices processed concurrently. Default: 4.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Output sink configuration.
    #[serde(default)]
    pub sinks: SinksConfig,
}

/// Input discovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    /// Directory holding one `device_<id>` subdirectory per device.
    #[serde(default)]
    pub root: PathBuf,

    /// Wire format of the capture files: "legacy" or "unified".
    #[serde(default = "default_format")]
    pub format: String,

    /// Capture file name prefix; files are `<prefix>.<n>`. Default: "pmu.data".
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Host task map file name inside each device directory.
    #[serde(default = "default_host_task_map")]
    pub host_task_map: String,

    /// Task shape file name inside each device directory.
    #[serde(default = "default_task_shapes")]
    pub task_shapes: String,

    /// Restrict processing to these device ids. Empty means all.
    #[serde(default)]
    pub devices: Vec<u32>,
}

/// Metric profile configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Built-in profile name. Default: "pipe_utilization".
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Replaces the preset's AIC metrics when set.
    #[serde(default)]
    pub aic_metrics: Option<Vec<MetricEntry>>,

    /// Replaces the preset's AIV metrics when set.
    #[serde(default)]
    pub aiv_metrics: Option<Vec<MetricEntry>>,
}

/// Output sink configuration.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct SinksConfig {
    /// Newline-delimited JSON files, one per device.
    #[serde(default)]
    pub ndjson: NdjsonConfig,

    /// ClickHouse tables, one per device.
    #[serde(default)]
    pub clickhouse: ClickHouseConfig,
}

/// NDJSON file sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NdjsonConfig {
    /// Enable the NDJSON sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Root directory for output files.
    #[serde(default)]
    pub output_dir: PathBuf,

    /// Output file stem. Default: "ai_core_metrics".
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// "none" or "gzip". Default: "none".
    #[serde(default = "default_compression")]
    pub compression: String,
}

/// ClickHouse connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClickHouseConfig {
    /// Enable the ClickHouse sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// ClickHouse native protocol address (host:port).
    #[serde(default)]
    pub endpoint: String,

    /// Target database name. Default: "default".
    #[serde(default = "default_database")]
    pub database: String,

    /// Table name prefix; each device writes `<table>_device_<id>`.
    /// Default: "ai_core_metrics".
    #[serde(default = "default_table")]
    pub table: String,

    /// Number of rows per INSERT. Default: 10000.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// ClickHouse username.
    #[serde(default)]
    pub username: String,

    /// ClickHouse password.
    #[serde(default)]
    pub password: String,
}

fn default_workers() -> usize {
    4
}

fn default_format() -> String {
    "unified".to_string()
}

fn default_file_prefix() -> String {
    "pmu.data".to_string()
}

fn default_host_task_map() -> String {
    "host_task_map.json".to_string()
}

fn default_task_shapes() -> String {
    "task_shapes.json".to_string()
}

fn default_preset() -> String {
    "pipe_utilization".to_string()
}

fn default_file_name() -> String {
    "ai_core_metrics".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_table() -> String {
    "ai_core_metrics".to_string()
}

fn default_batch_size() -> usize {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            topology: Topology::default(),
            profile: ProfileConfig::default(),
            workers: default_workers(),
            sinks: SinksConfig::default(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            format: default_format(),
            file_prefix: default_file_prefix(),
            host_task_map: default_host_task_map(),
            task_shapes: default_task_shapes(),
            devices: Vec::new(),
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            preset: default_preset(),
            aic_metrics: None,
            aiv_metrics: None,
        }
    }
}

impl Default for NdjsonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: PathBuf::new(),
            file_name: default_file_name(),
            compression: default_compression(),
        }
    }
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            database: default_database(),
            table: default_table(),
            batch_size: default_batch_size(),
            username: String::new(),
            password: String::new(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.input.root.as_os_str().is_empty() {
            bail!("input.root is required");
        }

        self.wire_format()?;

        if self.input.file_prefix.is_empty() {
            bail!("input.file_prefix must not be empty");
        }
        if self.input.host_task_map.is_empty() {
            bail!("input.host_task_map must not be empty");
        }
        if self.input.task_shapes.is_empty() {
            bail!("input.task_shapes must not be empty");
        }

        let freq = self.topology.frequency_mhz;
        if !freq.is_finite() || freq < 0.0 {
            bail!("topology.frequency_mhz must be a non-negative number, got {freq}");
        }

        self.metric_profile().context("invalid profile")?;

        if self.workers == 0 {
            bail!("workers must be positive");
        }

        if !self.sinks.ndjson.enabled && !self.sinks.clickhouse.enabled {
            bail!("at least one of sinks.ndjson or sinks.clickhouse must be enabled");
        }

        if self.sinks.ndjson.enabled {
            if self.sinks.ndjson.output_dir.as_os_str().is_empty() {
                bail!("sinks.ndjson.output_dir is required when enabled");
            }
            if self.sinks.ndjson.file_name.is_empty() {
                bail!("sinks.ndjson.file_name must not be empty");
            }

            let compression = &self.sinks.ndjson.compression;
            match compression.as_str() {
                "none" | "gzip" => {}
                _ => bail!("invalid sinks.ndjson.compression: {compression}"),
            }
        }

        if self.sinks.clickhouse.enabled {
            if self.sinks.clickhouse.endpoint.is_empty() {
                bail!("sinks.clickhouse.endpoint is required when enabled");
            }
            if self.sinks.clickhouse.batch_size == 0 {
                bail!("sinks.clickhouse.batch_size must be positive");
            }
            for (key, ident) in [
                ("database", &self.sinks.clickhouse.database),
                ("table", &self.sinks.clickhouse.table),
            ] {
                if !is_identifier(ident) {
                    bail!("sinks.clickhouse.{key} must be [A-Za-z0-9_]+: {ident:?}");
                }
            }
        }

        Ok(())
    }

    /// Parsed `input.format`.
    pub fn wire_format(&self) -> Result<WireFormat> {
        match WireFormat::from_name(&self.input.format) {
            Some(f) => Ok(f),
            None => bail!("invalid input.format: {}", self.input.format),
        }
    }

    /// Metric profile resolved from `profile`.
    pub fn metric_profile(&self) -> Result<MetricProfile> {
        MetricProfile::build(
            &self.profile.preset,
            self.profile.aic_metrics.as_deref(),
            self.profile.aiv_metrics.as_deref(),
        )
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
