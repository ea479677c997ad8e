//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// What to do when a window holds a location the catalog does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownLocationPolicy {
    /// Stop the run with `UnknownLocation`
    #[default]
    Fail,
    /// Log and count the location, keep aggregating the rest
    Skip,
}

impl UnknownLocationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnknownLocationPolicy::Fail => "fail",
            UnknownLocationPolicy::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Stdin,
    File,
    Tcp,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Stdin => "stdin",
            SourceKind::File => "file",
            SourceKind::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Total wall-clock seconds to process events
    pub duration_secs: u64,
    /// Wall-clock seconds per aggregation window
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AggregationConfig {
    #[serde(default)]
    pub on_unknown_location: UnknownLocationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Path to the locations JSON file
    pub file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// JSONL event file (kind = "file")
    #[serde(default)]
    pub path: Option<String>,
    /// TCP port for event producers (kind = "tcp")
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Bounded ingest channel capacity (kind = "tcp")
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Stdin,
            path: None,
            listen_port: default_listen_port(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_listen_port() -> u16 {
    7878
}

fn default_channel_capacity() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// JSONL file for per-location window averages
    #[serde(default = "default_averaged_file")]
    pub averaged_file: String,
    /// JSONL file for sensor-wide window averages
    #[serde(default = "default_sensors_file")]
    pub sensors_file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_egress_enabled(),
            averaged_file: default_averaged_file(),
            sensors_file: default_sensors_file(),
        }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_averaged_file() -> String {
    "output/averaged_events.jsonl".to_string()
}

fn default_sensors_file() -> String {
    "output/sensors_average.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_log_summary")]
    pub log_summary: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { log_summary: default_log_summary() }
    }
}

fn default_log_summary() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub run: RunConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    run_secs: u64,
    window_secs: u64,
    unknown_location: UnknownLocationPolicy,
    catalog_file: String,
    source_kind: SourceKind,
    source_path: Option<String>,
    listen_port: u16,
    channel_capacity: usize,
    egress_enabled: bool,
    averaged_file: String,
    sensors_file: String,
    log_metrics_summary: bool,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run_secs: 60,
            window_secs: 30,
            unknown_location: UnknownLocationPolicy::Fail,
            catalog_file: "data/locations.json".to_string(),
            source_kind: SourceKind::Stdin,
            source_path: None,
            listen_port: default_listen_port(),
            channel_capacity: default_channel_capacity(),
            egress_enabled: true,
            averaged_file: default_averaged_file(),
            sensors_file: default_sensors_file(),
            log_metrics_summary: true,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        anyhow::ensure!(
            toml_config.source.channel_capacity > 0,
            "source.channel_capacity must be at least 1 in {}",
            path.display()
        );

        Ok(Self {
            run_secs: toml_config.run.duration_secs,
            window_secs: toml_config.run.window_secs,
            unknown_location: toml_config.aggregation.on_unknown_location,
            catalog_file: toml_config.catalog.file,
            source_kind: toml_config.source.kind,
            source_path: toml_config.source.path,
            listen_port: toml_config.source.listen_port,
            channel_capacity: toml_config.source.channel_capacity,
            egress_enabled: toml_config.egress.enabled,
            averaged_file: toml_config.egress.averaged_file,
            sensors_file: toml_config.egress.sensors_file,
            log_metrics_summary: toml_config.metrics.log_summary,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    pub fn run_secs(&self) -> u64 {
        self.run_secs
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    pub fn unknown_location(&self) -> UnknownLocationPolicy {
        self.unknown_location
    }

    pub fn catalog_file(&self) -> &str {
        &self.catalog_file
    }

    pub fn source_kind(&self) -> &SourceKind {
        &self.source_kind
    }

    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn averaged_file(&self) -> &str {
        &self.averaged_file
    }

    pub fn sensors_file(&self) -> &str {
        &self.sensors_file
    }

    pub fn log_metrics_summary(&self) -> bool {
        self.log_metrics_summary
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Override the run duration (CLI)
    pub fn with_run_secs(mut self, secs: u64) -> Self {
        self.run_secs = secs;
        self
    }

    /// Override the window duration (CLI)
    pub fn with_window_secs(mut self, secs: u64) -> Self {
        self.window_secs = secs;
        self
    }

    /// Read events from a JSONL file instead of the configured source (CLI)
    pub fn with_source_path(mut self, path: &str) -> Self {
        self.source_kind = SourceKind::File;
        self.source_path = Some(path.to_string());
        self
    }

    /// Override the catalog location (CLI)
    pub fn with_catalog_file(mut self, path: &str) -> Self {
        self.catalog_file = path.to_string();
        self
    }
}
