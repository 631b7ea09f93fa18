//! Application configuration for tractscore.
//!
//! User config lives at `~/.tractscore/tractscore.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, TractScoreError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "tractscore.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".tractscore";

// ---------------------------------------------------------------------------
// Config structs (matching tractscore.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduler policy.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Data and content locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Declarative source-mirror datasets.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// What the scheduler does with the rest of the concurrent set once a job fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Every submitted job runs to completion; the first failure is reported afterwards.
    #[default]
    CollectAll,
    /// Jobs that have not started yet are skipped after the first failure.
    /// Jobs already running still run to completion.
    FailFast,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker pool size for the concurrent set. `0` means one per CPU.
    #[serde(default)]
    pub parallelism: usize,

    /// Behavior of the concurrent set after a failure.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Run the memory-intensive set even when the concurrent set failed.
    #[serde(default)]
    pub sequential_after_failure: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            failure_policy: FailurePolicy::CollectAll,
            sequential_after_failure: false,
        }
    }
}

impl SchedulerConfig {
    /// Resolve `parallelism = 0` to the number of available CPUs.
    pub fn resolved_parallelism(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of downloaded inputs and generated artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Root of static content (export config, readme, documentation).
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,

    /// Export configuration file.
    #[serde(default = "default_export_config")]
    pub export_config: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            content_dir: default_content_dir(),
            export_config: default_export_config(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    "data".into()
}
fn default_content_dir() -> PathBuf {
    "content".into()
}
fn default_export_config() -> PathBuf {
    "content/config/export.toml".into()
}

/// Kind of remote data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A single file saved as-is.
    File,
    /// A zip archive extracted into a directory.
    Zip,
}

/// One remote source of a `[[datasets]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub url: Url,
    /// Destination relative to `paths.data_dir`.
    pub destination: PathBuf,
}

/// `[[datasets]]` entry: a dataset whose pipeline mirrors remote sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Unique dataset name.
    pub name: String,
    /// Run outside the concurrent pool.
    #[serde(default)]
    pub memory_intensive: bool,
    /// Selectable by name only; never part of "run all".
    #[serde(default)]
    pub standalone: bool,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.tractscore/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| TractScoreError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.tractscore/tractscore.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TractScoreError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        TractScoreError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_app_config(&config)?;
    Ok(config)
}

/// Reject duplicate dataset names.
pub fn validate_app_config(config: &AppConfig) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for dataset in &config.datasets {
        if dataset.name.trim().is_empty() {
            return Err(TractScoreError::config("dataset name must not be empty"));
        }
        if !seen.insert(dataset.name.as_str()) {
            return Err(TractScoreError::config(format!(
                "dataset `{}` is declared more than once",
                dataset.name
            )));
        }
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TractScoreError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TractScoreError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TractScoreError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("collect-all"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scheduler.parallelism, 0);
        assert_eq!(parsed.scheduler.failure_policy, FailurePolicy::CollectAll);
        assert!(!parsed.scheduler.sequential_after_failure);
    }

    #[test]
    fn config_with_datasets() {
        let toml_str = r#"
[scheduler]
parallelism = 2
failure_policy = "fail-fast"

[[datasets]]
name = "census_tracts"
memory_intensive = true

[[datasets.sources]]
kind = "zip"
url = "https://example.com/tracts.zip"
destination = "census/raw"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scheduler.resolved_parallelism(), 2);
        assert_eq!(config.scheduler.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.datasets.len(), 1);
        assert!(config.datasets[0].memory_intensive);
        assert_eq!(config.datasets[0].sources[0].kind, SourceKind::Zip);
    }

    #[test]
    fn zero_parallelism_resolves_to_cpus() {
        let config = SchedulerConfig::default();
        assert!(config.resolved_parallelism() >= 1);
    }

    #[test]
    fn duplicate_dataset_names_rejected() {
        let toml_str = r#"
[[datasets]]
name = "a"

[[datasets]]
name = "a"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let err = validate_app_config(&config).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("more than once"));
    }
}
