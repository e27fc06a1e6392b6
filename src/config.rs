use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{
    adapter::state::StateStoreType,
    domain::{retry::Backoff, task::DEFAULT_MAX_RETRIES}
};

/// Runtime settings for the orchestrator
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub retry:   RetrySettings,
    pub timing:  TimingSettings,
    pub logging: LoggingSettings
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StateStoreType,
    /// RocksDB directory; defaults to `<data dir>/state` when unset
    pub path:    Option<PathBuf>
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { backend: StateStoreType::InMemory, path: None }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub backoff_base_ms:     u64,
    pub backoff_cap_ms:      u64,
    pub default_max_retries: u32
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { backoff_base_ms: 1_000, backoff_cap_ms: 60_000, default_max_retries: DEFAULT_MAX_RETRIES }
    }
}

impl RetrySettings {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(self.backoff_base_ms), Duration::from_millis(self.backoff_cap_ms))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TimingSettings {
    /// Period of the liveness re-check while a task is waiting
    pub liveness_interval_ms:  u64,
    /// Delay of the one-shot `continue` timer armed after an external event is accepted
    pub continuation_delay_ms: u64,
    /// Stand-in for the work of a task with no side effects
    pub work_delay_ms:         u64,
    pub call_timeout_ms:       u64
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self { liveness_interval_ms: 30_000, continuation_delay_ms: 100, work_delay_ms: 1_000, call_timeout_ms: 30_000 }
    }
}

impl TimingSettings {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn continuation_delay(&self) -> Duration {
        Duration::from_millis(self.continuation_delay_ms)
    }

    pub fn work_delay(&self) -> Duration {
        Duration::from_millis(self.work_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub json:  bool
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl Settings {
    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.retry.backoff_base_ms > 0, "retry.backoff_base_ms must be positive");
        anyhow::ensure!(
            self.retry.backoff_cap_ms >= self.retry.backoff_base_ms,
            "retry.backoff_cap_ms must not be below retry.backoff_base_ms"
        );
        anyhow::ensure!(self.timing.liveness_interval_ms > 0, "timing.liveness_interval_ms must be positive");
        anyhow::ensure!(self.timing.call_timeout_ms > 0, "timing.call_timeout_ms must be positive");
        Ok(())
    }

    /// Storage path, falling back to the platform data directory
    pub fn storage_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_project_dirs()?.data_dir().join("state"))
        }
    }
}

/// Get the project directories for cross-platform config path resolution
pub fn get_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "taskflow").context("Failed to determine project directories")
}

/// Get the config file path
pub fn get_config_file_path() -> Result<PathBuf> {
    Ok(get_project_dirs()?.config_dir().join("config.yaml"))
}

/// Load settings from `path`, or from the platform config file which is created with defaults if missing
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => get_config_file_path()?
    };

    let settings = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
    } else if path.is_some() {
        anyhow::bail!("Config file not found: {}", config_path.display());
    } else {
        let settings = Settings::default();
        save_settings(&settings, &config_path)?;
        settings
    };

    settings.validate()?;
    Ok(settings)
}

/// Save settings to file
pub fn save_settings(settings: &Settings, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let content = serde_yaml::to_string(settings).context("Failed to serialize settings")?;
    fs::write(config_path, content)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    Ok(())
}
