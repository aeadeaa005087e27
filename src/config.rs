//! User settings loaded from `config.toml`

use crate::paths;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_POLL_MS: u64 = 10;
const MAX_POLL_MS: u64 = 100;

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding frps/frpc `*.toml` configs
    pub config_dir: String,
    /// Backup directory; defaults to `<state>/backups`
    pub backup_dir: Option<String>,
    /// Services are named `<prefix>-<config stem>`
    pub service_prefix: String,
    /// Supervisor binary (systemctl-compatible CLI)
    pub supervisor: String,
    pub engine: EngineSettings,
    pub cache: CacheSettings,
    pub backup: BackupSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: "/etc/frp".to_string(),
            backup_dir: None,
            service_prefix: "moonfrp".to_string(),
            supervisor: "systemctl".to_string(),
            engine: EngineSettings::default(),
            cache: CacheSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub service_parallel: usize,
    pub probe_parallel: usize,
    pub service_timeout_secs: u64,
    pub probe_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            service_parallel: fleetkit::SERVICE_PARALLELISM,
            probe_parallel: fleetkit::PROBE_PARALLELISM,
            service_timeout_secs: 5,
            probe_timeout_ms: fleetkit::DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            poll_interval_ms: fleetkit::DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    /// How long a short-lived command waits for a background refresh before exiting
    pub settle_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 5,
            settle_secs: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Backups kept per config file
    pub keep: usize,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self { keep: 10 }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::settings_file()?)
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content =
            fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
        let mut settings: Self =
            toml::from_str(&content).with_context(|| format!("Invalid settings in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with; clamp the poll interval
    pub fn validate(&mut self) -> Result<()> {
        if self.engine.service_parallel == 0 {
            bail!("engine.service_parallel must be at least 1");
        }
        if self.engine.probe_parallel == 0 {
            bail!("engine.probe_parallel must be at least 1");
        }
        if self.engine.service_timeout_secs == 0 {
            bail!("engine.service_timeout_secs must be at least 1");
        }
        if self.engine.probe_timeout_ms == 0 {
            bail!("engine.probe_timeout_ms must be at least 1");
        }
        if self.service_prefix.trim().is_empty() {
            bail!("service_prefix must not be empty");
        }

        let clamped = self.engine.poll_interval_ms.clamp(MIN_POLL_MS, MAX_POLL_MS);
        if clamped != self.engine.poll_interval_ms {
            log::warn!(
                "engine.poll_interval_ms = {} out of range, using {clamped}",
                self.engine.poll_interval_ms
            );
            self.engine.poll_interval_ms = clamped;
        }
        Ok(())
    }

    /// Expanded config directory
    pub fn config_dir(&self) -> PathBuf {
        paths::expand(&self.config_dir)
    }

    /// Expanded backup directory, defaulting under the state directory
    pub fn backup_dir(&self, state: &Path) -> PathBuf {
        self.backup_dir
            .as_deref()
            .map_or_else(|| paths::default_backup_dir(state), paths::expand)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.engine.service_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.probe_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.engine.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.cache.settle_secs)
    }
}

// ============================================================================
// Tests
// ============================================================================
