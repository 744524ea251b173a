use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::notifier::NotifierSettings;

pub const DEFAULT_NOTIFY_URL: &str = "http://127.0.0.1:5200/start_conversation";
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: f64 = 0.5;
pub const DEFAULT_AREA_THRESHOLD: f64 = 100_000.0;

pub const CONFIG_PATH_ENV: &str = "NOTIFIER_CONFIG";
pub const NOTIFY_URL_ENV: &str = "NOTIFY_URL";
pub const NOTIFY_TIMEOUT_ENV: &str = "NOTIFY_TIMEOUT";
pub const AREA_THRESHOLD_ENV: &str = "AREA_THRESHOLD";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NotifierConfigFile {
    notify_url: Option<String>,
    notify_timeout: Option<f64>,
    area_threshold: Option<f64>,
}

/// Command-line values that take precedence over the file and environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub notify_url: Option<String>,
    /// Seconds.
    pub notify_timeout: Option<f64>,
    pub area_threshold: Option<f64>,
}

/// Startup parameters. Immutable once the notifier is running.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierConfig {
    pub notify_url: String,
    /// Minimum spacing between successful notifications. Despite the name,
    /// this is not the HTTP request timeout, which is fixed.
    pub notify_timeout: Duration,
    pub area_threshold: f64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            notify_url: DEFAULT_NOTIFY_URL.to_string(),
            notify_timeout: Duration::from_secs_f64(DEFAULT_NOTIFY_TIMEOUT_SECS),
            area_threshold: DEFAULT_AREA_THRESHOLD,
        }
    }
}

impl NotifierConfig {
    /// Load from the file named by `NOTIFIER_CONFIG` (if set), then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|p| !p.trim().is_empty());
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// Load from an explicit file (or defaults), then apply environment
    /// overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => NotifierConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NotifierConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let notify_timeout = match file.notify_timeout {
            Some(secs) => seconds_to_duration(secs, "notify_timeout")?,
            None => defaults.notify_timeout,
        };
        Ok(Self {
            notify_url: file.notify_url.unwrap_or(defaults.notify_url),
            notify_timeout,
            area_threshold: file.area_threshold.unwrap_or(defaults.area_threshold),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var(NOTIFY_URL_ENV) {
            if !url.trim().is_empty() {
                self.notify_url = url.trim().to_string();
            }
        }
        if let Ok(timeout) = std::env::var(NOTIFY_TIMEOUT_ENV) {
            let secs: f64 = timeout
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a number of seconds", NOTIFY_TIMEOUT_ENV))?;
            self.notify_timeout = seconds_to_duration(secs, NOTIFY_TIMEOUT_ENV)?;
        }
        if let Ok(threshold) = std::env::var(AREA_THRESHOLD_ENV) {
            self.area_threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be a number", AREA_THRESHOLD_ENV))?;
        }
        Ok(())
    }

    /// Apply command-line overrides on top of the loaded values, then
    /// re-validate.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(url) = &overrides.notify_url {
            self.notify_url = url.trim().to_string();
        }
        if let Some(secs) = overrides.notify_timeout {
            self.notify_timeout = seconds_to_duration(secs, "--notify-timeout")?;
        }
        if let Some(threshold) = overrides.area_threshold {
            self.area_threshold = threshold;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.notify_url)
            .with_context(|| format!("invalid notify_url '{}'", self.notify_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "notify_url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if !self.area_threshold.is_finite() || self.area_threshold < 0.0 {
            return Err(anyhow!(
                "area_threshold must be a non-negative number, got {}",
                self.area_threshold
            ));
        }
        Ok(())
    }

    pub fn notifier_settings(&self) -> NotifierSettings {
        NotifierSettings {
            cooldown: self.notify_timeout,
            area_threshold: self.area_threshold,
        }
    }
}

pub fn seconds_to_duration(secs: f64, name: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a finite, non-negative number of seconds", name))
}

fn read_config_file(path: &Path) -> Result<NotifierConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
