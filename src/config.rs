// Configuration for watched calls and the background poller
//
// Settings can be tuned per declaring type without recompiling: a TOML file
// supplies defaults plus overrides keyed by the type name used as log scope.

use crate::error::ConfigError;
use crate::watchdog::WatchSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

impl WatchSettings {
    /// Reject non-positive limits; `target` names the settings in the error
    pub fn validate(&self, target: &str) -> std::result::Result<(), ConfigError> {
        if self.limit <= 0 {
            return Err(ConfigError::NonPositiveLimit {
                target: target.to_string(),
                limit: self.limit,
            });
        }
        Ok(())
    }
}

/// Monitor configuration
///
/// # Example TOML
/// ```toml
/// poll_interval_ms = 500
///
/// [defaults]
/// unit = "seconds"
/// limit = 2
///
/// [targets."app::Repo"]
/// unit = "milliseconds"
/// limit = 250
/// skip_args = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// How often the poller checks every live watchdog
    pub poll_interval_ms: u64,

    /// Settings for call sites without an override
    pub defaults: WatchSettings,

    /// Overrides keyed by declaring type
    pub targets: HashMap<String, WatchSettings>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            defaults: WatchSettings::default(),
            targets: HashMap::new(),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MonitorConfig =
            toml::from_str(content).context("Failed to parse monitor configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns error if the file is unreadable, is not valid TOML, or holds a
    /// non-positive limit or poll interval.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read monitor config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid monitor config: {}", path.as_ref().display()))
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        self.defaults.validate("defaults")?;
        for (target, settings) in &self.targets {
            settings.validate(target)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Settings for a declaring type, falling back to the defaults
    pub fn settings_for(&self, declaring_type: &str) -> WatchSettings {
        self.targets
            .get(declaring_type)
            .copied()
            .unwrap_or(self.defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_unit::TimeUnit;
    use std::io::Write;

    const SAMPLE: &str = r#"
poll_interval_ms = 250

[defaults]
unit = "seconds"
limit = 2

[targets."app::Repo"]
unit = "milliseconds"
limit = 300
skip_args = true
"#;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.defaults.unit, TimeUnit::Minutes);
        assert_eq!(config.defaults.limit, 1);
        assert!(!config.defaults.skip_args);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sample() {
        let config = MonitorConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.defaults, WatchSettings::new(TimeUnit::Seconds, 2));
        assert_eq!(
            config.settings_for("app::Repo"),
            WatchSettings::new(TimeUnit::Milliseconds, 300).skip_args(true)
        );
        assert_eq!(config.settings_for("app::Other"), config.defaults);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = MonitorConfig::from_toml_str("").unwrap();
        assert_eq!(config, MonitorConfig::default());
    }

    #[test]
    fn test_partial_settings_fill_from_default() {
        let config = MonitorConfig::from_toml_str("[defaults]\nlimit = 5\n").unwrap();
        assert_eq!(config.defaults.unit, TimeUnit::Minutes);
        assert_eq!(config.defaults.limit, 5);
    }

    #[test]
    fn test_non_positive_limit_fails_fast() {
        let err = MonitorConfig::from_toml_str("[targets.\"app::Slow\"]\nlimit = 0\n").unwrap_err();
        let config_err = err.downcast_ref::<ConfigError>().unwrap();
        assert_eq!(
            config_err,
            &ConfigError::NonPositiveLimit {
                target: "app::Slow".to_string(),
                limit: 0
            }
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = MonitorConfig::from_toml_str("poll_interval_ms = 0\n").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroPollInterval)
        );
    }

    #[test]
    fn test_huge_poll_interval_stays_huge() {
        let config = MonitorConfig {
            poll_interval_ms: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn test_invalid_toml() {
        let err = MonitorConfig::from_toml_str("poll_interval_ms = [").unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn test_from_missing_file() {
        let err = MonitorConfig::from_file("/nonexistent/overrun.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read monitor config"));
    }
}
