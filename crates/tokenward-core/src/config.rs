//! Renewal configuration.
//!
//! Settings are read from `~/.config/tokenward/renewal.json` when present and
//! may be overridden through `TOKENWARD_*` environment variables (a `.env`
//! file is honoured). A loaded configuration is immutable; components take
//! it by value at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub(crate) const APP_NAME: &str = "tokenward";

/// Config file name
const CONFIG_FILE: &str = "renewal.json";

/// Renew when less than 5 minutes of lifetime remain.
const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;

/// 3 retries with exponential backoff usually rides out a blip without
/// keeping the user waiting.
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Upper bound of the random delay added to each backoff, as a fraction.
const MAX_JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    pub refresh_threshold_secs: u64,
    pub max_retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter: true,
        }
    }
}

impl RenewalConfig {
    /// Load from the default config file, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = Self::load_from(&path)?.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `TOKENWARD_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T>
        where
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .trim()
                .parse()
                .with_context(|| format!("Invalid value for {}: {:?}", key, value))
        }

        if let Some(v) = lookup("TOKENWARD_REFRESH_THRESHOLD_SECS") {
            self.refresh_threshold_secs = parse("TOKENWARD_REFRESH_THRESHOLD_SECS", v)?;
        }
        if let Some(v) = lookup("TOKENWARD_MAX_RETRY_ATTEMPTS") {
            self.max_retry_attempts = parse("TOKENWARD_MAX_RETRY_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("TOKENWARD_BACKOFF_BASE_MS") {
            self.backoff_base_ms = parse("TOKENWARD_BACKOFF_BASE_MS", v)?;
        }
        if let Some(v) = lookup("TOKENWARD_BACKOFF_MULTIPLIER") {
            self.backoff_multiplier = parse("TOKENWARD_BACKOFF_MULTIPLIER", v)?;
        }
        if let Some(v) = lookup("TOKENWARD_MAX_BACKOFF_MS") {
            self.max_backoff_ms = parse("TOKENWARD_MAX_BACKOFF_MS", v)?;
        }
        if let Some(v) = lookup("TOKENWARD_JITTER") {
            self.jitter = parse("TOKENWARD_JITTER", v)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            bail!(
                "backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if self.max_backoff_ms < self.backoff_base_ms {
            bail!(
                "max_backoff_ms ({}) must not be below backoff_base_ms ({})",
                self.max_backoff_ms,
                self.backoff_base_ms
            );
        }
        Ok(())
    }

    pub fn refresh_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.refresh_threshold_secs).unwrap_or(i64::MAX))
    }

    /// Delay before retry number `attempt + 1`: `base * multiplier^attempt`,
    /// capped at `max_backoff_ms`, plus up to 25% jitter when enabled.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.backoff_base_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64);
        let delay = Duration::from_millis(capped as u64);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.0..MAX_JITTER_FRACTION);
            delay + delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_jitter() -> RenewalConfig {
        RenewalConfig {
            jitter: false,
            ..RenewalConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RenewalConfig::default();
        assert_eq!(config.refresh_threshold_secs, 300);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.refresh_threshold(), chrono::Duration::minutes(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let config = no_jitter();
        assert_eq!(config.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(config.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(config.backoff_delay(3), Duration::from_millis(8000));
        assert_eq!(config.backoff_delay(10), Duration::from_millis(60_000));
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        let config = RenewalConfig::default();
        for _ in 0..100 {
            let delay = config.backoff_delay(1);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay < Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let shrinking = RenewalConfig {
            backoff_multiplier: 0.5,
            ..RenewalConfig::default()
        };
        assert!(shrinking.validate().is_err());

        let nan = RenewalConfig {
            backoff_multiplier: f64::NAN,
            ..RenewalConfig::default()
        };
        assert!(nan.validate().is_err());

        let inverted = RenewalConfig {
            backoff_base_ms: 5000,
            max_backoff_ms: 100,
            ..RenewalConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("TOKENWARD_REFRESH_THRESHOLD_SECS", "60"),
            ("TOKENWARD_MAX_RETRY_ATTEMPTS", " 5 "),
            ("TOKENWARD_JITTER", "false"),
        ]
        .into_iter()
        .collect();

        let config = RenewalConfig::default()
            .with_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.refresh_threshold_secs, 60);
        assert_eq!(config.max_retry_attempts, 5);
        assert!(!config.jitter);
        assert_eq!(config.backoff_base_ms, DEFAULT_BACKOFF_BASE_MS);
    }

    #[test]
    fn test_overrides_reject_garbage() {
        let result = RenewalConfig::default().with_overrides(|key| {
            (key == "TOKENWARD_BACKOFF_MULTIPLIER").then(|| "fast".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_file_round_trip_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        assert_eq!(RenewalConfig::load_from(&path).unwrap(), RenewalConfig::default());

        let config = RenewalConfig {
            refresh_threshold_secs: 120,
            ..no_jitter()
        };
        config.save_to(&path).unwrap();
        assert_eq!(RenewalConfig::load_from(&path).unwrap(), config);

        std::fs::write(&path, r#"{"max_retry_attempts": 7}"#).unwrap();
        let partial = RenewalConfig::load_from(&path).unwrap();
        assert_eq!(partial.max_retry_attempts, 7);
        assert_eq!(partial.refresh_threshold_secs, DEFAULT_REFRESH_THRESHOLD_SECS);
    }
}
