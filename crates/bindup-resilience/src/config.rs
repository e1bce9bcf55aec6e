//! Engine configuration.
//!
//! Every stage carries its own short timeout instead of one global budget.
//! Values are stored in milliseconds so YAML files stay readable; the
//! `Duration` accessors are what the components use.

use crate::result::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-attempt budget for the retry executor
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default popup polling interval (500ms)
pub const DEFAULT_POPUP_INTERVAL_MS: u64 = 500;

/// Default popup visibility check timeout (100ms)
pub const DEFAULT_POPUP_MATCH_TIMEOUT_MS: u64 = 100;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "BINDUP_";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget for a special-case route sub-routine
    pub special_route_timeout_ms: u64,
    /// Budget for one selector candidate lookup
    pub candidate_timeout_ms: u64,
    /// Budget for one text-variation lookup
    pub variation_timeout_ms: u64,
    /// Budget for one role lookup
    pub role_timeout_ms: u64,
    /// How long to wait for a hover to reveal a hidden control
    pub reveal_wait_ms: u64,
    /// Attempts used when the caller does not pass a budget
    pub default_max_attempts: u32,
    /// Pause between retry attempts
    pub retry_delay_ms: u64,
    /// Optional cap on a single retry attempt
    pub attempt_timeout_ms: Option<u64>,
    /// Popup polling interval
    pub popup_interval_ms: u64,
    /// Popup container visibility check timeout
    pub popup_match_timeout_ms: u64,
    /// Per dismiss-control lookup timeout
    pub popup_dismiss_timeout_ms: u64,
    /// Budget for one verification
    pub verify_timeout_ms: u64,
    /// Where terminal-failure screenshots go (None = disabled)
    pub screenshot_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            special_route_timeout_ms: 10_000,
            candidate_timeout_ms: 5_000,
            variation_timeout_ms: 3_000,
            role_timeout_ms: 3_000,
            reveal_wait_ms: 2_000,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 0,
            attempt_timeout_ms: None,
            popup_interval_ms: DEFAULT_POPUP_INTERVAL_MS,
            popup_match_timeout_ms: DEFAULT_POPUP_MATCH_TIMEOUT_MS,
            popup_dismiss_timeout_ms: 300,
            verify_timeout_ms: 5_000,
            screenshot_dir: None,
        }
    }
}

impl EngineConfig {
    /// Create config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a YAML document; missing keys keep their defaults
    pub fn from_yaml_str(yaml: &str) -> EngineResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Apply `BINDUP_*` environment variables on top of this config
    pub fn apply_env_overrides(self) -> EngineResult<Self> {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from an arbitrary lookup (keys without the prefix)
    pub fn apply_overrides<F>(mut self, lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ms = |key: &str| -> EngineResult<Option<u64>> {
            lookup(key)
                .map(|raw| {
                    raw.trim().parse::<u64>().map_err(|_| {
                        EngineError::config(format!("{ENV_PREFIX}{key} must be an integer, got {raw:?}"))
                    })
                })
                .transpose()
        };

        if let Some(v) = ms("SPECIAL_ROUTE_TIMEOUT_MS")? {
            self.special_route_timeout_ms = v;
        }
        if let Some(v) = ms("CANDIDATE_TIMEOUT_MS")? {
            self.candidate_timeout_ms = v;
        }
        if let Some(v) = ms("VARIATION_TIMEOUT_MS")? {
            self.variation_timeout_ms = v;
        }
        if let Some(v) = ms("ROLE_TIMEOUT_MS")? {
            self.role_timeout_ms = v;
        }
        if let Some(v) = ms("REVEAL_WAIT_MS")? {
            self.reveal_wait_ms = v;
        }
        if let Some(v) = ms("MAX_ATTEMPTS")? {
            self.default_max_attempts = u32::try_from(v)
                .map_err(|_| EngineError::config("BINDUP_MAX_ATTEMPTS out of range"))?;
        }
        if let Some(v) = ms("RETRY_DELAY_MS")? {
            self.retry_delay_ms = v;
        }
        if let Some(v) = ms("ATTEMPT_TIMEOUT_MS")? {
            self.attempt_timeout_ms = Some(v);
        }
        if let Some(v) = ms("POPUP_INTERVAL_MS")? {
            self.popup_interval_ms = v;
        }
        if let Some(v) = ms("POPUP_MATCH_TIMEOUT_MS")? {
            self.popup_match_timeout_ms = v;
        }
        if let Some(v) = ms("POPUP_DISMISS_TIMEOUT_MS")? {
            self.popup_dismiss_timeout_ms = v;
        }
        if let Some(v) = ms("VERIFY_TIMEOUT_MS")? {
            self.verify_timeout_ms = v;
        }
        if let Some(dir) = lookup("SCREENSHOT_DIR") {
            self.screenshot_dir = (!dir.trim().is_empty()).then(|| PathBuf::from(dir));
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> EngineResult<()> {
        if self.default_max_attempts == 0 {
            return Err(EngineError::config("default_max_attempts must be at least 1"));
        }
        if self.popup_interval_ms == 0 {
            return Err(EngineError::config("popup_interval_ms must be positive"));
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(EngineError::config("attempt_timeout_ms must be positive when set"));
        }
        Ok(())
    }

    /// Set the per-candidate timeout
    #[must_use]
    pub const fn with_candidate_timeout(mut self, timeout_ms: u64) -> Self {
        self.candidate_timeout_ms = timeout_ms;
        self
    }

    /// Set the special-route timeout
    #[must_use]
    pub const fn with_special_route_timeout(mut self, timeout_ms: u64) -> Self {
        self.special_route_timeout_ms = timeout_ms;
        self
    }

    /// Set the hover reveal wait
    #[must_use]
    pub const fn with_reveal_wait(mut self, wait_ms: u64) -> Self {
        self.reveal_wait_ms = wait_ms;
        self
    }

    /// Set the default attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts;
        self
    }

    /// Set the pause between attempts
    #[must_use]
    pub const fn with_retry_delay(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = delay_ms;
        self
    }

    /// Cap each attempt's duration
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout_ms: u64) -> Self {
        self.attempt_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the popup polling interval
    #[must_use]
    pub const fn with_popup_interval(mut self, interval_ms: u64) -> Self {
        self.popup_interval_ms = interval_ms;
        self
    }

    /// Set the verification budget
    #[must_use]
    pub const fn with_verify_timeout(mut self, timeout_ms: u64) -> Self {
        self.verify_timeout_ms = timeout_ms;
        self
    }

    /// Enable failure screenshots into a directory
    #[must_use]
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn special_route_timeout(&self) -> Duration {
        Duration::from_millis(self.special_route_timeout_ms)
    }

    #[must_use]
    pub const fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }

    #[must_use]
    pub const fn variation_timeout(&self) -> Duration {
        Duration::from_millis(self.variation_timeout_ms)
    }

    #[must_use]
    pub const fn role_timeout(&self) -> Duration {
        Duration::from_millis(self.role_timeout_ms)
    }

    #[must_use]
    pub const fn reveal_wait(&self) -> Duration {
        Duration::from_millis(self.reveal_wait_ms)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn popup_interval(&self) -> Duration {
        Duration::from_millis(self.popup_interval_ms)
    }

    #[must_use]
    pub const fn popup_match_timeout(&self) -> Duration {
        Duration::from_millis(self.popup_match_timeout_ms)
    }

    #[must_use]
    pub const fn popup_dismiss_timeout(&self) -> Duration {
        Duration::from_millis(self.popup_dismiss_timeout_ms)
    }

    #[must_use]
    pub const fn verify_timeout(&self) -> Duration {
        Duration::from_millis(self.verify_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_attempts, 3);
        assert_eq!(config.popup_interval(), Duration::from_millis(500));
        assert_eq!(config.popup_match_timeout(), Duration::from_millis(100));
        assert!(config.screenshot_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_candidate_timeout(2_000)
            .with_max_attempts(5)
            .with_attempt_timeout(750)
            .with_screenshot_dir("target/shots");
        assert_eq!(config.candidate_timeout(), Duration::from_secs(2));
        assert_eq!(config.default_max_attempts, 5);
        assert_eq!(config.attempt_timeout(), Some(Duration::from_millis(750)));
        assert_eq!(config.screenshot_dir, Some(PathBuf::from("target/shots")));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml_str("popup_interval_ms: 250\nretry_delay_ms: 40\n").unwrap();
        assert_eq!(config.popup_interval_ms, 250);
        assert_eq!(config.retry_delay_ms, 40);
        assert_eq!(config.candidate_timeout_ms, 5_000);
    }

    #[test]
    fn test_yaml_validation_rejects_zero_attempts() {
        let err = EngineConfig::from_yaml_str("default_max_attempts: 0").unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "verify_timeout_ms: 1200\nscreenshot_dir: /tmp/shots\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.verify_timeout(), Duration::from_millis(1200));
        assert_eq!(config.screenshot_dir, Some(PathBuf::from("/tmp/shots")));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_file("/nonexistent/engine.yaml").unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("POPUP_INTERVAL_MS", "200"),
            ("MAX_ATTEMPTS", "4"),
            ("SCREENSHOT_DIR", "shots"),
            ("REVEAL_WAIT_MS", "750"),
            ("POPUP_DISMISS_TIMEOUT_MS", "450"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::default()
            .apply_overrides(|k| vars.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.popup_interval_ms, 200);
        assert_eq!(config.default_max_attempts, 4);
        assert_eq!(config.screenshot_dir, Some(PathBuf::from("shots")));
        assert_eq!(config.reveal_wait(), Duration::from_millis(750));
        assert_eq!(config.popup_dismiss_timeout(), Duration::from_millis(450));
    }

    #[test]
    fn test_override_rejects_garbage() {
        let err = EngineConfig::default()
            .apply_overrides(|k| (k == "ROLE_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("BINDUP_ROLE_TIMEOUT_MS"));
    }

    #[test]
    fn test_override_rejects_zero_interval() {
        let result = EngineConfig::default()
            .apply_overrides(|k| (k == "POPUP_INTERVAL_MS").then(|| "0".to_string()));
        assert!(result.is_err());
    }
}
