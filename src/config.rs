use hylaunch_core::{Language, LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Минимальный интервал опроса процесса, чтобы не забивать бэкенд запросами
const MIN_POLL_INTERVAL_MS: u64 = 250;

/// Engine configuration, read from `engine.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fallback process poll interval while the game is running
    pub poll_interval_ms: u64,
    /// Log lines attached to a crash report
    pub recent_log_lines: usize,
    pub mod_retry: RetryPolicy,
    pub nickname_min_len: usize,
    pub nickname_max_len: usize,
    /// Язык сообщений об ошибках
    pub language: Language,
    /// SQLite file for session history. None = history disabled
    pub history_db: Option<PathBuf>,
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3000,
            recent_log_lines: 50,
            mod_retry: RetryPolicy::default(),
            nickname_min_len: 1,
            nickname_max_len: 16,
            language: Language::Russian,
            history_db: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("Config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| LauncherError::Config(e.to_string()))?;
        Ok(config.sanitized())
    }

    /// Clamp values the engine cannot work with
    pub fn sanitized(mut self) -> Self {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            log::warn!(
                "poll_interval_ms = {} is too small, using {}",
                self.poll_interval_ms,
                MIN_POLL_INTERVAL_MS
            );
            self.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        }
        self.mod_retry.max_attempts = self.mod_retry.max_attempts.max(1);
        self.nickname_min_len = self.nickname_min_len.max(1);
        if self.nickname_max_len < self.nickname_min_len {
            self.nickname_max_len = self.nickname_min_len;
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        log::LevelFilter::from_str(&self.log_level).unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(3));
        assert_eq!(config.mod_retry.max_attempts, 3);
        assert_eq!(config.mod_retry.backoff_ms, 500);
        assert_eq!(config.nickname_max_len, 16);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            poll_interval_ms = 1000
            language = "en"

            [mod_retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.language, Language::English);
        assert_eq!(config.mod_retry.max_attempts, 5);
        // Не указано - берётся по умолчанию
        assert_eq!(config.mod_retry.backoff_ms, 500);
        assert_eq!(config.recent_log_lines, 50);
    }

    #[test]
    fn test_sanitize() {
        let config = EngineConfig::from_toml_str(
            r#"
            poll_interval_ms = 10
            nickname_min_len = 0
            nickname_max_len = 0
            [mod_retry]
            max_attempts = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(config.mod_retry.max_attempts, 1);
        assert_eq!(config.nickname_min_len, 1);
        assert_eq!(config.nickname_max_len, 1);
    }

    #[test]
    fn test_invalid_toml() {
        let err = EngineConfig::from_toml_str("poll_interval_ms = \"fast\"").unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("hylaunch-missing-{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(EngineConfig::load(&path).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_log_level() {
        let mut config = EngineConfig::default();
        config.log_level = "debug".into();
        assert_eq!(config.log_level_filter(), log::LevelFilter::Debug);
        config.log_level = "loud".into();
        assert_eq!(config.log_level_filter(), log::LevelFilter::Info);
    }
}
