//! Engine Configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file
//! (or no file at all) yields a working setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuestError, Result};

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding `quests/**/*.toml`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// sqlx connection string for the instance store
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// How long an offer waits for accept/decline
    #[serde(default = "default_offer_ttl_secs")]
    pub offer_ttl_secs: u64,
    /// Period of the offer/timer maintenance loop
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
    /// Watch the quest directory and reload on change
    #[serde(default)]
    pub hot_reload: bool,
    /// Default tracing filter when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// Level given to players the replay binary has not seen before
    #[serde(default = "default_player_level")]
    pub default_player_level: i32,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_database_url() -> String {
    "sqlite:quests.db?mode=rwc".to_string()
}

fn default_offer_ttl_secs() -> u64 {
    60
}

fn default_maintenance_interval_ms() -> u64 {
    250
}

fn default_log_filter() -> String {
    "quest_engine=info".to_string()
}

fn default_player_level() -> i32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_url: default_database_url(),
            offer_ttl_secs: default_offer_ttl_secs(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            hot_reload: false,
            log_filter: default_log_filter(),
            default_player_level: default_player_level(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| QuestError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| QuestError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        Self::from_toml(&content)
    }

    pub fn offer_ttl(&self) -> Duration {
        Duration::from_secs(self.offer_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.offer_ttl_secs == 0 {
            return Err(QuestError::Config("offer_ttl_secs must be positive".to_string()));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(QuestError::Config(
                "maintenance_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.offer_ttl_secs, 60);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(!config.hot_reload);
    }

    #[test]
    fn test_overrides_and_validation() {
        let config = EngineConfig::from_toml(
            r#"
data_dir = "content"
offer_ttl_secs = 5
hot_reload = true
"#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("content"));
        assert_eq!(config.offer_ttl(), Duration::from_secs(5));
        assert!(config.hot_reload);

        let err = EngineConfig::from_toml("offer_ttl_secs = 0").unwrap_err();
        assert!(matches!(err, QuestError::Config(_)));
    }
}
