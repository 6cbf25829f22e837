//! Launcher configuration.
//!
//! One TOML file serves both processes: the gateway reads `[gateway]`,
//! the logic process reads `[logic]` and `[[accounts]]`, and both read
//! `[logging]`. Keeping a single file means a deployment can't drift
//! into gateway and logic disagreeing about the wire address.

use meridian_gateway::GatewayConfig;
use meridian_logic::LogicConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Application configuration loaded from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub logic: LogicConfig,
    pub logging: LoggingSettings,
    /// Bootstrap accounts seeded into the in-memory authenticator.
    /// Deployments with an external account backend leave this empty.
    pub accounts: Vec<AccountSeed>,
}

/// A bootstrap account for single-node setups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub name: String,
    pub password: String,
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error).
    pub level: String,
    /// Whether to output logs in JSON format.
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file, writing a default file when
    /// none exists yet.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.gateway.telnet_bind.is_none()
            && self.gateway.tls_bind.is_none()
            && self.gateway.websocket_bind.is_none()
        {
            return Err("gateway has no listener configured".to_string());
        }
        if self.gateway.tls_bind.is_some()
            && (self.gateway.tls_cert.is_none() || self.gateway.tls_key.is_none())
        {
            return Err("tls_bind requires tls_cert and tls_key".to_string());
        }

        if self.logic.blocking_pool_size == 0 {
            return Err("blocking_pool_size must be at least 1".to_string());
        }

        for seed in &self.accounts {
            if seed.name.trim().is_empty() || seed.password.is_empty() {
                return Err("bootstrap accounts need a name and a password".to_string());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.logic_address, config.logic.wire_bind);
    }

    #[tokio::test]
    async fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meridian.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(config.logging.level, "info");

        // The written file round-trips.
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.logic.wire_bind, config.logic.wire_bind);
    }

    #[tokio::test]
    async fn test_load_partial_file_fills_defaults() {
        let toml_content = r#"
[gateway]
server_name = "TestMud"
telnet_bind = "127.0.0.1:5000"

[logic]
wire_bind = "127.0.0.1:5005"

[logging]
level = "debug"

[[accounts]]
name = "mira"
password = "sekrit"
"#;
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf())
            .await
            .unwrap();
        assert_eq!(config.gateway.server_name, "TestMud");
        assert_eq!(config.gateway.telnet_bind.unwrap().port(), 5000);
        // Untouched fields keep their defaults.
        assert!(config.gateway.websocket_bind.is_some());
        assert_eq!(config.logic.blocking_pool_size, 16);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].name, "mira");
    }

    #[test]
    fn test_validation_rejects_bad_configs() {
        let mut config = AppConfig::default();
        config.logging.level = "noisy".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.telnet_bind = None;
        config.gateway.websocket_bind = None;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.gateway.tls_bind = Some("0.0.0.0:4001".parse().unwrap());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logic.blocking_pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.accounts.push(AccountSeed {
            name: "  ".into(),
            password: "x".into(),
        });
        assert!(config.validate().is_err());
    }
}
