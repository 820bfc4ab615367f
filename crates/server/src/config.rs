//! Server configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub rights: RightsSettings,
    /// Audit logging configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Default log filter when RUST_LOG is not set
    #[serde(default = "ServiceSettings::default_log_level")]
    pub log_level: String,
    /// Interval between maintenance sweeps, in seconds
    #[serde(default = "ServiceSettings::default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl ServiceSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_sweep_interval() -> u64 {
        300
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            sweep_interval_secs: Self::default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the rights database file
    #[serde(default = "StorageSettings::default_database_path")]
    pub database_path: PathBuf,
}

impl StorageSettings {
    fn default_database_path() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("usb-rights").join("rights.db")
        } else {
            PathBuf::from("/var/lib/usb-rights/rights.db")
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: Self::default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RightsSettings {
    /// Bounded wait for the consent dialog before denying, in seconds
    #[serde(default = "RightsSettings::default_consent_timeout")]
    pub consent_timeout_secs: u64,
}

impl RightsSettings {
    fn default_consent_timeout() -> u64 {
        60
    }
}

impl Default for RightsSettings {
    fn default() -> Self {
        Self {
            consent_timeout_secs: Self::default_consent_timeout(),
        }
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging
    #[serde(default)]
    pub enabled: bool,
    /// Path to audit log file
    #[serde(default = "AuditConfig::default_path")]
    pub path: PathBuf,
}

impl AuditConfig {
    fn default_path() -> PathBuf {
        if let Some(data_dir) = dirs::data_local_dir() {
            data_dir.join("usb-rights").join("audit.log")
        } else {
            PathBuf::from("/var/log/usb-rights/audit.log")
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: Self::default_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            service: ServiceSettings::default(),
            storage: StorageSettings::default(),
            rights: RightsSettings::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Default config file location under the XDG config dir.
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-rights").join("server.toml")
        } else {
            PathBuf::from("/etc/usb-rights/server.toml")
        }
    }

    /// Load configuration: explicit path, then the default location, then
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::read(path);
        }
        let default = Self::default_path();
        if default.exists() {
            return Self::read(&default);
        }
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, raw)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.service.sweep_interval_secs, 300);
        assert_eq!(config.rights.consent_timeout_secs, 60);
        assert!(!config.audit.enabled);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config: ServerConfig = toml::from_str(
            "[rights]\nconsent_timeout_secs = 5\n\n[service]\nlog_level = \"debug\"\n",
        )
        .unwrap();
        assert_eq!(config.rights.consent_timeout_secs, 5);
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.service.sweep_interval_secs, 300);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = ServerConfig::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.service.log_level, config.service.log_level);
        assert_eq!(parsed.storage.database_path, config.storage.database_path);
    }
}
