//! Server configuration management

use crate::audit::AuditLevel;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSettings,
    pub session: SessionSettings,
    pub backend: BackendSettings,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub log_level: String,
    /// Path to a PEM certificate chain. When set together with `tls_key_path`
    /// the listener terminates TLS itself instead of serving plaintext.
    #[serde(default)]
    pub tls_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub tls_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Heartbeat interval handed to a device in the verify response, seconds.
    pub heartbeat_secs: u32,
    /// Multiple of `heartbeat_secs` a session tolerates before it is closed
    /// for missed pings.
    pub heartbeat_missed_limit: u32,
    /// Maximum concurrent observers per session.
    pub observer_cap: usize,
    /// Maximum outstanding device-initiated requests per session.
    pub pending_cap: usize,
    /// Seconds a pending correlation entry is held before it is swept as timed out.
    pub pending_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSettings {
    /// When true, the verify handler accepts any well-formed credential
    /// without calling the device verifier.
    pub disable_device_verify: bool,
    pub device_verifier_url: Option<String>,
    pub hub_config_url: Option<String>,
    /// Interval between hub-config polls, seconds.
    pub hub_config_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub level: AuditLevel,
    pub path: PathBuf,
    pub max_size_mb: Option<u32>,
    pub max_entries: Option<u64>,
    pub max_files: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_addr: "0.0.0.0:7100".to_string(),
                log_level: "info".to_string(),
                tls_cert_path: None,
                tls_key_path: None,
            },
            session: SessionSettings {
                heartbeat_secs: 30,
                heartbeat_missed_limit: 3,
                observer_cap: 32,
                pending_cap: 64,
                pending_ttl_secs: 120,
            },
            backend: BackendSettings {
                disable_device_verify: false,
                device_verifier_url: None,
                hub_config_url: None,
                hub_config_poll_secs: 5,
            },
            audit: AuditConfig {
                enabled: true,
                level: AuditLevel::Standard,
                path: PathBuf::from("/var/log/devicehub/audit.log"),
                max_size_mb: Some(100),
                max_entries: None,
                max_files: Some(5),
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/devicehub/server.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("devicehub").join("server.toml")
        } else {
            PathBuf::from(".config/devicehub/server.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.server.tls_cert_path.is_some() != self.server.tls_key_path.is_some() {
            return Err(anyhow!(
                "tls_cert_path and tls_key_path must both be set or both omitted"
            ));
        }

        if self.session.heartbeat_secs == 0 {
            return Err(anyhow!("session.heartbeat_secs must be greater than zero"));
        }

        if self.session.observer_cap == 0 {
            return Err(anyhow!("session.observer_cap must be greater than zero"));
        }

        if !self.backend.disable_device_verify && self.backend.device_verifier_url.is_none() {
            return Err(anyhow!(
                "backend.device_verifier_url is required unless backend.disable_device_verify is set"
            ));
        }

        Ok(())
    }
}

/// Legacy load_config function for backward compatibility
#[allow(dead_code)]
pub fn load_config(path: &str) -> Result<ServerConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    ServerConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.session.heartbeat_secs, 30);
        assert!(config.audit.enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = ServerConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ServerConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.server.log_level, parsed.server.log_level);
        assert_eq!(config.session.observer_cap, parsed.session.observer_cap);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.server.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_verifier_url_unless_disabled() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_err());

        config.backend.disable_device_verify = true;
        assert!(config.validate().is_ok());

        config.backend.disable_device_verify = false;
        config.backend.device_verifier_url = Some("https://verifier.example".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tls_paths_must_be_paired() {
        let mut config = ServerConfig::default();
        config.backend.disable_device_verify = true;
        config.server.tls_cert_path = Some(PathBuf::from("/etc/devicehub/cert.pem"));
        assert!(config.validate().is_err());

        config.server.tls_key_path = Some(PathBuf::from("/etc/devicehub/key.pem"));
        assert!(config.validate().is_ok());
    }
}
