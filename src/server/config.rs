//! Server configuration types
//!
//! Mirrors `config/default.toml`; every section falls back to its defaults.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use termbridge_channels::BotSettings;
use termbridge_core::{EngineConfig, PumpConfig, SqliteCredentialStore};

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub pump: PumpSection,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Telegram front-end
#[derive(Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: None,
            allowed_users: Vec::new(),
        }
    }
}

impl std::fmt::Debug for TelegramSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSection")
            .field("enabled", &self.enabled)
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

/// Saved connection storage
#[derive(Clone, Default, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("database", &self.database)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl StorageConfig {
    /// Database file, with a leading `~/` expanded
    pub fn database_path(&self) -> Result<PathBuf> {
        match self.database.as_deref() {
            Some(path) => Ok(expand_home(path)),
            None => Ok(SqliteCredentialStore::default_path()?),
        }
    }

    /// Base secret for credential encryption
    pub fn encryption_key(&self) -> Result<&str> {
        match self.encryption_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!(
                "storage.encryption_key is not set (TERMBRIDGE_STORAGE__ENCRYPTION_KEY)"
            ),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Session engine timings and quick-connect defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    pub auth_timeout_secs: u64,
    pub auth_confirm_timeout_secs: u64,
    pub send_timeout_secs: u64,
    pub idle_timeout_mins: u64,
    pub sweep_interval_secs: u64,
    pub terminate_grace_ms: u64,
    pub ssh_program: String,
    pub key_dir: Option<String>,
    pub default_port: u16,
    pub default_user: String,
    pub allow_quick_connect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            poll_interval_ms: millis(engine.pump.poll_interval),
            auth_timeout_secs: engine.auth_timeout.as_secs(),
            auth_confirm_timeout_secs: engine.auth_confirm_timeout.as_secs(),
            send_timeout_secs: engine.pump.send_timeout.as_secs(),
            idle_timeout_mins: engine.idle_timeout.as_secs() / 60,
            sweep_interval_secs: 60,
            terminate_grace_ms: millis(engine.terminate_grace),
            ssh_program: engine.ssh_program,
            key_dir: None,
            default_port: termbridge_core::config::DEFAULT_SSH_PORT,
            default_user: "root".to_string(),
            allow_quick_connect: true,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Output pump tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PumpSection {
    pub flush_bytes: usize,
    pub flush_interval_ms: u64,
    pub live_window_chars: usize,
    pub message_ceiling: usize,
}

impl Default for PumpSection {
    fn default() -> Self {
        let pump = PumpConfig::default();
        Self {
            flush_bytes: pump.flush_bytes,
            flush_interval_ms: millis(pump.flush_interval),
            live_window_chars: pump.live_window_chars,
            message_ceiling: pump.message_ceiling,
        }
    }
}

/// WebSocket terminal
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub allow_local_shell: bool,
    pub shell: String,
    pub public_url: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_local_shell: false,
            shell: "/bin/bash".to_string(),
            public_url: None,
        }
    }
}

/// Log output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Engine configuration for the session registry
    pub fn engine_config(&self) -> EngineConfig {
        let s = &self.session;
        let p = &self.pump;
        let mut engine = EngineConfig::default()
            .with_poll_interval(Duration::from_millis(s.poll_interval_ms.max(10)))
            .with_auth_timeouts(
                Duration::from_secs(s.auth_timeout_secs),
                Duration::from_secs(s.auth_confirm_timeout_secs),
            )
            .with_terminate_grace(Duration::from_millis(s.terminate_grace_ms));
        engine.idle_timeout = Duration::from_secs(s.idle_timeout_mins * 60);
        engine.ssh_program = s.ssh_program.clone();
        engine.key_dir = s.key_dir.as_deref().map(expand_home);
        engine.pump.send_timeout = Duration::from_secs(s.send_timeout_secs);
        engine.pump.flush_bytes = p.flush_bytes;
        engine.pump.flush_interval = Duration::from_millis(p.flush_interval_ms);
        engine.pump.live_window_chars = p.live_window_chars;
        engine.pump.message_ceiling = p.message_ceiling;
        engine
    }

    /// Settings for chat front-ends
    pub fn bot_settings(&self) -> BotSettings {
        BotSettings {
            default_port: self.session.default_port,
            default_user: self.session.default_user.clone(),
            allow_quick_connect: self.session.allow_quick_connect,
            web_url: if self.web.enabled {
                self.web.public_url.clone()
            } else {
                None
            },
        }
    }

    /// Interval between idle sweeps
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let config = AppConfig::default();
        let engine = config.engine_config();
        let defaults = EngineConfig::default();

        assert_eq!(engine.pump.poll_interval, defaults.pump.poll_interval);
        assert_eq!(engine.auth_timeout, defaults.auth_timeout);
        assert_eq!(engine.auth_confirm_timeout, defaults.auth_confirm_timeout);
        assert_eq!(engine.idle_timeout, Duration::from_secs(30 * 60));
        assert_eq!(engine.terminate_grace, defaults.terminate_grace);
        assert_eq!(engine.pump.flush_bytes, 3000);
        assert_eq!(engine.pump.message_ceiling, 4096);
    }

    #[test]
    fn test_encryption_key_required() {
        let storage = StorageConfig::default();
        assert!(storage.encryption_key().is_err());

        let storage = StorageConfig {
            encryption_key: Some("  ".into()),
            ..StorageConfig::default()
        };
        assert!(storage.encryption_key().is_err());

        let storage = StorageConfig {
            encryption_key: Some("base-secret".into()),
            ..StorageConfig::default()
        };
        assert_eq!(storage.encryption_key().unwrap(), "base-secret");
    }

    #[test]
    fn test_secrets_are_not_debug_printed() {
        let config = AppConfig {
            storage: StorageConfig {
                database: None,
                encryption_key: Some("hunter2".into()),
            },
            telegram: TelegramSection {
                bot_token: Some("123:abc".into()),
                ..TelegramSection::default()
            },
            ..AppConfig::default()
        };
        let shown = format!("{:?}", config);
        assert!(!shown.contains("hunter2"));
        assert!(!shown.contains("123:abc"));
    }

    #[test]
    fn test_web_url_hidden_when_web_disabled() {
        let mut config = AppConfig::default();
        config.web.public_url = Some("wss://t.example".into());
        assert_eq!(config.bot_settings().web_url.as_deref(), Some("wss://t.example"));
        config.web.enabled = false;
        assert!(config.bot_settings().web_url.is_none());
    }
}
