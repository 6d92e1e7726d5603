//! Engine configuration
//!
//! Plain structs with defaults; the binary fills them from the layered
//! configuration file.

use std::path::PathBuf;
use std::time::Duration;

/// Default PTY poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
/// Default wait for the first login classification.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;
/// Default wait for a shell prompt after injecting a secret.
pub const DEFAULT_AUTH_CONFIRM_TIMEOUT_SECS: u64 = 5;
/// Default bound on a single transport send.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 10;
/// Default idle time before the sweeper reclaims a session.
pub const DEFAULT_IDLE_TIMEOUT_MINS: u64 = 30;
/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_TERMINATE_GRACE_MS: u64 = 2000;
/// Default bound on waiting for a cancelled pump to finish.
pub const DEFAULT_PUMP_JOIN_TIMEOUT_MS: u64 = 1000;

/// Coalescing thresholds.
pub const DEFAULT_FLUSH_BYTES: usize = 3000;
/// Flush after this long since the previous flush.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
/// Characters kept in the chat live message.
pub const DEFAULT_LIVE_WINDOW_CHARS: usize = 3500;
/// Single chat message payload ceiling.
pub const DEFAULT_MESSAGE_CEILING: usize = 4096;

/// Default SSH port for quick connects.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Output pump tuning.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How often the PTY is polled
    pub poll_interval: Duration,
    /// Bytes per non-blocking read
    pub read_chunk: usize,
    /// Flush once the buffer exceeds this many bytes
    pub flush_bytes: usize,
    /// Flush once this much time passed since the last flush
    pub flush_interval: Duration,
    /// Characters kept in the chat live message
    pub live_window_chars: usize,
    /// Accumulated display text above this many bytes is spilled as a file
    pub message_ceiling: usize,
    /// Bound on a single transport send
    pub send_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_chunk: 4096,
            flush_bytes: DEFAULT_FLUSH_BYTES,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            live_window_chars: DEFAULT_LIVE_WINDOW_CHARS,
            message_ceiling: DEFAULT_MESSAGE_CEILING,
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
        }
    }
}

/// Session engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Output pump tuning
    pub pump: PumpConfig,
    /// Wait for the first login classification
    pub auth_timeout: Duration,
    /// Wait for a shell prompt after a credential was injected
    pub auth_confirm_timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub terminate_grace: Duration,
    /// Bound on waiting for a cancelled pump to finish
    pub pump_join_timeout: Duration,
    /// Sessions idle longer than this are swept
    pub idle_timeout: Duration,
    /// SSH binary
    pub ssh_program: String,
    /// Directory for temporary key files (system temp dir when unset)
    pub key_dir: Option<PathBuf>,
    /// Initial terminal size (cols, rows)
    pub initial_size: (u16, u16),
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pump: PumpConfig::default(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            auth_confirm_timeout: Duration::from_secs(DEFAULT_AUTH_CONFIRM_TIMEOUT_SECS),
            terminate_grace: Duration::from_millis(DEFAULT_TERMINATE_GRACE_MS),
            pump_join_timeout: Duration::from_millis(DEFAULT_PUMP_JOIN_TIMEOUT_MS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_MINS * 60),
            ssh_program: "ssh".to_string(),
            key_dir: None,
            initial_size: (80, 24),
        }
    }
}

impl EngineConfig {
    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.pump.poll_interval = interval;
        self
    }

    /// Set the login classification timeouts
    #[must_use]
    pub fn with_auth_timeouts(mut self, initial: Duration, confirm: Duration) -> Self {
        self.auth_timeout = initial;
        self.auth_confirm_timeout = confirm;
        self
    }

    /// Set the terminate grace period
    #[must_use]
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.pump.poll_interval, Duration::from_millis(200));
        assert_eq!(config.pump.flush_bytes, 3000);
        assert_eq!(config.pump.flush_interval, Duration::from_secs(1));
        assert_eq!(config.pump.live_window_chars, 3500);
        assert_eq!(config.pump.message_ceiling, 4096);
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert!(config.auth_confirm_timeout < config.auth_timeout);
        assert_eq!(config.idle_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_auth_timeouts(Duration::from_secs(3), Duration::from_secs(1))
            .with_terminate_grace(Duration::from_millis(100));
        assert_eq!(config.pump.poll_interval, Duration::from_millis(20));
        assert_eq!(config.auth_timeout, Duration::from_secs(3));
        assert_eq!(config.auth_confirm_timeout, Duration::from_secs(1));
        assert_eq!(config.terminate_grace, Duration::from_millis(100));
    }
}
