//! Error types for termbridge-core
//!
//! Connect-time errors are surfaced to the caller with a readable reason;
//! steady-state pump errors are absorbed and logged by the pump itself.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// PTY allocation or child spawn failed; no session was created
    #[error("failed to start session: {0}")]
    SpawnFailed(String),

    /// A live session already occupies the key
    #[error("a session is already active for {key}")]
    AlreadyConnected {
        /// Occupied session key
        key: String,
    },

    /// Login output could not be classified in time.
    ///
    /// Soft failure: the session stays open and accepts manual input.
    #[error("timed out waiting for login after {waited_ms}ms")]
    AuthTimeout {
        /// How long the sniffer waited
        waited_ms: u64,
    },

    /// The PTY is closed or the child process has exited
    #[error("terminal closed")]
    Closed,

    /// The child exited before login finished
    #[error("login failed: {reason}")]
    LoginFailed {
        /// Last line the child printed, e.g. ssh's own diagnostic
        reason: String,
    },

    /// Recoverable read/write hiccup, retried on the next poll tick
    #[error("transient i/o error: {0}")]
    TransientIo(String),

    /// No session for the key
    #[error("no active session for {key}")]
    NotConnected {
        /// Session key that was looked up
        key: String,
    },

    /// Saved connection not found (also used when secrets cannot be decrypted)
    #[error("connection '{name}' not found")]
    NotFound {
        /// Connection name
        name: String,
    },

    /// Host, port or login user failed validation
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Credential storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Human-readable message for chat and web front-ends.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Error::SpawnFailed(reason) => format!("❌ Connection failed: {}", reason),
            Error::AlreadyConnected { .. } => {
                "An SSH session is already active. Use /disconnect to close it.".to_string()
            }
            Error::AuthTimeout { .. } => {
                "🔐 Waiting for authentication input...".to_string()
            }
            Error::Closed => "❌ Connection closed by remote host.".to_string(),
            Error::LoginFailed { reason } => format!("❌ Connection failed: {}", reason),
            Error::NotConnected { .. } => "No active SSH connection.".to_string(),
            Error::NotFound { name } => format!(
                "Connection '{}' not found.\nUse /connections to see available connections.",
                name
            ),
            Error::InvalidTarget(reason) => format!("❌ Invalid target: {}", reason),
            Error::TransientIo(_) | Error::Io(_) => {
                "⚠️ Temporary I/O problem, please retry.".to_string()
            }
            Error::Storage(_) => "⚠️ Credential storage is unavailable.".to_string(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        let err = Error::AlreadyConnected {
            key: "chat:1".into(),
        };
        assert!(err.user_message().contains("/disconnect"));

        let err = Error::NotFound {
            name: "prod".into(),
        };
        assert!(err.user_message().contains("'prod'"));

        let err = Error::AuthTimeout { waited_ms: 1 };
        assert!(err.user_message().contains("Waiting"));

        let err = Error::LoginFailed {
            reason: "ssh: connect to host h port 22: Connection refused".into(),
        };
        assert!(err.user_message().ends_with("Connection refused"));
    }
}
