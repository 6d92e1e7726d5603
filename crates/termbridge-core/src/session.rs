//! A live PTY-backed session

use crate::pty::PtyProcess;
use crate::transport::Sink;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Key under which at most one live session exists
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for a chat conversation
    pub fn chat(chat_id: i64) -> Self {
        Self(format!("chat:{}", chat_id))
    }

    /// Key for a browser terminal socket
    pub fn web(id: &str) -> Self {
        Self(format!("web:{}", id))
    }

    /// Key from an arbitrary string
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SessionState {
    /// Spawned, login phase running
    Connecting = 0,
    /// Shell prompt seen
    Authenticated = 1,
    /// Waiting for credential input from the user
    AwaitingAuth = 2,
    /// Torn down
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Authenticated,
            2 => SessionState::AwaitingAuth,
            _ => SessionState::Closed,
        }
    }

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Authenticated => "authenticated",
            SessionState::AwaitingAuth => "awaiting authentication",
            SessionState::Closed => "closed",
        }
    }
}

/// What a session is connected to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionTarget {
    /// Remote host, or `localhost` for a local shell
    pub host: String,
    /// Remote port (SSH sessions only)
    pub port: Option<u16>,
    /// Login user (SSH sessions only)
    pub user: Option<String>,
    /// Saved connection name
    pub connection: Option<String>,
    /// Owner of the saved connection
    pub owner_id: Option<i64>,
}

impl SessionTarget {
    /// `user@host:port`, or just the host for local shells
    pub fn address(&self) -> String {
        match (&self.user, self.port) {
            (Some(user), Some(port)) => format!("{}@{}:{}", user, self.host, port),
            _ => self.host.clone(),
        }
    }
}

/// Snapshot for status queries
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session key
    pub key: SessionKey,
    /// Connection target
    pub target: SessionTarget,
    /// Current state
    pub state: SessionState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time since the last input or output
    #[serde(with = "duration_secs")]
    pub idle: Duration,
    /// Current terminal size (cols, rows)
    pub dimensions: (u16, u16),
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

pub(crate) struct PumpHandle {
    pub(crate) cancel: CancellationToken,
    pub(crate) task: JoinHandle<()>,
}

/// One live PTY-backed connection
pub struct Session {
    key: SessionKey,
    id: String,
    attach_token: String,
    target: SessionTarget,
    pub(crate) pty: PtyProcess,
    state: AtomicU8,
    pub(crate) pending_auth_attempted: AtomicBool,
    pub(crate) login_cancel: CancellationToken,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    backlog: Mutex<Vec<u8>>,
    pub(crate) sink: watch::Sender<Sink>,
    pump: tokio::sync::Mutex<Option<PumpHandle>>,
    temp_secret: Mutex<Option<tempfile::TempPath>>,
    torn_down: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        key: SessionKey,
        target: SessionTarget,
        pty: PtyProcess,
        temp_secret: Option<tempfile::TempPath>,
        sink: Sink,
    ) -> Self {
        let (sink, _) = watch::channel(sink);
        Self {
            key,
            id: termbridge_crypto::generate_token(),
            attach_token: termbridge_crypto::generate_token(),
            target,
            pty,
            state: AtomicU8::new(SessionState::Connecting as u8),
            pending_auth_attempted: AtomicBool::new(false),
            login_cancel: CancellationToken::new(),
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            backlog: Mutex::new(Vec::new()),
            sink,
            pump: tokio::sync::Mutex::new(None),
            temp_secret: Mutex::new(temp_secret),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Session key
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Unique id of this session instance
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Token a browser uses to attach to this session
    pub fn attach_token(&self) -> &str {
        &self.attach_token
    }

    /// Connection target
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Move from AwaitingAuth to Authenticated; false if the state was anything else
    pub(crate) fn promote_to_authenticated(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::AwaitingAuth as u8,
                SessionState::Authenticated as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Stop a login phase that is still running; no effect afterwards
    pub(crate) fn abort_login(&self) {
        if self.state() == SessionState::Connecting {
            self.login_cancel.cancel();
        }
    }

    /// Whether the session has a shell
    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record input or output activity
    pub fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last activity
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .elapsed()
    }

    /// Whether the session is usable: not torn down and the child still runs
    pub async fn is_live(&self) -> bool {
        !self.torn_down.load(Ordering::SeqCst) && self.pty.is_alive().await
    }

    /// Status snapshot
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            key: self.key.clone(),
            target: self.target.clone(),
            state: self.state(),
            created_at: self.created_at,
            idle: self.idle_for(),
            dimensions: self.pty.dimensions(),
        }
    }

    pub(crate) fn push_backlog(&self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.backlog
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend(bytes);
    }

    pub(crate) fn take_backlog(&self) -> Vec<u8> {
        std::mem::take(
            &mut *self
                .backlog
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }

    pub(crate) async fn set_pump(&self, handle: PumpHandle) {
        *self.pump.lock().await = Some(handle);
    }

    /// Release the temporary key file; later calls do nothing
    pub(crate) fn release_temp_secret(&self) {
        let taken = self
            .temp_secret
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(path) = taken {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => debug!(session_key = %self.key, path = %shown, "Temporary key removed"),
                Err(e) => warn!(
                    session_key = %self.key,
                    path = %shown,
                    error = %e,
                    "Failed to remove temporary key"
                ),
            }
        }
    }

    /// Whether a temporary key file is still held
    pub fn holds_temp_secret(&self) -> bool {
        self.temp_secret
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Whether teardown has run
    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Stop the pump, terminate the child and release key material.
    ///
    /// Runs once; returns false for every later call.
    pub(crate) async fn teardown(&self, grace: Duration, pump_join_timeout: Duration) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.set_state(SessionState::Closed);

        if let Some(PumpHandle { cancel, mut task }) = self.pump.lock().await.take() {
            cancel.cancel();
            if tokio::time::timeout(pump_join_timeout, &mut task)
                .await
                .is_err()
            {
                warn!(session_key = %self.key, "Output pump did not stop in time, aborting");
                task.abort();
            }
        }

        self.pty.terminate(grace).await;
        self.release_temp_secret();
        debug!(session_key = %self.key, session_id = %self.id, "Session torn down");
        true
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
