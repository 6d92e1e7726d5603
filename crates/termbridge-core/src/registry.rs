//! Session registry
//!
//! Maps session keys to live sessions. Every create, teardown and input for a
//! key runs under that key's lock, so two connects for one key never race and
//! teardown happens exactly once.

use crate::auth::{AuthOutcome, AuthSniffer};
use crate::config::EngineConfig;
use crate::credentials::{AuthKind, CredentialStore, SecretBundle};
use crate::error::{Error, Result};
use crate::pty::PtyProcess;
use crate::pump::{OutputPump, PumpExit};
use crate::session::{PumpHandle, Session, SessionInfo, SessionKey, SessionState, SessionTarget};
use crate::ssh::{write_key_file, ConnectTarget, Launcher, SpawnSpec, SshLauncher, SshTarget};
use crate::transport::Sink;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Everything needed to spawn a session, resolved from a [`ConnectTarget`]
struct Resolved {
    spec: SpawnSpec,
    target: SessionTarget,
    secrets: SecretBundle,
    temp_secret: Option<tempfile::TempPath>,
    sniff: bool,
}

/// Owns all live sessions
pub struct SessionRegistry {
    config: EngineConfig,
    store: Option<Arc<dyn CredentialStore>>,
    launcher: Arc<dyn Launcher>,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    locks: Mutex<HashMap<SessionKey, KeyLock>>,
    this: Weak<SessionRegistry>,
}

/// Restores a session's previous sink when a browser detaches
pub struct AttachGuard {
    session: Arc<Session>,
    previous: Sink,
    installed: Sink,
}

impl AttachGuard {
    /// The attached session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        let previous = self.previous.clone();
        let installed = &self.installed;
        // A newer attach keeps its sink
        self.session.sink.send_if_modified(|current| {
            if current.same_as(installed) {
                *current = previous;
                true
            } else {
                false
            }
        });
        debug!(session_key = %self.session.key(), "Browser detached");
    }
}

impl SessionRegistry {
    /// Registry launching `ssh` from `config.ssh_program`
    pub fn new(config: EngineConfig, store: Option<Arc<dyn CredentialStore>>) -> Arc<Self> {
        let launcher = Arc::new(SshLauncher::new(config.ssh_program.clone()));
        Self::with_launcher(config, store, launcher)
    }

    /// Registry with a custom launcher
    pub fn with_launcher(
        config: EngineConfig,
        store: Option<Arc<dyn CredentialStore>>,
        launcher: Arc<dyn Launcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            store,
            launcher,
            sessions: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            this: this.clone(),
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn lock_key(&self, key: &SessionKey) -> KeyGuard<'_> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Start a session for `key`.
    ///
    /// Fails with `AlreadyConnected` while a live session holds the key. An
    /// `AuthTimeout` error leaves the session running and reachable via
    /// [`get`](Self::get). During the login phase the session is listed as
    /// `Connecting`, and [`disconnect`](Self::disconnect) cuts the login short.
    #[instrument(skip(self, sink), fields(session_key = %key))]
    pub async fn connect(
        &self,
        key: SessionKey,
        target: ConnectTarget,
        sink: Sink,
    ) -> Result<Arc<Session>> {
        let _key_guard = self.lock_key(&key).await;
        self.connect_locked(&key, target, sink).await
    }

    async fn connect_locked(
        &self,
        key: &SessionKey,
        target: ConnectTarget,
        sink: Sink,
    ) -> Result<Arc<Session>> {
        let existing = self.sessions.read().await.get(key).cloned();
        if let Some(existing) = existing {
            if existing.is_live().await {
                return Err(Error::AlreadyConnected {
                    key: key.to_string(),
                });
            }
            // Child already gone; finish its teardown before reusing the key
            self.sessions.write().await.remove(key);
            self.teardown(&existing).await;
        }

        let resolved = self.resolve(target).await?;
        let pty = PtyProcess::spawn(&resolved.spec, self.config.initial_size)?;
        let session = Arc::new(Session::new(
            key.clone(),
            resolved.target,
            pty,
            resolved.temp_secret,
            sink,
        ));
        info!(
            session_key = %key,
            target = %session.target().address(),
            pid = ?session.pty.pid(),
            "Session spawned"
        );

        // Visible as Connecting while the login phase runs
        self.sessions
            .write()
            .await
            .insert(key.clone(), session.clone());

        let mut soft_error = None;
        if resolved.sniff {
            let sniffer = AuthSniffer::new(
                self.config.pump.poll_interval,
                self.config.auth_timeout,
                self.config.auth_confirm_timeout,
            );
            let report = tokio::select! {
                report = sniffer.run(&session.pty, &resolved.secrets, &session.pending_auth_attempted) => report,
                _ = session.login_cancel.cancelled() => {
                    // The disconnect waiting on the key lock removes and tears down
                    info!(session_key = %key, "Login aborted by disconnect");
                    return Err(Error::Closed);
                }
            };
            drop(resolved.secrets);

            let report = match report {
                Ok(report) => report,
                Err(e) => {
                    warn!(session_key = %key, error = %e, "Login phase failed");
                    self.sessions.write().await.remove(key);
                    self.teardown(&session).await;
                    return Err(e);
                }
            };
            session.push_backlog(report.transcript);

            match report.outcome {
                AuthOutcome::Authenticated { prompt } => {
                    info!(session_key = %key, prompt = %prompt, "Login succeeded");
                    session.set_state(SessionState::Authenticated);
                    self.record_use(session.target()).await;
                }
                AuthOutcome::AwaitingInput => {
                    info!(session_key = %key, "Awaiting manual authentication");
                    session.set_state(SessionState::AwaitingAuth);
                }
                AuthOutcome::TimedOut => {
                    warn!(session_key = %key, "Login prompt not recognised in time");
                    session.set_state(SessionState::AwaitingAuth);
                    soft_error = Some(Error::AuthTimeout {
                        waited_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        } else {
            session.set_state(SessionState::Authenticated);
        }

        session.touch();
        self.start_pump(&session).await;

        match soft_error {
            Some(e) => Err(e),
            None => Ok(session),
        }
    }

    async fn resolve(&self, target: ConnectTarget) -> Result<Resolved> {
        match target {
            ConnectTarget::Saved { owner_id, name } => {
                let store = self.store.as_ref().ok_or_else(|| Error::NotFound {
                    name: name.clone(),
                })?;
                let descriptor = store.resolve(owner_id, &name).await?;
                let secrets = store.secrets(&descriptor).await?;
                let ssh = SshTarget::new(
                    descriptor.host.clone(),
                    descriptor.port,
                    descriptor.login_user.clone(),
                )?;

                let temp_secret = match (descriptor.auth_kind, secrets.private_key.as_ref()) {
                    (AuthKind::Key, Some(pem)) => {
                        Some(write_key_file(self.config.key_dir.as_deref(), pem)?)
                    }
                    (AuthKind::Key, None) => {
                        warn!(connection = %name, "No usable private key, falling back to manual input");
                        None
                    }
                    (AuthKind::Password, _) => None,
                };
                let spec = self
                    .launcher
                    .ssh_command(&ssh, temp_secret.as_deref());

                Ok(Resolved {
                    spec,
                    target: SessionTarget {
                        host: ssh.host,
                        port: Some(ssh.port),
                        user: Some(ssh.user),
                        connection: Some(name),
                        owner_id: Some(owner_id),
                    },
                    secrets,
                    temp_secret,
                    sniff: true,
                })
            }
            ConnectTarget::Manual(ssh) => Ok(Resolved {
                spec: self.launcher.ssh_command(&ssh, None),
                target: SessionTarget {
                    host: ssh.host,
                    port: Some(ssh.port),
                    user: Some(ssh.user),
                    connection: None,
                    owner_id: None,
                },
                secrets: SecretBundle::empty(),
                temp_secret: None,
                sniff: true,
            }),
            ConnectTarget::LocalShell { shell, cwd } => Ok(Resolved {
                spec: self.launcher.shell_command(&shell, cwd.as_deref()),
                target: SessionTarget {
                    host: "localhost".to_string(),
                    port: None,
                    user: None,
                    connection: None,
                    owner_id: None,
                },
                secrets: SecretBundle::empty(),
                temp_secret: None,
                sniff: false,
            }),
        }
    }

    async fn record_use(&self, target: &SessionTarget) {
        let (Some(store), Some(owner_id), Some(name)) =
            (&self.store, target.owner_id, target.connection.as_deref())
        else {
            return;
        };
        if let Err(e) = store.touch(owner_id, name).await {
            warn!(connection = %name, error = %e, "Failed to record connection use");
        }
    }

    async fn start_pump(&self, session: &Arc<Session>) {
        let cancel = CancellationToken::new();
        let pump = OutputPump::new(session.clone(), self.config.pump.clone(), cancel.clone());
        let registry = self.this.clone();
        let key = session.key().clone();
        let session_id = session.id().to_string();

        let task = tokio::spawn(async move {
            if pump.run().await == PumpExit::ProcessExited {
                // Reap from a separate task: teardown awaits this one
                if let Some(registry) = registry.upgrade() {
                    tokio::spawn(async move { registry.reap(&key, &session_id).await });
                }
            }
        });
        session.set_pump(PumpHandle { cancel, task }).await;
    }

    async fn teardown(&self, session: &Session) -> bool {
        session
            .teardown(self.config.terminate_grace, self.config.pump_join_timeout)
            .await
    }

    /// Remove a session whose child exited, if it still holds the key
    async fn reap(&self, key: &SessionKey, session_id: &str) {
        let _key_guard = self.lock_key(key).await;
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(key) {
                Some(s) if s.id() == session_id => sessions.remove(key),
                _ => None,
            }
        };
        if let Some(session) = removed {
            self.teardown(&session).await;
            info!(session_key = %key, "Exited session reaped");
        }
    }

    /// Session for `key`, if any
    pub async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.read().await.get(key).cloned()
    }

    /// Tear down the session for `key`; returns the host it was connected to.
    ///
    /// A second or concurrent call returns `None`.
    #[instrument(skip(self), fields(session_key = %key))]
    pub async fn disconnect(&self, key: &SessionKey) -> Option<String> {
        // A running login holds the key lock; cut it short instead of waiting it out
        if let Some(pending) = self.get(key).await {
            pending.abort_login();
        }
        let session = {
            let _key_guard = self.lock_key(key).await;
            let removed = self.sessions.write().await.remove(key)?;
            self.teardown(&removed).await;
            removed
        };
        info!(session_key = %key, host = %session.target().host, "Session disconnected");
        Some(session.target().host.clone())
    }

    /// Tear down sessions idle longer than `max_idle`; returns how many
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<SessionKey> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.idle_for() > max_idle)
            .map(|(k, _)| k.clone())
            .collect();

        let mut swept = 0;
        for key in candidates {
            let _key_guard = self.lock_key(&key).await;
            let removed = {
                let mut sessions = self.sessions.write().await;
                // Activity may have happened since the snapshot
                match sessions.get(&key) {
                    Some(s) if s.idle_for() > max_idle => sessions.remove(&key),
                    _ => None,
                }
            };
            if let Some(session) = removed {
                self.teardown(&session).await;
                info!(session_key = %key, idle_secs = session.idle_for().as_secs(), "Idle session swept");
                swept += 1;
            }
        }
        swept
    }

    /// Run [`sweep_idle`](Self::sweep_idle) every `interval` until cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let swept = registry.sweep_idle(max_idle).await;
                        if swept > 0 {
                            debug!(swept, "Idle sweep finished");
                        }
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    /// Tear down every session
    pub async fn shutdown_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.sessions.read().await.keys().cloned().collect();
        let mut closed = 0;
        for key in keys {
            if self.disconnect(&key).await.is_some() {
                closed += 1;
            }
        }
        info!(closed, "All sessions shut down");
        closed
    }

    /// Live session for `key`, with the key lock held by the caller
    async fn live_session(&self, key: &SessionKey) -> Result<Arc<Session>> {
        match self.sessions.read().await.get(key) {
            Some(session) if !session.is_torn_down() => Ok(session.clone()),
            _ => Err(Error::NotConnected {
                key: key.to_string(),
            }),
        }
    }

    async fn write_input(&self, key: &SessionKey, bytes: &[u8]) -> Result<usize> {
        let _key_guard = self.lock_key(key).await;
        let session = self.live_session(key).await?;
        session.touch();
        session.pty.write(bytes).await
    }

    /// Write raw input to the session
    pub async fn send_raw(&self, key: &SessionKey, input: &str) -> Result<usize> {
        self.write_input(key, input.as_bytes()).await
    }

    /// Write a line of input followed by `\n`
    pub async fn send_line(&self, key: &SessionKey, line: &str) -> Result<usize> {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
        self.write_input(key, &bytes).await
    }

    /// Resize the session's terminal
    pub async fn resize(&self, key: &SessionKey, cols: u16, rows: u16) -> Result<()> {
        let _key_guard = self.lock_key(key).await;
        self.live_session(key).await?.pty.resize(cols, rows).await
    }

    /// Status of one session
    pub async fn status(&self, key: &SessionKey) -> Option<SessionInfo> {
        self.sessions.read().await.get(key).map(|s| s.info())
    }

    /// Status of every session, ordered by key
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<SessionInfo> =
            self.sessions.read().await.values().map(|s| s.info()).collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Route a session's output to `sink` until the guard is dropped
    pub async fn attach(&self, token: &str, sink: Sink) -> Result<AttachGuard> {
        let session = self
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.attach_token() == token)
            .cloned()
            .ok_or_else(|| Error::NotConnected {
                key: "attach token".to_string(),
            })?;

        let previous = session.sink.send_replace(sink.clone());
        info!(session_key = %session.key(), sink = sink.kind(), "Browser attached");
        Ok(AttachGuard {
            session,
            previous,
            installed: sink,
        })
    }
}

/// Holds a key's lock; drops the lock entry when nobody else wants it
struct KeyGuard<'r> {
    locks: &'r Mutex<HashMap<SessionKey, KeyLock>>,
    key: SessionKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        self.guard.take();
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
