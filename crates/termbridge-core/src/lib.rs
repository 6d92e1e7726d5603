//! Termbridge Core - session and PTY multiplexing engine
//!
//! This crate owns everything between a front-end and an SSH child process:
//! - PTY: spawning children on a pseudo-terminal, non-blocking reads, resize, termination
//! - Auth: sniffing login prompts and injecting stored credentials once
//! - Pump: coalescing output and delivering it to chat or WebSocket sinks
//! - Registry: at most one live session per key, with idempotent teardown
//! - Credentials: saved connections with per-owner encrypted secrets

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod coalesce;
pub mod config;
pub mod credentials;
pub mod error;
pub mod filter;
pub mod pty;
pub mod pump;
pub mod registry;
pub mod session;
pub mod ssh;
pub mod store;
pub mod transport;

pub use auth::{classify, AuthOutcome, AuthSniffer, AuthState};
pub use coalesce::Coalescer;
pub use config::{EngineConfig, PumpConfig};
pub use credentials::{
    AuthKind, ConnectionCatalog, ConnectionDescriptor, CredentialStore, MemoryCredentialStore,
    NewConnection, SecretBundle,
};
pub use error::{Error, Result};
pub use pty::{PtyProcess, PtyRead};
pub use pump::{OutputPump, PumpExit, SessionEvent};
pub use registry::{AttachGuard, SessionRegistry};
pub use session::{Session, SessionInfo, SessionKey, SessionState, SessionTarget};
pub use ssh::{ConnectTarget, Launcher, SpawnSpec, SshLauncher, SshTarget};
pub use store::SqliteCredentialStore;
pub use transport::{ChatTransport, FrameTransport, MessageId, Sink, TransportError};
