//! Bot command surface
//!
//! Parses chat text into commands and runs them against the session registry
//! and the connection catalog. Replies are plain text so any chat transport
//! can deliver them.

use std::sync::Arc;

use termbridge_core::{
    ConnectTarget, ConnectionCatalog, Error as CoreError, SessionKey, SessionRegistry,
    SessionState, Sink, SshTarget,
};
use tracing::{info, warn};

const CONNECT_USAGE: &str =
    "Usage: /connect <connection_name>\nUse /connections to see available connections.";
const QUICK_USAGE: &str = "Usage: /quick <host> [port] [username]\nExample: /quick example.com 22 root";
const SEND_USAGE: &str = "Usage: /send <text>";
const SETDEFAULT_USAGE: &str = "Usage: /setdefault <connection_name>";
const DELETE_USAGE: &str = "Usage: /delete <connection_name>";

const NO_SESSION: &str = "No active SSH connection.\nUse /connect or /quick to start one.";
const NO_CATALOG: &str = "Saved connections are not available on this server.";

/// Help text for `/help` and `/start`
pub const HELP_TEXT: &str = "\
SSH Terminal Bot Commands

Connection Management:
/connections - List saved connections
/connect [name] - Connect to a saved server (default if omitted)
/delete <name> - Delete saved connection
/setdefault <name> - Set default connection

Quick Actions:
/quick <host> [port] [user] - Quick connect (not saved)
/disconnect - Close current SSH session
/status - Show connection status

Session Commands:
/send <text> - Send raw text to SSH session (no newline)
/webapp - Open this session in the web terminal
Regular messages - Sent to the session with a newline

Connections are added with `termbridge connection add` on the server.";

/// A parsed slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    /// `/start`
    Start,
    /// `/help`
    Help,
    /// `/connections`
    Connections,
    /// `/connect [name]`; `None` uses the default connection
    Connect(Option<String>),
    /// `/quick <host> [port] [user]`
    Quick {
        /// Remote host
        host: String,
        /// Port, configured default when omitted
        port: Option<u16>,
        /// Login user, configured default when omitted
        user: Option<String>,
    },
    /// `/disconnect`
    Disconnect,
    /// `/status`
    Status,
    /// `/send <raw>`, written without a trailing newline
    Send(String),
    /// `/setdefault <name>`
    SetDefault(String),
    /// `/delete <name>`
    Delete(String),
    /// `/webapp`
    WebApp,
    /// Known command with missing or malformed arguments
    Usage(&'static str),
    /// Anything else starting with `/`
    Unknown(String),
}

impl BotCommand {
    /// Parse a slash command; `None` when `text` is not a command.
    ///
    /// A `@botname` suffix on the command is ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let rest = text.trim_start().strip_prefix('/')?;
        let (head, args) = rest
            .split_once(char::is_whitespace)
            .unwrap_or((rest, ""));
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let trimmed = args.trim();

        let required = |usage: &'static str, build: fn(String) -> BotCommand| {
            if trimmed.is_empty() {
                BotCommand::Usage(usage)
            } else {
                build(trimmed.to_string())
            }
        };

        Some(match name.as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "connections" => Self::Connections,
            "connect" => Self::Connect((!trimmed.is_empty()).then(|| trimmed.to_string())),
            "quick" => Self::parse_quick(trimmed),
            "disconnect" => Self::Disconnect,
            "status" => Self::Status,
            // Raw text is kept exactly, including trailing whitespace
            "send" if args.is_empty() => Self::Usage(SEND_USAGE),
            "send" => Self::Send(args.to_string()),
            "setdefault" => required(SETDEFAULT_USAGE, Self::SetDefault),
            "delete" => required(DELETE_USAGE, Self::Delete),
            "webapp" => Self::WebApp,
            _ => Self::Unknown(format!("/{}", name)),
        })
    }

    fn parse_quick(args: &str) -> Self {
        let mut parts = args.split_whitespace();
        let Some(host) = parts.next() else {
            return Self::Usage(QUICK_USAGE);
        };
        let port = match parts.next().map(str::parse::<u16>) {
            None => None,
            Some(Ok(port)) if port > 0 => Some(port),
            Some(_) => return Self::Usage(QUICK_USAGE),
        };
        let user = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Self::Usage(QUICK_USAGE);
        }
        Self::Quick {
            host: host.to_string(),
            port,
            user,
        }
    }

    /// Command name for logs; never includes arguments
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::Connections => "connections",
            Self::Connect(_) => "connect",
            Self::Quick { .. } => "quick",
            Self::Disconnect => "disconnect",
            Self::Status => "status",
            Self::Send(_) => "send",
            Self::SetDefault(_) => "setdefault",
            Self::Delete(_) => "delete",
            Self::WebApp => "webapp",
            Self::Usage(_) => "usage",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// A chat message: a command or a line of session input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Slash command
    Command(BotCommand),
    /// Plain text, forwarded to the session with a newline
    Text(String),
}

impl Incoming {
    /// Classify a chat message
    pub fn parse(text: &str) -> Self {
        match BotCommand::parse(text) {
            Some(command) => Self::Command(command),
            None => Self::Text(text.to_string()),
        }
    }

    /// Kind for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Command(command) => command.name(),
            Self::Text(_) => "text",
        }
    }
}

/// Front-end settings taken from the server configuration
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Port used by `/quick` when none is given
    pub default_port: u16,
    /// Login user used by `/quick` when none is given
    pub default_user: String,
    /// Whether `/quick` is enabled
    pub allow_quick_connect: bool,
    /// Public base URL of the WebSocket server, e.g. `wss://host`
    pub web_url: Option<String>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            default_port: termbridge_core::config::DEFAULT_SSH_PORT,
            default_user: "root".to_string(),
            allow_quick_connect: true,
            web_url: None,
        }
    }
}

/// Runs commands for one chat platform
pub struct CommandContext {
    registry: Arc<SessionRegistry>,
    catalog: Option<Arc<dyn ConnectionCatalog>>,
    settings: BotSettings,
}

impl CommandContext {
    /// Create a command context
    pub fn new(
        registry: Arc<SessionRegistry>,
        catalog: Option<Arc<dyn ConnectionCatalog>>,
        settings: BotSettings,
    ) -> Self {
        Self {
            registry,
            catalog,
            settings,
        }
    }

    /// Session registry shared with other front-ends
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one message from `owner_id` in `chat_id`.
    ///
    /// `sink` receives session output if the message starts a session.
    /// Returns the reply to post, if any.
    pub async fn handle(
        &self,
        owner_id: i64,
        chat_id: i64,
        incoming: Incoming,
        sink: Sink,
    ) -> Option<String> {
        let key = SessionKey::chat(chat_id);
        match incoming {
            Incoming::Text(line) => match self.registry.send_line(&key, &line).await {
                Ok(_) => None,
                Err(CoreError::NotConnected { .. }) => Some(NO_SESSION.to_string()),
                Err(e) => {
                    warn!(session_key = %key, error = %e, "Failed to forward input");
                    Some(e.user_message())
                }
            },
            Incoming::Command(command) => Some(self.run(owner_id, key, command, sink).await),
        }
    }

    async fn run(&self, owner_id: i64, key: SessionKey, command: BotCommand, sink: Sink) -> String {
        match command {
            BotCommand::Start => format!("Welcome to SSH Terminal Bot!\n\n{}", HELP_TEXT),
            BotCommand::Help => HELP_TEXT.to_string(),
            BotCommand::Usage(usage) => usage.to_string(),
            BotCommand::Unknown(name) => {
                format!("Unknown command {}. Use /help for all available commands.", name)
            }
            BotCommand::Connections => self.connections(owner_id).await,
            BotCommand::Connect(name) => self.connect_saved(owner_id, key, name, sink).await,
            BotCommand::Quick { host, port, user } => {
                self.quick(key, host, port, user, sink).await
            }
            BotCommand::Disconnect => match self.registry.disconnect(&key).await {
                Some(host) => format!("✅ Disconnected from {}", host),
                None => "No active SSH connection.".to_string(),
            },
            BotCommand::Status => self.status(&key).await,
            BotCommand::Send(raw) => match self.registry.send_raw(&key, &raw).await {
                Ok(n) => format!("Sent {} bytes.", n),
                Err(CoreError::NotConnected { .. }) => NO_SESSION.to_string(),
                Err(e) => e.user_message(),
            },
            BotCommand::SetDefault(name) => {
                let Some(catalog) = &self.catalog else {
                    return NO_CATALOG.to_string();
                };
                match catalog.set_default(owner_id, &name).await {
                    Ok(()) => format!("⭐ Connection '{}' is now your default.", name),
                    Err(e) => e.user_message(),
                }
            }
            BotCommand::Delete(name) => {
                let Some(catalog) = &self.catalog else {
                    return NO_CATALOG.to_string();
                };
                match catalog.delete(owner_id, &name).await {
                    Ok(true) => format!("🗑️ Connection '{}' deleted.", name),
                    Ok(false) => format!("Connection '{}' not found.", name),
                    Err(e) => e.user_message(),
                }
            }
            BotCommand::WebApp => self.webapp(&key).await,
        }
    }

    async fn connections(&self, owner_id: i64) -> String {
        let Some(catalog) = &self.catalog else {
            return NO_CATALOG.to_string();
        };
        match catalog.list(owner_id).await {
            Ok(list) if list.is_empty() => "You don't have any saved connections yet.\n\
                 Add one on the server with `termbridge connection add`."
                .to_string(),
            Ok(list) => {
                let mut lines = vec!["Your SSH Connections:".to_string(), String::new()];
                for conn in &list {
                    let star = if conn.is_default { "⭐ " } else { "" };
                    lines.push(format!("{}{} - {}", star, conn.name, conn.address()));
                }
                lines.join("\n")
            }
            Err(e) => e.user_message(),
        }
    }

    async fn connect_saved(
        &self,
        owner_id: i64,
        key: SessionKey,
        name: Option<String>,
        sink: Sink,
    ) -> String {
        let name = match name {
            Some(name) => name,
            None => {
                let Some(catalog) = &self.catalog else {
                    return CONNECT_USAGE.to_string();
                };
                match catalog.default_connection(owner_id).await {
                    Ok(Some(conn)) => conn.name,
                    Ok(None) => {
                        return format!("No default connection is set.\n{}", CONNECT_USAGE)
                    }
                    Err(e) => return e.user_message(),
                }
            }
        };

        info!(session_key = %key, connection = %name, "Connecting to saved server");
        let target = ConnectTarget::Saved {
            owner_id,
            name: name.clone(),
        };
        self.start(key, target, &name, sink).await
    }

    async fn quick(
        &self,
        key: SessionKey,
        host: String,
        port: Option<u16>,
        user: Option<String>,
        sink: Sink,
    ) -> String {
        if !self.settings.allow_quick_connect {
            return "Quick connect is disabled.".to_string();
        }
        let port = port.unwrap_or(self.settings.default_port);
        let user = user.unwrap_or_else(|| self.settings.default_user.clone());
        let target = match SshTarget::new(host, port, user) {
            Ok(target) => target,
            Err(e) => return e.user_message(),
        };
        let label = target.destination();
        info!(session_key = %key, target = %label, "Quick connect");
        self.start(key, ConnectTarget::Manual(target), &label, sink)
            .await
    }

    async fn start(&self, key: SessionKey, target: ConnectTarget, label: &str, sink: Sink) -> String {
        match self.registry.connect(key, target, sink).await {
            Ok(session) => match session.state() {
                SessionState::Authenticated => {
                    format!("✅ Connected to {}\n({})", label, session.target().address())
                }
                _ => "🔐 Authentication required. Please enter your password:".to_string(),
            },
            Err(e) => e.user_message(),
        }
    }

    async fn status(&self, key: &SessionKey) -> String {
        let Some(info) = self.registry.status(key).await else {
            return "🔴 No active SSH connection".to_string();
        };
        let mut lines = vec![format!("🟢 Connected to {}", info.target.address())];
        if let Some(name) = &info.target.connection {
            lines.push(format!("Connection: {}", name));
        }
        lines.push(format!("State: {}", info.state.label()));
        lines.push(format!(
            "Since: {}",
            info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        lines.push(format!("Idle: {}s", info.idle.as_secs()));
        lines.join("\n")
    }

    async fn webapp(&self, key: &SessionKey) -> String {
        let Some(base) = &self.settings.web_url else {
            return "Web terminal is not configured.".to_string();
        };
        let Some(session) = self.registry.get(key).await else {
            return NO_SESSION.to_string();
        };
        format!(
            "🌐 Web terminal for this session:\n{}/ws/{}\n\nThe link is valid while the session is open.",
            base.trim_end_matches('/'),
            session.attach_token()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use termbridge_core::{
        ChatTransport, EngineConfig, MemoryCredentialStore, MessageId, NewConnection,
        TransportError,
    };
    use termbridge_crypto::{KdfParams, OwnerVault};

    #[derive(Default)]
    struct Silent {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatTransport for Silent {
        async fn send_message(&self, text: &str) -> Result<MessageId, TransportError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(1)
        }

        async fn edit_message(&self, _id: MessageId, text: &str) -> Result<(), TransportError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_file(&self, _: &str, _: Vec<u8>, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn sink() -> Sink {
        Sink::Chat(Arc::new(Silent::default()))
    }

    async fn context(settings: BotSettings) -> CommandContext {
        let vault = Arc::new(OwnerVault::with_params("base", KdfParams::light()));
        let store = Arc::new(MemoryCredentialStore::new(vault));
        store
            .save(NewConnection::password(7, "alpha", "alpha.example", 22, "root", "pw"))
            .await
            .unwrap();
        store
            .save(NewConnection::password(7, "beta", "beta.example", 2222, "admin", "pw"))
            .await
            .unwrap();
        let registry = SessionRegistry::new(
            EngineConfig::default(),
            Some(store.clone() as Arc<dyn termbridge_core::CredentialStore>),
        );
        CommandContext::new(registry, Some(store as Arc<dyn ConnectionCatalog>), settings)
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/help@termbot"), Some(BotCommand::Help));
        assert_eq!(BotCommand::parse("/STATUS"), Some(BotCommand::Status));
        assert_eq!(BotCommand::parse("ls -la"), None);
        assert_eq!(
            BotCommand::parse("/frobnicate now"),
            Some(BotCommand::Unknown("/frobnicate".into()))
        );
    }

    #[test]
    fn test_parse_connect_with_and_without_name() {
        assert_eq!(BotCommand::parse("/connect"), Some(BotCommand::Connect(None)));
        assert_eq!(
            BotCommand::parse("/connect  prod "),
            Some(BotCommand::Connect(Some("prod".into())))
        );
    }

    #[test]
    fn test_parse_quick() {
        assert_eq!(
            BotCommand::parse("/quick example.com"),
            Some(BotCommand::Quick {
                host: "example.com".into(),
                port: None,
                user: None
            })
        );
        assert_eq!(
            BotCommand::parse("/quick example.com 2222 admin"),
            Some(BotCommand::Quick {
                host: "example.com".into(),
                port: Some(2222),
                user: Some("admin".into())
            })
        );
        assert_eq!(BotCommand::parse("/quick"), Some(BotCommand::Usage(QUICK_USAGE)));
        assert_eq!(
            BotCommand::parse("/quick example.com ssh"),
            Some(BotCommand::Usage(QUICK_USAGE))
        );
        assert_eq!(
            BotCommand::parse("/quick example.com 0"),
            Some(BotCommand::Usage(QUICK_USAGE))
        );
    }

    #[test]
    fn test_send_keeps_raw_text() {
        assert_eq!(
            BotCommand::parse("/send q  "),
            Some(BotCommand::Send("q  ".into()))
        );
        assert_eq!(BotCommand::parse("/send"), Some(BotCommand::Usage(SEND_USAGE)));
    }

    #[test]
    fn test_name_never_contains_arguments() {
        let cmd = BotCommand::parse("/send hunter2").unwrap();
        assert_eq!(cmd.name(), "send");
        assert_eq!(Incoming::parse("hunter2").kind(), "text");
    }

    #[tokio::test]
    async fn test_connections_lists_default_first() {
        let ctx = context(BotSettings::default()).await;
        let reply = ctx
            .handle(7, 100, Incoming::parse("/connections"), sink())
            .await
            .unwrap();
        let alpha = reply.find("⭐ alpha - root@alpha.example:22").unwrap();
        let beta = reply.find("beta - admin@beta.example:2222").unwrap();
        assert!(alpha < beta);

        let other = ctx
            .handle(8, 100, Incoming::parse("/connections"), sink())
            .await
            .unwrap();
        assert!(other.contains("don't have any saved connections"));
    }

    #[tokio::test]
    async fn test_setdefault_and_delete() {
        let ctx = context(BotSettings::default()).await;
        let reply = ctx
            .handle(7, 1, Incoming::parse("/setdefault beta"), sink())
            .await
            .unwrap();
        assert!(reply.contains("now your default"));
        let reply = ctx
            .handle(7, 1, Incoming::parse("/connections"), sink())
            .await
            .unwrap();
        assert!(reply.contains("⭐ beta"));

        let reply = ctx
            .handle(7, 1, Incoming::parse("/setdefault gamma"), sink())
            .await
            .unwrap();
        assert!(reply.contains("not found"));

        let reply = ctx
            .handle(7, 1, Incoming::parse("/delete alpha"), sink())
            .await
            .unwrap();
        assert!(reply.contains("deleted"));
        let reply = ctx
            .handle(7, 1, Incoming::parse("/delete alpha"), sink())
            .await
            .unwrap();
        assert!(reply.contains("not found"));
    }

    #[tokio::test]
    async fn test_session_commands_without_session() {
        let ctx = context(BotSettings::default()).await;
        let reply = ctx.handle(7, 2, Incoming::parse("ls"), sink()).await;
        assert_eq!(reply.as_deref(), Some(NO_SESSION));

        let reply = ctx
            .handle(7, 2, Incoming::parse("/disconnect"), sink())
            .await
            .unwrap();
        assert_eq!(reply, "No active SSH connection.");

        let reply = ctx
            .handle(7, 2, Incoming::parse("/status"), sink())
            .await
            .unwrap();
        assert!(reply.contains("No active SSH connection"));

        let reply = ctx
            .handle(7, 2, Incoming::parse("/send x"), sink())
            .await
            .unwrap();
        assert_eq!(reply, NO_SESSION);
    }

    #[tokio::test]
    async fn test_quick_respects_settings() {
        let settings = BotSettings {
            allow_quick_connect: false,
            ..BotSettings::default()
        };
        let ctx = context(settings).await;
        let reply = ctx
            .handle(7, 3, Incoming::parse("/quick example.com"), sink())
            .await
            .unwrap();
        assert_eq!(reply, "Quick connect is disabled.");

        let ctx = context(BotSettings::default()).await;
        let reply = ctx
            .handle(7, 3, Incoming::parse("/quick -oProxyCommand=x"), sink())
            .await
            .unwrap();
        assert!(reply.contains("Invalid target"));
        assert!(ctx.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_connect_unknown_name() {
        let ctx = context(BotSettings::default()).await;
        let reply = ctx
            .handle(7, 4, Incoming::parse("/connect nope"), sink())
            .await
            .unwrap();
        assert!(reply.contains("Connection 'nope' not found"));

        let reply = ctx
            .handle(9, 4, Incoming::parse("/connect"), sink())
            .await
            .unwrap();
        assert!(reply.contains("No default connection"));
    }

    #[tokio::test]
    async fn test_webapp_requires_configuration() {
        let ctx = context(BotSettings::default()).await;
        let reply = ctx
            .handle(7, 5, Incoming::parse("/webapp"), sink())
            .await
            .unwrap();
        assert_eq!(reply, "Web terminal is not configured.");

        let ctx = context(BotSettings {
            web_url: Some("wss://term.example/".into()),
            ..BotSettings::default()
        })
        .await;
        let reply = ctx
            .handle(7, 5, Incoming::parse("/webapp"), sink())
            .await
            .unwrap();
        assert_eq!(reply, NO_SESSION);
    }
}
