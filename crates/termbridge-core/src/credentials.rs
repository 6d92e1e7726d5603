//! Credential store - saved connections and their encrypted secrets
//!
//! The session engine only reads through [`CredentialStore`]. Management
//! operations (add, list, delete, default selection) live on
//! [`ConnectionCatalog`] and are used by the CLI and the bot front-end.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use termbridge_crypto::OwnerVault;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// How a saved connection authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// Password typed at the `password:` prompt
    Password,
    /// Private key passed with `-i`, optionally protected by a passphrase
    Key,
}

impl AuthKind {
    /// Stable textual form used in storage
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthKind::Password => "password",
            AuthKind::Key => "key",
        }
    }

    /// Parse the stored textual form
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "password" => Some(AuthKind::Password),
            "key" => Some(AuthKind::Key),
            _ => None,
        }
    }
}

/// A saved connection. Secrets are held as ciphertext tokens only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Owner (chat user id)
    pub owner_id: i64,
    /// Connection name, unique per owner
    pub name: String,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login user
    pub login_user: String,
    /// Authentication method
    pub auth_kind: AuthKind,
    /// Encrypted password
    pub password_token: Option<String>,
    /// Encrypted private key (PEM text)
    pub private_key_token: Option<String>,
    /// Encrypted key passphrase
    pub passphrase_token: Option<String>,
    /// Whether this is the owner's default connection
    pub is_default: bool,
    /// When the connection was created
    pub created_at: DateTime<Utc>,
    /// Last successful connect
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ConnectionDescriptor {
    /// `user@host:port`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}@{}:{}", self.login_user, self.host, self.port)
    }
}

/// Decrypted secrets for one connection. Wiped on drop.
#[derive(Default)]
pub struct SecretBundle {
    /// Password for password-auth connections
    pub password: Option<Zeroizing<String>>,
    /// PEM private key for key-auth connections
    pub private_key: Option<Zeroizing<String>>,
    /// Passphrase protecting the private key
    pub key_passphrase: Option<Zeroizing<String>>,
}

impl SecretBundle {
    /// Bundle with nothing usable in it
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bundle holding just a password
    #[must_use]
    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(Zeroizing::new(password.into())),
            ..Self::default()
        }
    }

    /// Whether no secret is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.private_key.is_none() && self.key_passphrase.is_none()
    }
}

impl std::fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBundle")
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field(
                "key_passphrase",
                &self.key_passphrase.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Plaintext input for [`ConnectionCatalog::save`]
#[derive(Clone)]
pub struct NewConnection {
    /// Owner (chat user id)
    pub owner_id: i64,
    /// Connection name
    pub name: String,
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login user
    pub login_user: String,
    /// Authentication method
    pub auth_kind: AuthKind,
    /// Plain password
    pub password: Option<String>,
    /// Plain PEM private key
    pub private_key: Option<String>,
    /// Plain key passphrase
    pub key_passphrase: Option<String>,
}

impl std::fmt::Debug for NewConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewConnection")
            .field("owner_id", &self.owner_id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("login_user", &self.login_user)
            .field("auth_kind", &self.auth_kind)
            .finish_non_exhaustive()
    }
}

impl NewConnection {
    /// Password-authenticated connection
    pub fn password(
        owner_id: i64,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        login_user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            name: name.into(),
            host: host.into(),
            port,
            login_user: login_user.into(),
            auth_kind: AuthKind::Password,
            password: Some(password.into()),
            private_key: None,
            key_passphrase: None,
        }
    }

    /// Key-authenticated connection
    pub fn key(
        owner_id: i64,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        login_user: impl Into<String>,
        private_key: impl Into<String>,
        key_passphrase: Option<String>,
    ) -> Self {
        Self {
            owner_id,
            name: name.into(),
            host: host.into(),
            port,
            login_user: login_user.into(),
            auth_kind: AuthKind::Key,
            password: None,
            private_key: Some(private_key.into()),
            key_passphrase,
        }
    }

    /// Check fields before anything is persisted
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidTarget("connection name is empty".into()));
        }
        crate::ssh::validate_endpoint(&self.host, self.port, &self.login_user)?;
        match self.auth_kind {
            AuthKind::Password if self.password.is_none() => Err(Error::InvalidTarget(
                "password connection without a password".into(),
            )),
            AuthKind::Key if self.private_key.is_none() => Err(Error::InvalidTarget(
                "key connection without a private key".into(),
            )),
            _ => Ok(()),
        }
    }

    /// [`seal`](Self::seal) on the blocking pool
    pub(crate) async fn seal_blocking(
        self,
        vault: &Arc<OwnerVault>,
        is_default: bool,
        now: DateTime<Utc>,
    ) -> Result<ConnectionDescriptor> {
        let vault = Arc::clone(vault);
        tokio::task::spawn_blocking(move || self.seal(&vault, is_default, now))
            .await
            .map_err(|e| Error::Storage(format!("Secret encryption task failed: {}", e)))?
    }

    /// Encrypt the secrets and produce the stored descriptor
    pub(crate) fn seal(
        self,
        vault: &OwnerVault,
        is_default: bool,
        now: DateTime<Utc>,
    ) -> Result<ConnectionDescriptor> {
        let owner_id = self.owner_id;
        let seal = |value: Option<String>| -> Result<Option<String>> {
            value
                .map(|plain| {
                    let plain = Zeroizing::new(plain);
                    vault
                        .encrypt(&plain, owner_id)
                        .map_err(|e| Error::Storage(e.to_string()))
                })
                .transpose()
        };
        Ok(ConnectionDescriptor {
            owner_id,
            name: self.name,
            host: self.host,
            port: self.port,
            login_user: self.login_user,
            auth_kind: self.auth_kind,
            password_token: seal(self.password)?,
            private_key_token: seal(self.private_key)?,
            passphrase_token: seal(self.key_passphrase)?,
            is_default,
            created_at: now,
            last_used_at: None,
        })
    }
}

/// Read access used by the session engine
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a saved connection by owner and name
    async fn resolve(&self, owner_id: i64, name: &str) -> Result<ConnectionDescriptor>;

    /// Decrypt the secrets for a descriptor.
    ///
    /// Undecryptable fields come back as `None`; the caller treats that as
    /// "no usable secret" and falls back to manual input.
    async fn secrets(&self, descriptor: &ConnectionDescriptor) -> Result<SecretBundle>;

    /// Bump `last_used_at` after a successful login
    async fn touch(&self, owner_id: i64, name: &str) -> Result<()>;
}

/// Management operations on saved connections
#[async_trait]
pub trait ConnectionCatalog: CredentialStore {
    /// Add or replace a connection. An owner's first connection becomes default.
    async fn save(&self, connection: NewConnection) -> Result<ConnectionDescriptor>;

    /// All connections of an owner, default first, then by name
    async fn list(&self, owner_id: i64) -> Result<Vec<ConnectionDescriptor>>;

    /// Delete a connection; returns whether it existed
    async fn delete(&self, owner_id: i64, name: &str) -> Result<bool>;

    /// Make `name` the only default connection of the owner
    async fn set_default(&self, owner_id: i64, name: &str) -> Result<()>;

    /// The owner's default connection, if any
    async fn default_connection(&self, owner_id: i64) -> Result<Option<ConnectionDescriptor>>;
}

/// Decrypt every secret field of a descriptor with the owner's key
pub(crate) fn open_bundle(vault: &OwnerVault, descriptor: &ConnectionDescriptor) -> SecretBundle {
    let open = |field: &str, token: &Option<String>| -> Option<Zeroizing<String>> {
        let token = token.as_ref()?;
        match vault.decrypt(token, descriptor.owner_id) {
            Ok(plain) => Some(plain),
            Err(e) => {
                warn!(
                    owner_id = descriptor.owner_id,
                    connection = %descriptor.name,
                    field,
                    error = %e,
                    "Stored secret could not be decrypted"
                );
                None
            }
        }
    };
    SecretBundle {
        password: open("password", &descriptor.password_token),
        private_key: open("private_key", &descriptor.private_key_token),
        key_passphrase: open("key_passphrase", &descriptor.passphrase_token),
    }
}

/// [`open_bundle`] on the blocking pool: the first use per owner runs the KDF
pub(crate) async fn open_bundle_blocking(
    vault: &Arc<OwnerVault>,
    descriptor: &ConnectionDescriptor,
) -> Result<SecretBundle> {
    let vault = Arc::clone(vault);
    let descriptor = descriptor.clone();
    tokio::task::spawn_blocking(move || open_bundle(&vault, &descriptor))
        .await
        .map_err(|e| Error::Storage(format!("Secret decryption task failed: {}", e)))
}

pub(crate) fn sort_for_listing(connections: &mut [ConnectionDescriptor]) {
    connections.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// In-memory credential store
pub struct MemoryCredentialStore {
    vault: Arc<OwnerVault>,
    connections: RwLock<HashMap<(i64, String), ConnectionDescriptor>>,
}

impl MemoryCredentialStore {
    /// Create an empty store encrypting with `vault`
    pub fn new(vault: Arc<OwnerVault>) -> Self {
        Self {
            vault,
            connections: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn resolve(&self, owner_id: i64, name: &str) -> Result<ConnectionDescriptor> {
        self.connections
            .read()
            .await
            .get(&(owner_id, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    async fn secrets(&self, descriptor: &ConnectionDescriptor) -> Result<SecretBundle> {
        open_bundle_blocking(&self.vault, descriptor).await
    }

    async fn touch(&self, owner_id: i64, name: &str) -> Result<()> {
        if let Some(conn) = self
            .connections
            .write()
            .await
            .get_mut(&(owner_id, name.to_string()))
        {
            conn.last_used_at = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionCatalog for MemoryCredentialStore {
    async fn save(&self, connection: NewConnection) -> Result<ConnectionDescriptor> {
        connection.validate()?;
        let owner_id = connection.owner_id;
        let key = (owner_id, connection.name.clone());

        let mut connections = self.connections.write().await;
        let existing = connections.get(&key);
        let is_default = match existing {
            Some(previous) => previous.is_default,
            None => !connections.keys().any(|(owner, _)| *owner == owner_id),
        };
        let descriptor = connection
            .seal_blocking(&self.vault, is_default, Utc::now())
            .await?;
        connections.insert(key, descriptor.clone());
        debug!(owner_id, connection = %descriptor.name, "Connection saved");
        Ok(descriptor)
    }

    async fn list(&self, owner_id: i64) -> Result<Vec<ConnectionDescriptor>> {
        let mut list: Vec<_> = self
            .connections
            .read()
            .await
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        sort_for_listing(&mut list);
        Ok(list)
    }

    async fn delete(&self, owner_id: i64, name: &str) -> Result<bool> {
        Ok(self
            .connections
            .write()
            .await
            .remove(&(owner_id, name.to_string()))
            .is_some())
    }

    async fn set_default(&self, owner_id: i64, name: &str) -> Result<()> {
        let mut connections = self.connections.write().await;
        if !connections.contains_key(&(owner_id, name.to_string())) {
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        }
        for ((owner, conn_name), conn) in connections.iter_mut() {
            if *owner == owner_id {
                conn.is_default = conn_name == name;
            }
        }
        Ok(())
    }

    async fn default_connection(&self, owner_id: i64) -> Result<Option<ConnectionDescriptor>> {
        Ok(self
            .connections
            .read()
            .await
            .values()
            .find(|c| c.owner_id == owner_id && c.is_default)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use termbridge_crypto::KdfParams;

    fn store() -> MemoryCredentialStore {
        MemoryCredentialStore::new(Arc::new(OwnerVault::with_params(
            "base-secret",
            KdfParams::light(),
        )))
    }

    #[tokio::test]
    async fn test_save_and_resolve() {
        let store = store();
        store
            .save(NewConnection::password(1, "prod", "10.0.0.1", 22, "root", "s3cr3t"))
            .await
            .unwrap();

        let descriptor = store.resolve(1, "prod").await.unwrap();
        assert_eq!(descriptor.host, "10.0.0.1");
        assert_eq!(descriptor.address(), "root@10.0.0.1:22");
        assert!(descriptor.is_default);
        assert_ne!(descriptor.password_token.as_deref(), Some("s3cr3t"));

        let secrets = store.secrets(&descriptor).await.unwrap();
        assert_eq!(secrets.password.as_deref().map(String::as_str), Some("s3cr3t"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_not_found() {
        let store = store();
        assert!(matches!(
            store.resolve(1, "missing").await,
            Err(Error::NotFound { .. })
        ));
        // Owners are isolated
        store
            .save(NewConnection::password(1, "prod", "h", 22, "u", "p"))
            .await
            .unwrap();
        assert!(store.resolve(2, "prod").await.is_err());
    }

    #[tokio::test]
    async fn test_set_default_clears_others() {
        let store = store();
        for name in ["a", "b", "c"] {
            store
                .save(NewConnection::password(7, name, "h", 22, "u", "p"))
                .await
                .unwrap();
        }
        store.set_default(7, "c").await.unwrap();

        let defaults: Vec<_> = store
            .list(7)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "c");
        assert_eq!(store.default_connection(7).await.unwrap().unwrap().name, "c");
        assert_eq!(store.list(7).await.unwrap()[0].name, "c");

        assert!(store.set_default(7, "zzz").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_and_touch() {
        let store = store();
        store
            .save(NewConnection::password(1, "prod", "h", 22, "u", "p"))
            .await
            .unwrap();
        store.touch(1, "prod").await.unwrap();
        assert!(store.resolve(1, "prod").await.unwrap().last_used_at.is_some());

        assert!(store.delete(1, "prod").await.unwrap());
        assert!(!store.delete(1, "prod").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecryptable_secret_is_absent() {
        let store = store();
        let mut descriptor = store
            .save(NewConnection::password(1, "prod", "h", 22, "u", "p"))
            .await
            .unwrap();
        descriptor.owner_id = 2;
        let secrets = store.secrets(&descriptor).await.unwrap();
        assert!(secrets.is_empty());
    }

    #[test]
    fn test_validation() {
        assert!(NewConnection::password(1, "", "h", 22, "u", "p").validate().is_err());
        assert!(NewConnection::password(1, "n", "h", 0, "u", "p").validate().is_err());
        assert!(NewConnection::password(1, "n", "", 22, "u", "p").validate().is_err());
        let mut conn = NewConnection::password(1, "n", "h", 22, "u", "p");
        conn.password = None;
        assert!(conn.validate().is_err());
        assert!(NewConnection::key(1, "n", "h", 22, "u", "KEY", None)
            .validate()
            .is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_key_derivation_leaves_the_runtime_free() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        // Production cost parameters, so derivation takes real time
        let writer = MemoryCredentialStore::new(Arc::new(OwnerVault::new("base-secret")));
        let descriptor = writer
            .save(NewConnection::password(9, "slow", "h", 22, "u", "pw"))
            .await
            .unwrap();

        // A fresh vault has no cached key for owner 9
        let reader = MemoryCredentialStore::new(Arc::new(OwnerVault::new("base-secret")));
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let secrets = reader.secrets(&descriptor).await.unwrap();
        ticker.abort();

        assert_eq!(secrets.password.as_deref().map(String::as_str), Some("pw"));
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_bundle_debug_redacts() {
        let bundle = SecretBundle::with_password("hunter2");
        let debug = format!("{:?}", bundle);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("REDACTED"));
    }
}
