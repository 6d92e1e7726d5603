//! SQLite credential store
//!
//! Persists saved connections with their secrets encrypted per owner.
//!
//! ```no_run
//! use std::sync::Arc;
//! use termbridge_core::store::SqliteCredentialStore;
//! use termbridge_crypto::OwnerVault;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let vault = Arc::new(OwnerVault::new("base secret"));
//! let store = SqliteCredentialStore::new("/var/lib/termbridge/connections.db", vault).await?;
//! # Ok(())
//! # }
//! ```

use crate::credentials::{
    open_bundle_blocking, sort_for_listing, AuthKind, ConnectionCatalog, ConnectionDescriptor,
    CredentialStore, NewConnection, SecretBundle,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use termbridge_crypto::OwnerVault;
use tracing::{debug, info};

/// SQLite-backed [`ConnectionCatalog`]
pub struct SqliteCredentialStore {
    pool: SqlitePool,
    vault: Arc<OwnerVault>,
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    owner_id: i64,
    name: String,
    host: String,
    port: i64,
    login_user: String,
    auth_kind: String,
    password_token: Option<String>,
    private_key_token: Option<String>,
    passphrase_token: Option<String>,
    is_default: bool,
    created_at: String,
    last_used_at: Option<String>,
}

impl ConnectionRow {
    fn into_descriptor(self) -> Result<ConnectionDescriptor> {
        let auth_kind = AuthKind::parse(&self.auth_kind)
            .ok_or_else(|| Error::Storage(format!("Unknown auth kind: {}", self.auth_kind)))?;
        let port = u16::try_from(self.port)
            .map_err(|_| Error::Storage(format!("Stored port out of range: {}", self.port)))?;
        Ok(ConnectionDescriptor {
            owner_id: self.owner_id,
            name: self.name,
            host: self.host,
            port,
            login_user: self.login_user,
            auth_kind,
            password_token: self.password_token,
            private_key_token: self.private_key_token,
            passphrase_token: self.passphrase_token,
            is_default: self.is_default,
            created_at: parse_timestamp(&self.created_at)?,
            last_used_at: self
                .last_used_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("Invalid timestamp '{}': {}", value, e)))
}

const SELECT_COLUMNS: &str = "SELECT owner_id, name, host, port, login_user, auth_kind, \
     password_token, private_key_token, passphrase_token, is_default, created_at, last_used_at \
     FROM connections";

impl SqliteCredentialStore {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    ///
    /// Returns error if database creation or schema setup fails.
    pub async fn new(path: impl AsRef<Path>, vault: Arc<OwnerVault>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| Error::Storage(format!("Invalid SQLite path: {}", e)))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect to SQLite: {}", e)))?;

        let store = Self { pool, vault };
        store.init_schema().await?;

        info!(path = %path.display(), "SQLite credential store initialized");
        Ok(store)
    }

    /// Default database location (~/.termbridge/connections.db)
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Storage("Could not determine home directory".to_string()))?;
        Ok(home.join(".termbridge").join("connections.db"))
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS connections (
                owner_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 22,
                login_user TEXT NOT NULL,
                auth_kind TEXT NOT NULL,
                password_token TEXT,
                private_key_token TEXT,
                passphrase_token TEXT,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                PRIMARY KEY (owner_id, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to create connections table: {}", e)))?;

        debug!("SQLite credential schema initialized");
        Ok(())
    }

    async fn fetch(&self, owner_id: i64, name: &str) -> Result<Option<ConnectionDescriptor>> {
        let row: Option<ConnectionRow> =
            sqlx::query_as(&format!("{} WHERE owner_id = ? AND name = ?", SELECT_COLUMNS))
                .bind(owner_id)
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(format!("Failed to load connection: {}", e)))?;
        row.map(ConnectionRow::into_descriptor).transpose()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn resolve(&self, owner_id: i64, name: &str) -> Result<ConnectionDescriptor> {
        self.fetch(owner_id, name).await?.ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })
    }

    async fn secrets(&self, descriptor: &ConnectionDescriptor) -> Result<SecretBundle> {
        open_bundle_blocking(&self.vault, descriptor).await
    }

    async fn touch(&self, owner_id: i64, name: &str) -> Result<()> {
        sqlx::query("UPDATE connections SET last_used_at = ? WHERE owner_id = ? AND name = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(owner_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to update last_used_at: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionCatalog for SqliteCredentialStore {
    async fn save(&self, connection: NewConnection) -> Result<ConnectionDescriptor> {
        connection.validate()?;
        let owner_id = connection.owner_id;

        let is_default = match self.fetch(owner_id, &connection.name).await? {
            Some(existing) => existing.is_default,
            None => {
                let (count,): (i64,) =
                    sqlx::query_as("SELECT COUNT(*) FROM connections WHERE owner_id = ?")
                        .bind(owner_id)
                        .fetch_one(&self.pool)
                        .await
                        .map_err(|e| {
                            Error::Storage(format!("Failed to count connections: {}", e))
                        })?;
                count == 0
            }
        };

        let descriptor = connection
            .seal_blocking(&self.vault, is_default, Utc::now())
            .await?;

        sqlx::query(
            r#"
            INSERT INTO connections (owner_id, name, host, port, login_user, auth_kind,
                password_token, private_key_token, passphrase_token, is_default, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id, name) DO UPDATE SET
                host = excluded.host,
                port = excluded.port,
                login_user = excluded.login_user,
                auth_kind = excluded.auth_kind,
                password_token = excluded.password_token,
                private_key_token = excluded.private_key_token,
                passphrase_token = excluded.passphrase_token
            "#,
        )
        .bind(descriptor.owner_id)
        .bind(&descriptor.name)
        .bind(&descriptor.host)
        .bind(i64::from(descriptor.port))
        .bind(&descriptor.login_user)
        .bind(descriptor.auth_kind.as_str())
        .bind(&descriptor.password_token)
        .bind(&descriptor.private_key_token)
        .bind(&descriptor.passphrase_token)
        .bind(descriptor.is_default)
        .bind(descriptor.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to save connection: {}", e)))?;

        debug!(owner_id, connection = %descriptor.name, "Connection saved to SQLite");
        Ok(descriptor)
    }

    async fn list(&self, owner_id: i64) -> Result<Vec<ConnectionDescriptor>> {
        let rows: Vec<ConnectionRow> =
            sqlx::query_as(&format!("{} WHERE owner_id = ?", SELECT_COLUMNS))
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Storage(format!("Failed to list connections: {}", e)))?;

        let mut list = rows
            .into_iter()
            .map(ConnectionRow::into_descriptor)
            .collect::<Result<Vec<_>>>()?;
        sort_for_listing(&mut list);
        Ok(list)
    }

    async fn delete(&self, owner_id: i64, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connections WHERE owner_id = ? AND name = ?")
            .bind(owner_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete connection: {}", e)))?;

        let deleted = result.rows_affected() > 0;
        debug!(owner_id, connection = %name, deleted, "Connection deleted from SQLite");
        Ok(deleted)
    }

    async fn set_default(&self, owner_id: i64, name: &str) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(format!("Failed to begin transaction: {}", e)))?;

        let updated = sqlx::query(
            "UPDATE connections SET is_default = (name = ?) WHERE owner_id = ?",
        )
        .bind(name)
        .bind(owner_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(format!("Failed to set default: {}", e)))?;

        let (exists,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM connections WHERE owner_id = ? AND name = ?")
                .bind(owner_id)
                .bind(name)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::Storage(format!("Failed to check connection: {}", e)))?;

        if updated.rows_affected() == 0 || exists == 0 {
            tx.rollback()
                .await
                .map_err(|e| Error::Storage(format!("Failed to roll back: {}", e)))?;
            return Err(Error::NotFound {
                name: name.to_string(),
            });
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(format!("Failed to commit default change: {}", e)))?;
        Ok(())
    }

    async fn default_connection(&self, owner_id: i64) -> Result<Option<ConnectionDescriptor>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "{} WHERE owner_id = ? AND is_default = 1 LIMIT 1",
            SELECT_COLUMNS
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(format!("Failed to load default connection: {}", e)))?;
        row.map(ConnectionRow::into_descriptor).transpose()
    }
}
