//! Connection store initialization

use super::config::AppConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use termbridge_core::SqliteCredentialStore;
use termbridge_crypto::OwnerVault;
use tracing::info;

/// Open the SQLite connection store described by `config.storage`
pub async fn open_store(config: &AppConfig) -> Result<Arc<SqliteCredentialStore>> {
    let vault = Arc::new(OwnerVault::new(config.storage.encryption_key()?));
    let path = config.storage.database_path()?;
    let store = SqliteCredentialStore::new(&path, vault)
        .await
        .with_context(|| format!("Failed to open connection store at {}", path.display()))?;
    info!(path = %path.display(), "Connection store opened");
    Ok(Arc::new(store))
}
