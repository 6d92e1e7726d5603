//! Termbridge Crypto - per-owner encryption for stored SSH secrets.
//!
//! Every owner (chat user) gets a distinct 256-bit key derived from a single
//! base secret:
//! - Argon2id over the base secret with the salt `termbridge:<owner_id>`
//! - AES-256-GCM with a fresh random nonce for every encryption
//! - Tokens are `base64url(version || nonce || ciphertext)`
//! - Derived keys implement `Zeroize` and are wiped on drop

#![forbid(unsafe_code)]

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const TOKEN_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const SALT_PREFIX: &str = "termbridge:";

/// Error types for crypto operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation failed (bad KDF parameters)
    KeyDerivation(String),
    /// Encryption failed
    EncryptionFailed,
    /// Decryption failed (wrong owner, wrong base secret, or tampered data)
    DecryptionFailed,
    /// Invalid token format
    InvalidFormat(String),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyDerivation(msg) => write!(f, "key derivation failed: {}", msg),
            Self::EncryptionFailed => write!(f, "encryption failed"),
            Self::DecryptionFailed => write!(f, "decryption failed"),
            Self::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl KdfParams {
    /// Cheap parameters for tests and constrained hosts. Not for production secrets.
    #[must_use]
    pub fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// AES-256-GCM cipher bound to a single owner.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct OwnerCipher {
    key: [u8; 32],
}

impl OwnerCipher {
    /// Create a cipher from a raw 256-bit key.
    pub fn from_key(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt plaintext with a fresh random nonce into a URL-safe token.
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::EncryptionFailed)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut raw = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        raw.push(TOKEN_VERSION);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decrypt a token produced by [`OwnerCipher::seal`].
    pub fn open(&self, token: &str) -> Result<Zeroizing<Vec<u8>>> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;

        if raw.len() < 1 + NONCE_LEN {
            return Err(CryptoError::InvalidFormat("token too short".to_string()));
        }
        if raw[0] != TOKEN_VERSION {
            return Err(CryptoError::InvalidFormat(format!(
                "unsupported version: {}",
                raw[0]
            )));
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::DecryptionFailed)?;
        let nonce = Nonce::from_slice(&raw[1..1 + NONCE_LEN]);

        cipher
            .decrypt(nonce, &raw[1 + NONCE_LEN..])
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for OwnerCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derives and caches one [`OwnerCipher`] per owner from a base secret.
pub struct OwnerVault {
    base_secret: Zeroizing<Vec<u8>>,
    params: KdfParams,
    ciphers: Mutex<HashMap<i64, Arc<OwnerCipher>>>,
}

impl OwnerVault {
    /// Create a vault with production KDF parameters.
    pub fn new(base_secret: impl AsRef<[u8]>) -> Self {
        Self::with_params(base_secret, KdfParams::default())
    }

    /// Create a vault with custom KDF parameters.
    pub fn with_params(base_secret: impl AsRef<[u8]>, params: KdfParams) -> Self {
        Self {
            base_secret: Zeroizing::new(base_secret.as_ref().to_vec()),
            params,
            ciphers: Mutex::new(HashMap::new()),
        }
    }

    /// Get (deriving on first use) the cipher for `owner_id`.
    pub fn cipher_for(&self, owner_id: i64) -> Result<Arc<OwnerCipher>> {
        if let Some(cipher) = self
            .ciphers
            .lock()
            .map_err(|_| CryptoError::KeyDerivation("cipher cache poisoned".to_string()))?
            .get(&owner_id)
        {
            return Ok(cipher.clone());
        }

        let cipher = Arc::new(self.derive(owner_id)?);
        self.ciphers
            .lock()
            .map_err(|_| CryptoError::KeyDerivation("cipher cache poisoned".to_string()))?
            .insert(owner_id, cipher.clone());
        Ok(cipher)
    }

    fn derive(&self, owner_id: i64) -> Result<OwnerCipher> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(32),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = format!("{}{}", SALT_PREFIX, owner_id);
        let mut key = [0u8; 32];
        argon2
            .hash_password_into(&self.base_secret, salt.as_bytes(), &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

        let cipher = OwnerCipher::from_key(key);
        key.zeroize();
        Ok(cipher)
    }

    /// Encrypt a UTF-8 secret for `owner_id`.
    pub fn encrypt(&self, plaintext: &str, owner_id: i64) -> Result<String> {
        self.cipher_for(owner_id)?.seal(plaintext.as_bytes())
    }

    /// Decrypt a secret for `owner_id`.
    pub fn decrypt(&self, token: &str, owner_id: i64) -> Result<Zeroizing<String>> {
        let bytes = self.cipher_for(owner_id)?.open(token)?;
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::InvalidFormat("plaintext is not UTF-8".to_string()))
    }
}

impl std::fmt::Debug for OwnerVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerVault")
            .field("base_secret", &"[REDACTED]")
            .field("params", &self.params)
            .finish()
    }
}

/// Generate a random 32-character URL-safe token (session ids, attach tokens).
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut token = URL_SAFE_NO_PAD.encode(bytes);
    token.truncate(32);
    token
}
