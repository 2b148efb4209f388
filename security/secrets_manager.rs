//! Key Management
//!
//! Durable source of every key the trust core consumes:
//! - Session token signing secret
//! - Record encryption keys (AES-256)
//! - Record signing keys (Ed25519 seeds)
//!
//! Supports multiple backends:
//! - Environment variables (hex encoded, read only)
//! - Encrypted file storage (AES-256-GCM under a master key)
//! - In-memory (tests, embedding)
//!
//! Keys survive restarts so that data encrypted, signed or chained before a
//! restart stays recoverable and verifiable afterwards.
//!
//! # Key ids and rotation
//!
//! Version 1 of a key is identified by its bare name (`records`); later
//! versions by `<name>:v<N>` (`records:v2`). Rotation archives the outgoing
//! material under `<name>:v<old>` so that blobs and signatures carrying an
//! older id keep resolving. New material is only ever used through the
//! current version.

use crate::crypto::{PublicKey, SigningKeyPair, SymmetricKey};
use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name under which the token signing secret is stored
pub const TOKEN_SECRET_NAME: &str = "token-signing";

/// Minimum token secret length in bytes
pub const MIN_TOKEN_SECRET_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Key id for a version of a named key
pub fn versioned_key_id(name: &str, version: u32) -> String {
    if version <= 1 {
        name.to_string()
    } else {
        archive_name(name, version)
    }
}

/// Split a key id into key name and version
pub fn parse_key_id(key_id: &str) -> (&str, u32) {
    match key_id.rsplit_once(":v") {
        Some((name, version)) if !name.is_empty() => match version.parse::<u32>() {
            Ok(version) if version >= 1 => (name, version),
            _ => (key_id, 1),
        },
        _ => (key_id, 1),
    }
}

/// Backend name holding an archived version
fn archive_name(name: &str, version: u32) -> String {
    format!("{}:v{}", name, version)
}

/// Secret metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretMetadata {
    /// Secret name
    pub name: String,

    /// Secret version, bumped on every rotation
    pub version: u32,

    /// Creation timestamp (unix seconds)
    pub created_at: i64,

    /// Rotation policy (days)
    pub rotation_days: Option<u32>,
}

impl SecretMetadata {
    /// Metadata for a freshly stored secret
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 1,
            created_at: chrono::Utc::now().timestamp(),
            rotation_days: Some(90),
        }
    }
}

/// Key backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum KeyBackendConfig {
    /// Environment variables `<prefix><NAME>` holding hex
    Environment {
        /// Variable prefix
        #[serde(default = "default_env_prefix")]
        prefix: String,
    },

    /// Encrypted file storage
    EncryptedFile {
        /// Store location
        path: PathBuf,
        /// Variable holding the hex master key
        master_key_env: String,
    },
}

fn default_env_prefix() -> String {
    "VIGIL_KEY_".to_string()
}

impl Default for KeyBackendConfig {
    fn default() -> Self {
        KeyBackendConfig::Environment {
            prefix: default_env_prefix(),
        }
    }
}

/// Secrets backend trait
pub trait SecretsBackend: Send + Sync {
    /// Get raw secret bytes by name
    fn get_secret(&self, name: &str) -> Result<Vec<u8>>;

    /// Get secret metadata by name
    fn get_metadata(&self, name: &str) -> Result<SecretMetadata>;

    /// Store a secret
    fn set_secret(&self, name: &str, value: &[u8], metadata: SecretMetadata) -> Result<()>;

    /// Delete secret
    fn delete_secret(&self, name: &str) -> Result<()>;

    /// List all secret names
    fn list_secrets(&self) -> Result<Vec<String>>;

    /// Replace a secret's value, returning the new version
    fn rotate_secret(&self, name: &str, new_value: &[u8]) -> Result<u32>;
}

/// Environment variables backend
#[derive(Debug, Clone)]
pub struct EnvironmentBackend {
    prefix: String,
}

impl EnvironmentBackend {
    /// Create backend reading `<prefix><NAME>` variables
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }

    fn read_only() -> Error {
        Error::KeyBackend("environment backend is read only".to_string())
    }
}

impl SecretsBackend for EnvironmentBackend {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        let var = self.var_name(name);
        let value = std::env::var(&var).map_err(|_| Error::KeyNotFound(name.to_string()))?;
        hex::decode(value.trim())
            .map_err(|e| Error::KeyBackend(format!("{} is not valid hex: {}", var, e)))
    }

    fn get_metadata(&self, name: &str) -> Result<SecretMetadata> {
        // Environment keys are never rotated in place
        std::env::var(self.var_name(name))
            .map(|_| SecretMetadata::new(name))
            .map_err(|_| Error::KeyNotFound(name.to_string()))
    }

    fn set_secret(&self, _name: &str, _value: &[u8], _metadata: SecretMetadata) -> Result<()> {
        Err(Self::read_only())
    }

    fn delete_secret(&self, _name: &str) -> Result<()> {
        Err(Self::read_only())
    }

    fn list_secrets(&self) -> Result<Vec<String>> {
        Ok(std::env::vars()
            .filter_map(|(k, _)| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }

    fn rotate_secret(&self, _name: &str, _new_value: &[u8]) -> Result<u32> {
        Err(Self::read_only())
    }
}

/// In-memory backend
#[derive(Default)]
pub struct MemoryBackend {
    secrets: RwLock<HashMap<String, (SecretMetadata, Vec<u8>)>>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("secrets", &self.secrets.read().len())
            .finish()
    }
}

impl MemoryBackend {
    /// Create empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretsBackend for MemoryBackend {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        self.secrets
            .read()
            .get(name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    fn get_metadata(&self, name: &str) -> Result<SecretMetadata> {
        self.secrets
            .read()
            .get(name)
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    fn set_secret(&self, name: &str, value: &[u8], metadata: SecretMetadata) -> Result<()> {
        self.secrets
            .write()
            .insert(name.to_string(), (metadata, value.to_vec()));
        Ok(())
    }

    fn delete_secret(&self, name: &str) -> Result<()> {
        self.secrets
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    fn list_secrets(&self) -> Result<Vec<String>> {
        Ok(self.secrets.read().keys().cloned().collect())
    }

    fn rotate_secret(&self, name: &str, new_value: &[u8]) -> Result<u32> {
        let mut secrets = self.secrets.write();
        let (metadata, value) = secrets
            .get_mut(name)
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))?;
        metadata.version += 1;
        metadata.created_at = chrono::Utc::now().timestamp();
        *value = new_value.to_vec();
        Ok(metadata.version)
    }
}

/// Secret as persisted by the encrypted file backend
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSecret {
    metadata: SecretMetadata,

    /// Hex of nonce || ciphertext
    value: String,
}

/// Encrypted file backend
///
/// Mutations are applied to a copy of the map and only become visible once
/// the copy has been written to disk.
pub struct EncryptedFileBackend {
    file_path: PathBuf,
    cipher: Aes256Gcm,
    secrets: RwLock<HashMap<String, StoredSecret>>,
}

impl fmt::Debug for EncryptedFileBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFileBackend")
            .field("file_path", &self.file_path)
            .field("secrets", &self.secrets.read().len())
            .finish_non_exhaustive()
    }
}

impl EncryptedFileBackend {
    /// Open (or start) an encrypted store
    pub fn new(file_path: PathBuf, master_key: &[u8; 32]) -> Result<Self> {
        let key = Key::<Aes256Gcm>::from_slice(master_key);
        let cipher = Aes256Gcm::new(key);

        let secrets = if file_path.exists() {
            Self::load_secrets(&file_path, &cipher)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            file_path,
            cipher,
            secrets: RwLock::new(secrets),
        })
    }

    /// Load secrets from encrypted file
    fn load_secrets(path: &Path, cipher: &Aes256Gcm) -> Result<HashMap<String, StoredSecret>> {
        let encrypted_data = std::fs::read(path)?;
        if encrypted_data.is_empty() {
            return Ok(HashMap::new());
        }

        let decrypted = open_sealed(cipher, &encrypted_data)
            .map_err(|_| Error::KeyBackend(format!("cannot decrypt key store {:?}", path)))?;

        Ok(serde_json::from_slice(&decrypted)?)
    }

    /// Save secrets to encrypted file
    fn save_secrets(&self, secrets: &HashMap<String, StoredSecret>) -> Result<()> {
        let serialized = serde_json::to_vec(secrets)?;
        let data = seal(&self.cipher, &serialized)?;

        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Replace atomically so a crash never leaves a torn store
        let tmp = self.file_path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.file_path)?;

        Ok(())
    }
}

fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let encrypted = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::KeyBackend(format!("encryption failed: {}", e)))?;

    // Prepend nonce to ciphertext
    let mut data = Vec::with_capacity(NONCE_LEN + encrypted.len());
    data.extend_from_slice(&nonce);
    data.extend_from_slice(&encrypted);
    Ok(data)
}

fn open_sealed(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(Error::DecryptionFailure);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::DecryptionFailure)
}

impl SecretsBackend for EncryptedFileBackend {
    fn get_secret(&self, name: &str) -> Result<Vec<u8>> {
        let secrets = self.secrets.read();
        let secret = secrets
            .get(name)
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))?;

        let sealed = hex::decode(&secret.value)
            .map_err(|e| Error::KeyBackend(format!("corrupt entry {}: {}", name, e)))?;
        open_sealed(&self.cipher, &sealed)
            .map_err(|_| Error::KeyBackend(format!("cannot decrypt entry {}", name)))
    }

    fn get_metadata(&self, name: &str) -> Result<SecretMetadata> {
        self.secrets
            .read()
            .get(name)
            .map(|secret| secret.metadata.clone())
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))
    }

    fn set_secret(&self, name: &str, value: &[u8], metadata: SecretMetadata) -> Result<()> {
        let sealed = seal(&self.cipher, value)?;

        let mut secrets = self.secrets.write();
        let mut updated = secrets.clone();
        updated.insert(
            name.to_string(),
            StoredSecret {
                metadata,
                value: hex::encode(sealed),
            },
        );
        self.save_secrets(&updated)?;
        *secrets = updated;

        info!("Secret set: {}", name);
        Ok(())
    }

    fn delete_secret(&self, name: &str) -> Result<()> {
        let mut secrets = self.secrets.write();
        let mut updated = secrets.clone();
        if updated.remove(name).is_none() {
            return Err(Error::KeyNotFound(name.to_string()));
        }
        self.save_secrets(&updated)?;
        *secrets = updated;

        info!("Secret deleted: {}", name);
        Ok(())
    }

    fn list_secrets(&self) -> Result<Vec<String>> {
        Ok(self.secrets.read().keys().cloned().collect())
    }

    fn rotate_secret(&self, name: &str, new_value: &[u8]) -> Result<u32> {
        let sealed = seal(&self.cipher, new_value)?;

        let mut secrets = self.secrets.write();
        let mut updated = secrets.clone();
        let secret = updated
            .get_mut(name)
            .ok_or_else(|| Error::KeyNotFound(name.to_string()))?;

        secret.metadata.version += 1;
        secret.metadata.created_at = chrono::Utc::now().timestamp();
        secret.value = hex::encode(sealed);
        let version = secret.metadata.version;

        self.save_secrets(&updated)?;
        *secrets = updated;

        info!("Secret rotated: {} (version {})", name, version);
        Ok(version)
    }
}

/// Typed access to key material over a secrets backend
pub struct KeyManager {
    backend: Box<dyn SecretsBackend>,
}

impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager").finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Wrap any backend
    pub fn new(backend: Box<dyn SecretsBackend>) -> Self {
        Self { backend }
    }

    /// Environment variables backend
    pub fn with_environment(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        info!("Using environment key backend (prefix {})", prefix);
        Self::new(Box::new(EnvironmentBackend::new(prefix)))
    }

    /// Encrypted file backend
    pub fn with_encrypted_file(path: PathBuf, master_key: &[u8; 32]) -> Result<Self> {
        info!("Using encrypted file key backend: {:?}", path);
        Ok(Self::new(Box::new(EncryptedFileBackend::new(
            path, master_key,
        )?)))
    }

    /// In-memory backend
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()))
    }

    /// Create from configuration
    pub fn from_config(config: &KeyBackendConfig) -> Result<Self> {
        match config {
            KeyBackendConfig::Environment { prefix } => Ok(Self::with_environment(prefix.clone())),
            KeyBackendConfig::EncryptedFile {
                path,
                master_key_env,
            } => {
                // Load master key from environment
                let master_key_hex = std::env::var(master_key_env).map_err(|_| {
                    Error::Config(format!("Missing master key env var: {}", master_key_env))
                })?;

                let master_key_bytes = hex::decode(master_key_hex.trim())
                    .map_err(|e| Error::Config(format!("Invalid master key hex: {}", e)))?;

                let master_key: [u8; 32] = master_key_bytes
                    .try_into()
                    .map_err(|_| Error::Config("Master key must be 32 bytes".to_string()))?;

                Self::with_encrypted_file(path.clone(), &master_key)
            }
        }
    }

    /// Store key material under `name`
    pub fn store(&self, name: &str, material: &[u8]) -> Result<()> {
        self.backend
            .set_secret(name, material, SecretMetadata::new(name))
    }

    /// Replace key material, returning the new version
    ///
    /// The outgoing material stays readable under its versioned id.
    pub fn rotate(&self, name: &str, material: &[u8]) -> Result<u32> {
        let metadata = self.backend.get_metadata(name)?;
        let previous = self.backend.get_secret(name)?;

        let archived = archive_name(name, metadata.version);
        let archived_metadata = SecretMetadata {
            name: archived.clone(),
            rotation_days: None,
            ..metadata
        };
        self.backend
            .set_secret(&archived, &previous, archived_metadata)?;

        let version = self.backend.rotate_secret(name, material)?;
        info!(
            key = %name,
            version,
            archived = %archived,
            "Key rotated"
        );
        Ok(version)
    }

    /// Remove the current version of a key
    pub fn delete(&self, name: &str) -> Result<()> {
        self.backend.delete_secret(name)
    }

    /// Names of stored keys, archived versions included
    pub fn list(&self) -> Result<Vec<String>> {
        self.backend.list_secrets()
    }

    /// Current version of a key as `(key id, material)`
    fn current(&self, name: &str) -> Result<(String, Vec<u8>)> {
        let metadata = self.backend.get_metadata(name)?;
        let material = self.backend.get_secret(name)?;
        Ok((versioned_key_id(name, metadata.version), material))
    }

    /// Material for any live or archived key id
    fn resolve(&self, key_id: &str) -> Result<Vec<u8>> {
        let (name, version) = parse_key_id(key_id);

        let archived = match self.backend.get_metadata(name) {
            Ok(metadata) if metadata.version == version => return self.backend.get_secret(name),
            Ok(_) | Err(Error::KeyNotFound(_)) => archive_name(name, version),
            Err(e) => return Err(e),
        };

        self.backend.get_secret(&archived).map_err(|e| match e {
            Error::KeyNotFound(_) => Error::KeyNotFound(key_id.to_string()),
            other => other,
        })
    }

    /// Current AES-256 key for record encryption
    pub fn symmetric_key(&self, name: &str) -> Result<SymmetricKey> {
        let (key_id, bytes) = self.current(name)?;
        SymmetricKey::from_slice(key_id, &bytes)
    }

    /// AES-256 key for a key id carried by an encrypted blob
    pub fn symmetric_key_by_id(&self, key_id: &str) -> Result<SymmetricKey> {
        let bytes = self.resolve(key_id)?;
        SymmetricKey::from_slice(key_id, &bytes)
    }

    /// Current Ed25519 key pair for record signing
    pub fn signing_key(&self, name: &str) -> Result<SigningKeyPair> {
        let (key_id, bytes) = self.current(name)?;
        signing_pair(&key_id, bytes)
    }

    /// Public key for a key id carried by a signature
    pub fn verifying_key(&self, key_id: &str) -> Result<PublicKey> {
        let bytes = self.resolve(key_id)?;
        Ok(signing_pair(key_id, bytes)?.public_key())
    }

    /// HMAC secret for session tokens
    pub fn token_secret(&self) -> Result<Vec<u8>> {
        let secret = self.backend.get_secret(TOKEN_SECRET_NAME)?;
        if secret.len() < MIN_TOKEN_SECRET_LEN {
            return Err(Error::Config(format!(
                "token secret must be at least {} bytes",
                MIN_TOKEN_SECRET_LEN
            )));
        }
        Ok(secret)
    }
}

fn signing_pair(key_id: &str, bytes: Vec<u8>) -> Result<SigningKeyPair> {
    let seed: [u8; 32] = bytes.try_into().map_err(|_| {
        Error::KeyBackend(format!("signing key {} must be a 32-byte seed", key_id))
    })?;
    SigningKeyPair::from_seed(key_id, &seed)
}
