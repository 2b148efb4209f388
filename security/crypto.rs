//! Record protection and attestation
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption of arbitrary payloads
//! - Ed25519 signatures over a canonical JSON rendering of records
//! - Key material wrappers handed out by the key manager
//!
//! The service never generates or stores long-term keys. Callers obtain keys
//! from [`crate::secrets_manager::KeyManager`].

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Signature algorithm tag carried by every [`RecordSignature`]
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Encrypted blob format version
pub const BLOB_VERSION: &str = "v1";

const NONCE_LEN: usize = 12;

fn validate_key_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':');
    if valid {
        Ok(())
    } else {
        Err(Error::MalformedInput(format!("invalid key id: {:?}", id)))
    }
}

/// 256-bit symmetric key with its identifier
#[derive(Clone)]
pub struct SymmetricKey {
    id: String,
    material: [u8; 32],
}

impl SymmetricKey {
    /// Wrap key material
    pub fn new(id: impl Into<String>, material: [u8; 32]) -> Result<Self> {
        let id = id.into();
        validate_key_id(&id)?;
        Ok(Self { id, material })
    }

    /// Wrap key material of unchecked length
    pub fn from_slice(id: impl Into<String>, material: &[u8]) -> Result<Self> {
        let material: [u8; 32] = material.try_into().map_err(|_| {
            Error::MalformedInput(format!(
                "symmetric key must be 32 bytes, got {}",
                material.len()
            ))
        })?;
        Self::new(id, material)
    }

    /// Key identifier
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("id", &self.id)
            .field("material", &"<redacted>")
            .finish()
    }
}

/// Ed25519 signing key with its identifier
#[derive(Clone)]
pub struct SigningKeyPair {
    id: String,
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Create from a 32-byte seed
    pub fn from_seed(id: impl Into<String>, seed: &[u8; 32]) -> Result<Self> {
        let id = id.into();
        validate_key_id(&id)?;
        Ok(Self {
            id,
            signing_key: SigningKey::from_bytes(seed),
        })
    }

    /// Key identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Matching public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            id: self.id.clone(),
            key: self.signing_key.verifying_key(),
        }
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("id", &self.id)
            .field("public_key", &hex::encode(self.signing_key.verifying_key().as_bytes()))
            .finish()
    }
}

/// Ed25519 public key with its identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    id: String,
    key: VerifyingKey,
}

impl PublicKey {
    /// Parse a 32-byte encoded public key
    pub fn from_bytes(id: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let id = id.into();
        validate_key_id(&id)?;
        let key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| Error::MalformedInput(format!("invalid public key: {}", e)))?;
        Ok(Self { id, key })
    }

    /// Key identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encoded key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.key.to_bytes()
    }
}

/// Ciphertext plus what is needed to decrypt it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    /// Identifier of the key that produced it
    pub key_id: String,

    /// 96-bit GCM nonce
    pub nonce: [u8; NONCE_LEN],

    /// Ciphertext with trailing authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Compact transport form: `v1.<key_id>.<nonce>.<ciphertext>` (base64url)
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            BLOB_VERSION,
            self.key_id,
            URL_SAFE_NO_PAD.encode(self.nonce),
            URL_SAFE_NO_PAD.encode(&self.ciphertext)
        )
    }

    /// Parse the compact transport form
    pub fn decode(encoded: &str) -> Result<Self> {
        let malformed = |what: &str| Error::MalformedInput(format!("encrypted blob: {}", what));

        let mut parts = encoded.split('.');
        let (version, key_id, nonce, ciphertext) =
            match (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(v), Some(k), Some(n), Some(c), None) => (v, k, n, c),
                _ => return Err(malformed("expected four segments")),
            };

        if version != BLOB_VERSION {
            return Err(malformed("unsupported version"));
        }
        validate_key_id(key_id)?;

        let nonce: [u8; NONCE_LEN] = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|_| malformed("nonce is not base64url"))?
            .try_into()
            .map_err(|_| malformed("nonce must be 12 bytes"))?;
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext)
            .map_err(|_| malformed("ciphertext is not base64url"))?;

        Ok(Self {
            key_id: key_id.to_string(),
            nonce,
            ciphertext,
        })
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EncryptedBlob {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

/// Detached signature over a canonical record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSignature {
    /// Identifier of the signing key pair
    pub key_id: String,

    /// Always [`SIGNATURE_ALGORITHM`]
    pub algorithm: String,

    /// Base64 signature bytes
    pub signature: String,
}

/// Stateless encryption and signing service
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoService;

impl CryptoService {
    /// Create new crypto service
    pub fn new() -> Self {
        Self
    }

    /// Encrypt a payload under `key`
    pub fn encrypt(&self, plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedBlob> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.material));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let aad = associated_data(&key.id);

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::MalformedInput("payload too large to encrypt".to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&nonce);

        Ok(EncryptedBlob {
            key_id: key.id.clone(),
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Decrypt a blob produced by [`CryptoService::encrypt`]
    pub fn decrypt(&self, blob: &EncryptedBlob, key: &SymmetricKey) -> Result<Vec<u8>> {
        if blob.key_id != key.id {
            debug!(blob_key = %blob.key_id, key = %key.id, "Key id mismatch");
            return Err(Error::DecryptionFailure);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.material));
        let aad = associated_data(&key.id);

        cipher
            .decrypt(
                Nonce::from_slice(&blob.nonce),
                Payload {
                    msg: &blob.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::DecryptionFailure)
    }

    /// Sign the canonical form of a record
    pub fn sign<T: Serialize + ?Sized>(
        &self,
        record: &T,
        key: &SigningKeyPair,
    ) -> Result<RecordSignature> {
        let canonical = canonical_json(record)?;
        Ok(self.sign_canonical(&canonical, key))
    }

    /// Sign already-canonical bytes
    pub fn sign_canonical(&self, canonical: &[u8], key: &SigningKeyPair) -> RecordSignature {
        let signature = key.signing_key.sign(canonical);
        RecordSignature {
            key_id: key.id.clone(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            signature: STANDARD.encode(signature.to_bytes()),
        }
    }

    /// Verify a record signature; any mismatch or malformed input is `false`
    pub fn verify<T: Serialize + ?Sized>(
        &self,
        record: &T,
        signature: &RecordSignature,
        public_key: &PublicKey,
    ) -> bool {
        match canonical_json(record) {
            Ok(canonical) => self.verify_canonical(&canonical, signature, public_key),
            Err(e) => {
                debug!(error = %e, "Record cannot be canonicalized");
                false
            }
        }
    }

    /// Verify a signature over already-canonical bytes
    pub fn verify_canonical(
        &self,
        canonical: &[u8],
        signature: &RecordSignature,
        public_key: &PublicKey,
    ) -> bool {
        if signature.algorithm != SIGNATURE_ALGORITHM || signature.key_id != public_key.id {
            return false;
        }

        let bytes = match STANDARD.decode(&signature.signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let dalek_sig = match DalekSignature::from_slice(&bytes) {
            Ok(sig) => sig,
            Err(_) => return false,
        };

        public_key.key.verify(canonical, &dalek_sig).is_ok()
    }
}

fn associated_data(key_id: &str) -> Vec<u8> {
    format!("vigil:{}:{}", BLOB_VERSION, key_id).into_bytes()
}

/// Canonical JSON: object keys sorted, no insignificant whitespace
pub fn canonical_json<T: Serialize + ?Sized>(record: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(record)
        .map_err(|e| Error::MalformedInput(format!("record is not serializable: {}", e)))?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(&map[key], out)?;
            }
            out.push(b'}');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: &str, byte: u8) -> SymmetricKey {
        SymmetricKey::new(id, [byte; 32]).unwrap()
    }

    fn signer(id: &str, byte: u8) -> SigningKeyPair {
        SigningKeyPair::from_seed(id, &[byte; 32]).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let crypto = CryptoService::new();
        let key = key("records", 7);

        for plaintext in [&b""[..], b"iban=TR330006100519786457841326", &[0u8; 4096]] {
            let blob = crypto.encrypt(plaintext, &key).unwrap();
            assert_eq!(crypto.decrypt(&blob, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_nonce_is_fresh() {
        let crypto = CryptoService::new();
        let key = key("records", 7);

        let a = crypto.encrypt(b"same", &key).unwrap();
        let b = crypto.encrypt(b"same", &key).unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let crypto = CryptoService::new();
        let blob = crypto.encrypt(b"secret", &key("records", 1)).unwrap();

        // Same id, different material
        assert!(matches!(
            crypto.decrypt(&blob, &key("records", 2)),
            Err(Error::DecryptionFailure)
        ));

        // Same material, different id
        assert!(matches!(
            crypto.decrypt(&blob, &key("other", 1)),
            Err(Error::DecryptionFailure)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let crypto = CryptoService::new();
        let key = key("records", 9);
        let mut blob = crypto.encrypt(b"amount=100.00", &key).unwrap();

        blob.ciphertext[0] ^= 0x01;
        assert!(matches!(
            crypto.decrypt(&blob, &key),
            Err(Error::DecryptionFailure)
        ));

        let mut blob = crypto.encrypt(b"", &key).unwrap();
        blob.ciphertext.pop();
        assert!(matches!(
            crypto.decrypt(&blob, &key),
            Err(Error::DecryptionFailure)
        ));
    }

    #[test]
    fn test_blob_transport_encoding() {
        let crypto = CryptoService::new();
        let key = key("records-2025", 3);
        let blob = crypto.encrypt(b"payload", &key).unwrap();

        let encoded = blob.encode();
        assert!(encoded.starts_with("v1.records-2025."));

        let decoded: EncryptedBlob = encoded.parse().unwrap();
        assert_eq!(decoded, blob);
        assert_eq!(crypto.decrypt(&decoded, &key).unwrap(), b"payload");
    }

    #[test]
    fn test_blob_decode_rejects_garbage() {
        for bad in [
            "",
            "v1.key.abc",
            "v2.key.AAAAAAAAAAAAAAAA.AAAA",
            "v1.key.AAAA.AAAA",
            "v1.bad key.AAAAAAAAAAAAAAAA.AAAA",
            "v1.key.AAAAAAAAAAAAAAAA.AAAA.extra",
        ] {
            assert!(
                matches!(EncryptedBlob::decode(bad), Err(Error::MalformedInput(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_key_id_validation() {
        assert!(SymmetricKey::new("", [0u8; 32]).is_err());
        assert!(SymmetricKey::new("has.dot", [0u8; 32]).is_err());
        assert!(SymmetricKey::from_slice("short", &[0u8; 16]).is_err());
        assert!(SymmetricKey::new("records:v2", [0u8; 32]).is_ok());
    }

    #[test]
    fn test_debug_redacts_material() {
        let rendered = format!("{:?}", key("records", 0xAB));
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("171"));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": [1, 2], "y": null}});
        let canonical = canonical_json(&a).unwrap();
        assert_eq!(canonical, br#"{"a":{"y":null,"z":[1,2]},"b":1}"#);
    }

    #[test]
    fn test_sign_verify() {
        let crypto = CryptoService::new();
        let pair = signer("tx-signer", 42);
        let record = json!({"transaction_id": "tx-1", "amount": "250.00", "currency": "TRY"});

        let signature = crypto.sign(&record, &pair).unwrap();
        assert_eq!(signature.algorithm, SIGNATURE_ALGORITHM);
        assert!(crypto.verify(&record, &signature, &pair.public_key()));

        // Field order does not matter
        let reordered = json!({"currency": "TRY", "amount": "250.00", "transaction_id": "tx-1"});
        assert!(crypto.verify(&reordered, &signature, &pair.public_key()));
    }

    #[test]
    fn test_flipped_byte_fails() {
        let crypto = CryptoService::new();
        let pair = signer("tx-signer", 42);
        let canonical = canonical_json(&json!({"amount": "250.00"})).unwrap();
        let signature = crypto.sign_canonical(&canonical, &pair);

        for i in 0..canonical.len() {
            let mut flipped = canonical.clone();
            flipped[i] ^= 0x01;
            assert!(!crypto.verify_canonical(&flipped, &signature, &pair.public_key()));
        }
    }

    #[test]
    fn test_verify_rejects_wrong_or_malformed_signature() {
        let crypto = CryptoService::new();
        let pair = signer("tx-signer", 42);
        let record = json!({"amount": "1.00"});
        let signature = crypto.sign(&record, &pair).unwrap();

        // Different key pair under the same id
        let impostor = signer("tx-signer", 43);
        assert!(!crypto.verify(&record, &signature, &impostor.public_key()));

        // Key id mismatch
        let other = signer("other", 42);
        assert!(!crypto.verify(&record, &signature, &other.public_key()));

        let mut bad = signature.clone();
        bad.signature = "not base64!".to_string();
        assert!(!crypto.verify(&record, &bad, &pair.public_key()));

        let mut bad = signature.clone();
        bad.signature = STANDARD.encode([0u8; 10]);
        assert!(!crypto.verify(&record, &bad, &pair.public_key()));

        let mut bad = signature;
        bad.algorithm = "rsa-pss".to_string();
        assert!(!crypto.verify(&record, &bad, &pair.public_key()));
    }

    #[test]
    fn test_public_key_roundtrip() {
        let pair = signer("tx-signer", 5);
        let public = pair.public_key();
        let parsed = PublicKey::from_bytes("tx-signer", &public.to_bytes()).unwrap();
        assert_eq!(parsed, public);
    }
}
