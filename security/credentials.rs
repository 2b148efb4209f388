//! Password hashing and multi-factor codes
//!
//! Passwords are hashed with Argon2id into self-contained PHC strings (salt
//! embedded). Second factors are RFC 6238 time-based one-time codes over a
//! base32 shared secret.

use crate::{Error, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{error, warn};

type HmacSha1 = Hmac<Sha1>;

const BASE32: base32::Alphabet = base32::Alphabet::RFC4648 { padding: false };

/// One-time code configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MfaConfig {
    /// Time step in seconds
    pub step_secs: u64,

    /// Code length (6-8)
    pub digits: u32,

    /// Accepted clock skew in steps, each direction
    pub skew_steps: u32,

    /// Generated secret length in bytes
    pub secret_bytes: usize,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            step_secs: 30,
            digits: 6,
            skew_steps: 1,
            secret_bytes: 20, // 160 bits as recommended by RFC 4226
        }
    }
}

impl MfaConfig {
    fn is_supported(&self) -> bool {
        self.step_secs > 0 && (6..=8).contains(&self.digits) && self.secret_bytes >= 10
    }
}

/// Password and second-factor service
#[derive(Debug, Clone, Default)]
pub struct CredentialService {
    mfa: MfaConfig,
}

impl CredentialService {
    /// Create new credential service
    pub fn new(mfa: MfaConfig) -> Self {
        Self { mfa }
    }

    /// Hash a password
    pub fn hash_password(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(Error::MalformedInput("password must not be empty".to_string()));
        }

        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Password hashing error: {}", e);
                Error::Hashing(e.to_string())
            })
    }

    /// Verify a password against a stored hash
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::MalformedInput(format!("unparsable password hash: {}", e)))?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    /// Generate a new shared secret, base32 encoded
    pub fn generate_mfa_secret(&self) -> String {
        let mut secret = vec![0u8; self.mfa.secret_bytes.max(10)];
        OsRng.fill_bytes(&mut secret);
        base32::encode(BASE32, &secret)
    }

    /// Verify a code against the current time
    ///
    /// `tolerance` is the accepted skew in steps; `None` uses the configured
    /// default. Malformed input yields `false`.
    pub fn verify_one_time_code(&self, secret: &str, code: &str, tolerance: Option<u32>) -> bool {
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        self.verify_one_time_code_at(secret, code, tolerance, now)
    }

    /// Verify a code against `unix_time`
    pub fn verify_one_time_code_at(
        &self,
        secret: &str,
        code: &str,
        tolerance: Option<u32>,
        unix_time: u64,
    ) -> bool {
        if !self.mfa.is_supported() {
            warn!(config = ?self.mfa, "Unsupported one-time code configuration");
            return false;
        }

        let code = code.trim();
        if code.len() != self.mfa.digits as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }

        let key = match decode_secret(secret) {
            Some(key) => key,
            None => return false,
        };

        let tolerance = u64::from(tolerance.unwrap_or(self.mfa.skew_steps));
        let current = unix_time / self.mfa.step_secs;
        let first = current.saturating_sub(tolerance);
        let last = current.saturating_add(tolerance);

        let mut matched = false;
        for counter in first..=last {
            if let Some(expected) = hotp(&key, counter, self.mfa.digits) {
                matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
            }
        }
        matched
    }

    /// Code for `unix_time`, as an authenticator app would display it
    pub fn one_time_code_at(&self, secret: &str, unix_time: u64) -> Result<String> {
        if !self.mfa.is_supported() {
            return Err(Error::Config("unsupported one-time code configuration".to_string()));
        }
        let key = decode_secret(secret)
            .ok_or_else(|| Error::MalformedInput("secret is not base32".to_string()))?;
        hotp(&key, unix_time / self.mfa.step_secs, self.mfa.digits)
            .ok_or_else(|| Error::MalformedInput("unusable secret".to_string()))
    }

    /// `otpauth://` URI for authenticator enrolment
    pub fn provisioning_uri(&self, secret: &str, account: &str, issuer: &str) -> String {
        format!(
            "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm=SHA1&digits={}&period={}",
            uri_escape(issuer),
            uri_escape(account),
            secret,
            uri_escape(issuer),
            self.mfa.digits,
            self.mfa.step_secs
        )
    }
}

fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if normalized.is_empty() {
        return None;
    }
    base32::decode(BASE32, &normalized).filter(|key| !key.is_empty())
}

/// RFC 4226 HOTP with dynamic truncation
fn hotp(key: &[u8], counter: u64, digits: u32) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);

    let code = binary % 10u32.pow(digits);
    Some(format!("{:0width$}", code, width = digits as usize))
}

fn uri_escape(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'@' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
