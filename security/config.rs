//! Configuration for the trust core

use crate::audit_log::AuditLogConfig;
use crate::credentials::MfaConfig;
use crate::secrets_manager::KeyBackendConfig;
use crate::token::TokenConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vigil_risk_engine::RiskConfig;

/// Trust core configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Session token settings
    pub token: TokenConfig,

    /// One-time code settings
    pub mfa: MfaConfig,

    /// Audit log settings
    pub audit: AuditLogConfig,

    /// Risk scoring settings
    pub risk: RiskConfig,

    /// Key backend
    pub keys: KeyBackendConfig,
}

impl SecurityConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SecurityConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = SecurityConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VIGIL_*` overrides resolved through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("VIGIL_TOKEN_LIFETIME_SECS") {
            self.token.session_lifetime_secs = parse("VIGIL_TOKEN_LIFETIME_SECS", &secs)?;
        }

        if let Some(audience) = lookup("VIGIL_TOKEN_AUDIENCE") {
            self.token.audience = audience;
        }

        if let Some(issuer) = lookup("VIGIL_TOKEN_ISSUER") {
            self.token.issuer = issuer;
        }

        if let Some(skew) = lookup("VIGIL_MFA_SKEW_STEPS") {
            self.mfa.skew_steps = parse("VIGIL_MFA_SKEW_STEPS", &skew)?;
        }

        // Empty path disables persistence
        if let Some(path) = lookup("VIGIL_AUDIT_LOG_PATH") {
            self.audit.log_path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Some(fsync) = lookup("VIGIL_AUDIT_FSYNC") {
            self.audit.fsync = parse("VIGIL_AUDIT_FSYNC", &fsync)?;
        }

        if let Some(offset) = lookup("VIGIL_RISK_UTC_OFFSET_MINUTES") {
            self.risk.business_hours.utc_offset_minutes =
                parse("VIGIL_RISK_UTC_OFFSET_MINUTES", &offset)?;
        }

        if let Some(path) = lookup("VIGIL_KEYS_FILE") {
            let master_key_env = lookup("VIGIL_KEYS_MASTER_KEY_ENV")
                .unwrap_or_else(|| "VIGIL_MASTER_KEY".to_string());
            self.keys = KeyBackendConfig::EncryptedFile {
                path: PathBuf::from(path),
                master_key_env,
            };
        } else if let Some(prefix) = lookup("VIGIL_KEY_PREFIX") {
            self.keys = KeyBackendConfig::Environment { prefix };
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.token.validate()?;
        self.risk.validate()?;

        if !(6..=8).contains(&self.mfa.digits) {
            return Err(Error::Config(format!(
                "one-time codes must have 6-8 digits, got {}",
                self.mfa.digits
            )));
        }
        if self.mfa.step_secs == 0 {
            return Err(Error::Config("one-time code step must be positive".to_string()));
        }
        if self.mfa.secret_bytes < 10 {
            return Err(Error::Config(
                "one-time code secrets must be at least 10 bytes".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {}: {}", name, e)))
}
