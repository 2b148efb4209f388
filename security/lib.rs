//! Security Module for VeriVigil
//!
//! Trust core embedded in the transaction-processing backend:
//! - Session tokens with enforced enterprise claims
//! - Tamper-evident audit chain
//! - Composite request risk scoring (via `vigil-risk-engine`)
//! - Record encryption and signing
//! - Password hashing and one-time codes
//! - Key management (environment, encrypted files)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  SecurityGateway                     │
//! ├─────────────────────────────────────────────────────┤
//! │  TokenService  │  CredentialService │  CryptoService │
//! │  RiskEngine    │  KeyManager                         │
//! └─────────────────────────────────────────────────────┘
//!                          ↓
//! ┌─────────────────────────────────────────────────────┐
//! │            AuditLog (hash chain, JSONL)              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Features
//!
//! ## Session Tokens (`token`)
//! - HMAC-signed (HS512 by default)
//! - Fixed issuer and audience
//! - Expiry, not-before and unique id on every token
//! - Distinct expired / not-yet-valid / invalid outcomes
//!
//! ## Audit Logging (`audit_log`)
//! - Append-only log with SHA-256 hash chain
//! - Tamper, reorder and removal detection
//! - Durable JSON-lines store, resumes from its tail
//! - Search and filtering
//!
//! ## Record Protection (`crypto`)
//! - AES-256-GCM with the key id bound as associated data
//! - Ed25519 signatures over canonical JSON
//!
//! ## Credentials (`credentials`)
//! - Argon2id password hashes (PHC strings)
//! - RFC 6238 one-time codes with configurable skew
//!
//! ## Key Management (`secrets_manager`)
//! - Environment and AES-256-GCM encrypted file backends
//! - Key rotation with versioned metadata
//!
//! # Usage Examples
//!
//! ## Gateway
//!
//! ```rust,no_run
//! use vigil_security::{ClaimsRequest, SecurityConfig, SecurityGateway};
//! use vigil_risk_engine::RequestContext;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SecurityConfig::from_file("./vigil.toml")?;
//! let gateway = SecurityGateway::from_config(config)?;
//!
//! // Issue and validate a session token
//! let issued = gateway
//!     .issue_token(ClaimsRequest::new("user-123", "analyst"))
//!     .await?;
//! let context = RequestContext::new().with_ip("192.168.1.1");
//! let claims = gateway.validate_token(&issued.token, &context).await?;
//!
//! // Score the request
//! let assessment = gateway.assess_request(&claims.sub, &context).await?;
//!
//! // Verify integrity
//! let report = gateway.verify_audit_integrity().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Audit Logging
//!
//! ```rust,no_run
//! use vigil_security::audit_log::{
//!     AuditDetail, AuditDraft, AuditEventType, AuditLog, AuditLogConfig, AuditRiskLevel,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = AuditLog::open(&AuditLogConfig::default())?;
//!
//! let entry = log
//!     .append(
//!         AuditDraft::new(AuditEventType::LoginFailure, "user@example.com", AuditRiskLevel::Medium)
//!             .with_ip(Some("192.168.1.1".to_string()))
//!             .with_detail(AuditDetail::new().with_reason("invalid credentials")),
//!     )
//!     .await?;
//!
//! let is_valid = log.verify_integrity().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Security Best Practices
//!
//! 1. **Keys**
//!    - Use the encrypted file backend or a managed environment in production
//!    - Token secrets of at least 32 bytes
//!    - Rotate keys every 90 days
//!
//! 2. **Audit Logging**
//!    - Keep `fsync` enabled
//!    - Run `vigil-audit` on a schedule
//!    - Ship the log to write-once storage

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod audit_log;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod secrets_manager;
pub mod token;

// Re-exports for convenience
pub use audit_log::{
    AuditDetail, AuditDraft, AuditEntry, AuditEventType, AuditLog, AuditLogConfig,
    AuditRiskLevel, IntegrityReport,
};
pub use config::SecurityConfig;
pub use credentials::{CredentialService, MfaConfig};
pub use crypto::{
    CryptoService, EncryptedBlob, PublicKey, RecordSignature, SigningKeyPair, SymmetricKey,
};
pub use error::{Error, Result};
pub use gateway::{LoginAttempt, SecurityGateway};
pub use secrets_manager::{KeyBackendConfig, KeyManager};
pub use token::{ClaimsRequest, IssuedToken, SessionClaims, TokenConfig, TokenService};
