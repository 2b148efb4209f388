//! Security gateway
//!
//! Single entry point for the services that call into the trust core. Wires
//! token, credential, crypto and risk services to one shared audit chain and
//! one key manager, and records every consequential decision.

use crate::audit_log::{
    AuditDetail, AuditDraft, AuditEntry, AuditEventType, AuditLog, AuditRiskLevel,
    IntegrityReport,
};
use crate::config::SecurityConfig;
use crate::credentials::CredentialService;
use crate::crypto::{CryptoService, EncryptedBlob, RecordSignature};
use crate::secrets_manager::KeyManager;
use crate::token::{ClaimsRequest, IssuedToken, SessionClaims, TokenService};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use vigil_risk_engine::{RequestContext, RiskAssessment, RiskEngine, RiskLevel, RiskScore};

/// Actor recorded when the caller is not yet known
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Actor recorded for gateway-initiated events
pub const SYSTEM_ACTOR: &str = "system";

/// Login request
#[derive(Debug, Clone, Default)]
pub struct LoginAttempt {
    /// Subject (user id)
    pub subject: String,

    /// Role granted on success
    pub role: String,

    /// Presented password
    pub password: String,

    /// Stored PHC hash for the subject
    pub password_hash: String,

    /// Enrolled second-factor secret, if any
    pub mfa_secret: Option<String>,

    /// Presented one-time code
    pub one_time_code: Option<String>,

    /// Request context
    pub context: RequestContext,
}

/// Trust core facade
#[derive(Debug)]
pub struct SecurityGateway {
    config: SecurityConfig,
    tokens: TokenService,
    crypto: CryptoService,
    credentials: CredentialService,
    risk: RiskEngine,
    audit: Arc<AuditLog>,
    keys: KeyManager,
}

impl SecurityGateway {
    /// Assemble a gateway from explicit collaborators
    pub fn new(config: SecurityConfig, keys: KeyManager, audit: Arc<AuditLog>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            tokens: TokenService::new(config.token.clone())?,
            crypto: CryptoService::new(),
            credentials: CredentialService::new(config.mfa.clone()),
            risk: RiskEngine::new(config.risk.clone())?,
            audit,
            keys,
            config,
        })
    }

    /// Open key backend and audit log described by `config`
    pub fn from_config(config: SecurityConfig) -> Result<Self> {
        let keys = KeyManager::from_config(&config.keys)?;
        let audit = Arc::new(AuditLog::open(&config.audit)?);
        Self::new(config, keys, audit)
    }

    /// Replace the risk engine (e.g. one wired to threat intelligence)
    pub fn with_risk_engine(mut self, engine: RiskEngine) -> Self {
        self.risk = engine;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Shared audit chain
    pub fn audit_log(&self) -> Arc<AuditLog> {
        self.audit.clone()
    }

    /// Key manager
    pub fn key_manager(&self) -> &KeyManager {
        &self.keys
    }

    // ===== Session tokens =====

    /// Issue a session token
    pub async fn issue_token(&self, request: ClaimsRequest) -> Result<IssuedToken> {
        let secret = self.keys.token_secret()?;
        let issued = self.tokens.issue(request, &secret)?;

        self.audit
            .append(
                AuditDraft::new(
                    AuditEventType::TokenIssued,
                    issued.claims.sub.clone(),
                    AuditRiskLevel::Info,
                )
                .with_detail(
                    AuditDetail::new()
                        .with_token_id(issued.claims.jti.clone())
                        .with_attribute("role", issued.claims.role.clone()),
                ),
            )
            .await?;

        Ok(issued)
    }

    /// Validate a presented token, auditing rejections
    pub async fn validate_token(
        &self,
        token: &str,
        context: &RequestContext,
    ) -> Result<SessionClaims> {
        let secret = self.keys.token_secret()?;

        match self.tokens.validate(token, &secret) {
            Ok(claims) => Ok(claims),
            Err(e) => {
                warn!(error = %e, "Session token rejected");
                self.record(
                    contextual(
                        AuditDraft::new(
                            AuditEventType::TokenRejected,
                            ANONYMOUS_ACTOR,
                            AuditRiskLevel::Medium,
                        ),
                        context,
                    )
                    .with_detail(AuditDetail::new().with_reason(e.to_string())),
                )
                .await;
                Err(e)
            }
        }
    }

    // ===== Audit =====

    /// Append a caller-supplied event
    pub async fn append_audit_event(&self, draft: AuditDraft) -> Result<AuditEntry> {
        self.audit.append(draft).await
    }

    /// Verify the audit chain and record the outcome
    pub async fn verify_audit_integrity(&self) -> Result<IntegrityReport> {
        let report = self.audit.verify_report().await;

        let draft = match &report {
            IntegrityReport::Intact { entries } => AuditDraft::new(
                AuditEventType::IntegrityCheckPassed,
                SYSTEM_ACTOR,
                AuditRiskLevel::Info,
            )
            .with_detail(AuditDetail::new().with_attribute("entries", entries.to_string())),
            IntegrityReport::Violation { index, kind } => AuditDraft::new(
                AuditEventType::IntegrityViolation,
                SYSTEM_ACTOR,
                AuditRiskLevel::Critical,
            )
            .with_detail(
                AuditDetail::new()
                    .with_reason(kind.to_string())
                    .with_attribute("index", index.to_string()),
            ),
        };
        self.audit.append(draft).await?;

        Ok(report)
    }

    // ===== Risk =====

    /// Score a request context
    pub fn compute_risk_score(&self, context: &RequestContext) -> RiskScore {
        self.risk.score(context)
    }

    /// Assess a request, auditing high-risk outcomes
    pub async fn assess_request(
        &self,
        actor_id: &str,
        context: &RequestContext,
    ) -> Result<RiskAssessment> {
        let assessment = self.risk.assess(context);

        if assessment.risk_score.is_high_risk() {
            warn!(
                actor = %actor_id,
                score = assessment.risk_score.score(),
                "High-risk request"
            );
            let factors = assessment
                .risk_factors
                .iter()
                .map(|f| f.label().to_string())
                .collect::<Vec<_>>()
                .join(",");

            self.audit
                .append(
                    contextual(
                        AuditDraft::new(
                            AuditEventType::HighRiskRequest,
                            actor_id,
                            AuditRiskLevel::High,
                        ),
                        context,
                    )
                    .with_detail(
                        AuditDetail::new()
                            .with_risk_score(assessment.risk_score.score())
                            .with_attribute("factors", factors),
                    ),
                )
                .await?;
        }

        Ok(assessment)
    }

    // ===== Record protection =====

    /// Encrypt a payload under a named key
    pub fn encrypt_data(&self, plaintext: &[u8], key_name: &str) -> Result<EncryptedBlob> {
        let key = self.keys.symmetric_key(key_name)?;
        self.crypto.encrypt(plaintext, &key)
    }

    /// Decrypt a blob with the key it names, auditing failures
    ///
    /// Blobs produced under an earlier version of a rotated key still open.
    /// An unknown key id is a decryption failure.
    pub async fn decrypt_data(&self, actor_id: &str, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let (result, reason) = match self.keys.symmetric_key_by_id(&blob.key_id) {
            Ok(key) => (self.crypto.decrypt(blob, &key), "authentication failed"),
            Err(Error::KeyNotFound(_)) => (Err(Error::DecryptionFailure), "unknown key"),
            Err(e) => return Err(e),
        };

        if result.is_err() {
            warn!(actor = %actor_id, key_id = %blob.key_id, reason, "Decryption failed");
            self.record(
                AuditDraft::new(
                    AuditEventType::DecryptionFailure,
                    actor_id,
                    AuditRiskLevel::High,
                )
                .with_detail(
                    AuditDetail::new()
                        .with_reason(reason)
                        .with_attribute("key_id", blob.key_id.clone()),
                ),
            )
            .await;
        }
        result
    }

    /// Sign a record with a named signing key
    pub fn sign_record<T: Serialize + ?Sized>(
        &self,
        record: &T,
        key_name: &str,
    ) -> Result<RecordSignature> {
        let key = self.keys.signing_key(key_name)?;
        self.crypto.sign(record, &key)
    }

    /// Verify a record signature against the key it names, auditing failures
    ///
    /// An unknown key id is a failed verification, not an error.
    pub async fn verify_signature<T: Serialize + ?Sized>(
        &self,
        actor_id: &str,
        record: &T,
        signature: &RecordSignature,
    ) -> Result<bool> {
        let (valid, reason) = match self.keys.verifying_key(&signature.key_id) {
            Ok(public_key) => (
                self.crypto.verify(record, signature, &public_key),
                "signature mismatch",
            ),
            Err(Error::KeyNotFound(_)) => (false, "unknown signing key"),
            Err(e) => return Err(e),
        };

        if !valid {
            warn!(actor = %actor_id, key_id = %signature.key_id, reason, "Signature rejected");
            self.audit
                .append(
                    AuditDraft::new(
                        AuditEventType::SignatureFailure,
                        actor_id,
                        AuditRiskLevel::High,
                    )
                    .with_detail(
                        AuditDetail::new()
                            .with_reason(reason)
                            .with_attribute("key_id", signature.key_id.clone()),
                    ),
                )
                .await?;
        }

        Ok(valid)
    }

    /// Rotate a named key, auditing the rotation
    pub async fn rotate_key(&self, actor_id: &str, key_name: &str, material: &[u8]) -> Result<u32> {
        let version = self.keys.rotate(key_name, material)?;

        self.audit
            .append(
                AuditDraft::new(AuditEventType::KeyRotated, actor_id, AuditRiskLevel::Medium)
                    .with_detail(
                        AuditDetail::new()
                            .with_attribute("key_id", key_name)
                            .with_attribute("version", version.to_string()),
                    ),
            )
            .await?;

        Ok(version)
    }

    // ===== Credentials =====

    /// Hash a password
    pub fn hash_password(&self, password: &str) -> Result<String> {
        self.credentials.hash_password(password)
    }

    /// Verify a password
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        self.credentials.verify_password(password, hash)
    }

    /// Generate a second-factor secret
    pub fn generate_mfa_secret(&self) -> String {
        self.credentials.generate_mfa_secret()
    }

    /// Verify a one-time code
    pub fn verify_one_time_code(&self, secret: &str, code: &str, tolerance: Option<u32>) -> bool {
        self.credentials.verify_one_time_code(secret, code, tolerance)
    }

    /// Full login: password, optional second factor, risk, token
    pub async fn authenticate(&self, attempt: LoginAttempt) -> Result<IssuedToken> {
        let context = &attempt.context;

        if attempt.subject.trim().is_empty() {
            return Err(Error::MalformedInput("subject must not be empty".to_string()));
        }

        let password_ok = match self
            .credentials
            .verify_password(&attempt.password, &attempt.password_hash)
        {
            Ok(ok) => ok,
            Err(e) => {
                error!(subject = %attempt.subject, error = %e, "Stored password hash unusable");
                false
            }
        };
        if !password_ok {
            self.reject_login(&attempt.subject, context, "invalid credentials")
                .await;
            return Err(Error::AuthenticationFailed);
        }

        if let Some(secret) = &attempt.mfa_secret {
            let code_ok = attempt
                .one_time_code
                .as_deref()
                .map(|code| self.credentials.verify_one_time_code(secret, code, None))
                .unwrap_or(false);

            if !code_ok {
                self.record(
                    contextual(
                        AuditDraft::new(
                            AuditEventType::MfaFailure,
                            attempt.subject.clone(),
                            AuditRiskLevel::Medium,
                        ),
                        context,
                    )
                    .with_detail(AuditDetail::new().with_reason("one-time code rejected")),
                )
                .await;
                return Err(Error::AuthenticationFailed);
            }
        }

        let assessment = self.assess_request(&attempt.subject, context).await?;

        let mut request = ClaimsRequest::new(attempt.subject.clone(), attempt.role.clone())
            .with_claim("risk_score", assessment.risk_score.score());
        if let Some(session_id) = &context.session_id {
            request = request.with_claim("sid", session_id.clone());
        }
        let issued = self.issue_token(request).await?;

        self.audit
            .append(
                contextual(
                    AuditDraft::new(
                        AuditEventType::LoginSuccess,
                        attempt.subject.clone(),
                        audit_level(assessment.risk_level),
                    ),
                    context,
                )
                .with_detail(
                    AuditDetail::new()
                        .with_risk_score(assessment.risk_score.score())
                        .with_token_id(issued.claims.jti.clone()),
                ),
            )
            .await?;

        info!(subject = %attempt.subject, "Login succeeded");
        Ok(issued)
    }

    async fn reject_login(&self, subject: &str, context: &RequestContext, reason: &str) {
        warn!(subject = %subject, reason, "Login failed");
        self.record(
            contextual(
                AuditDraft::new(AuditEventType::LoginFailure, subject, AuditRiskLevel::Medium),
                context,
            )
            .with_detail(AuditDetail::new().with_reason(reason)),
        )
        .await;
    }

    /// Append on a rejection path; the caller's error wins over an audit failure
    async fn record(&self, draft: AuditDraft) {
        if let Err(e) = self.audit.append(draft).await {
            error!(error = %e, "Failed to record audit event");
        }
    }
}

fn contextual(draft: AuditDraft, context: &RequestContext) -> AuditDraft {
    draft
        .with_session(context.session_id.clone())
        .with_ip(context.client_ip.clone())
        .with_user_agent(context.user_agent.clone())
}

fn audit_level(level: RiskLevel) -> AuditRiskLevel {
    match level {
        RiskLevel::Low => AuditRiskLevel::Low,
        RiskLevel::Medium => AuditRiskLevel::Medium,
        RiskLevel::High => AuditRiskLevel::High,
    }
}
