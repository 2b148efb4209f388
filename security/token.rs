//! Session tokens
//!
//! Issues and validates HMAC-signed bearer tokens carrying enforced
//! enterprise claims (issuer, audience, expiry, not-before, unique id).
//! Algorithm, audience, issuer and lifetime come from [`TokenConfig`] and
//! are identical for issue and validate.

use crate::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Claims the service always sets itself
pub const RESERVED_CLAIMS: [&str; 8] = ["sub", "role", "iat", "exp", "nbf", "jti", "aud", "iss"];

/// Token configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Session lifetime in seconds
    pub session_lifetime_secs: i64,

    /// HMAC signing algorithm
    pub algorithm: Algorithm,

    /// Fixed audience
    pub audience: String,

    /// Fixed issuer
    pub issuer: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            session_lifetime_secs: 1800, // 30 minutes
            algorithm: Algorithm::HS512,
            audience: "banking-fraud-detection".to_string(),
            issuer: "verivigil-enterprise".to_string(),
        }
    }
}

impl TokenConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !matches!(
            self.algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(Error::Config(format!(
                "unsupported token algorithm {:?}, expected HS256/HS384/HS512",
                self.algorithm
            )));
        }
        if self.session_lifetime_secs <= 0 {
            return Err(Error::Config(
                "session lifetime must be positive".to_string(),
            ));
        }
        if self.audience.is_empty() || self.issuer.is_empty() {
            return Err(Error::Config(
                "audience and issuer must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Caller-supplied claims
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimsRequest {
    /// Subject (user id)
    pub subject: String,

    /// Role / scope
    pub role: String,

    /// Additional claims; reserved names are ignored
    pub custom: BTreeMap<String, Value>,
}

impl ClaimsRequest {
    /// Claims for a subject and role
    pub fn new(subject: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: role.into(),
            custom: BTreeMap::new(),
        }
    }

    /// Add a custom claim
    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(name.into(), value.into());
        self
    }
}

/// Claims carried by an issued token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject
    pub sub: String,
    /// Role / scope
    pub role: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Not before (unix seconds)
    pub nbf: i64,
    /// Unique token id
    pub jti: String,
    /// Audience
    pub aud: String,
    /// Issuer
    pub iss: String,
    /// Caller custom claims
    #[serde(flatten)]
    pub custom: BTreeMap<String, Value>,
}

/// Token together with the claims it carries
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact signed token
    pub token: String,
    /// Claims inside the token
    pub claims: SessionClaims,
}

/// Session token service
#[derive(Debug, Clone)]
pub struct TokenService {
    config: TokenConfig,
}

impl TokenService {
    /// Create new token service
    pub fn new(config: TokenConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue a token valid from now
    pub fn issue(&self, request: ClaimsRequest, secret: &[u8]) -> Result<IssuedToken> {
        self.issue_at(request, secret, Utc::now())
    }

    /// Issue a token valid from `now`
    pub fn issue_at(
        &self,
        request: ClaimsRequest,
        secret: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        check_secret(secret)?;
        if request.subject.trim().is_empty() {
            return Err(Error::MalformedInput("subject must not be empty".to_string()));
        }

        let issued_at = now.timestamp();
        let mut custom = request.custom;
        custom.retain(|name, _| !RESERVED_CLAIMS.contains(&name.as_str()));

        let claims = SessionClaims {
            sub: request.subject,
            role: request.role,
            iat: issued_at,
            exp: issued_at + self.config.session_lifetime_secs,
            nbf: issued_at,
            jti: token_id(),
            aud: self.config.audience.clone(),
            iss: self.config.issuer.clone(),
            custom,
        };

        let header = Header::new(self.config.algorithm);
        let token = encode(&header, &claims, &EncodingKey::from_secret(secret))
            .map_err(|e| Error::MalformedInput(format!("cannot sign token: {}", e)))?;

        info!(sub = %claims.sub, jti = %claims.jti, exp = claims.exp, "Session token issued");
        Ok(IssuedToken { token, claims })
    }

    /// Validate a token against the current time
    pub fn validate(&self, token: &str, secret: &[u8]) -> Result<SessionClaims> {
        self.validate_at(token, secret, Utc::now())
    }

    /// Validate a token against `now`
    pub fn validate_at(
        &self,
        token: &str,
        secret: &[u8],
        now: DateTime<Utc>,
    ) -> Result<SessionClaims> {
        check_secret(secret)?;

        // Time checks are done below against `now`, without leeway
        let mut validation = Validation::new(self.config.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_audience(&[&self.config.audience]);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "aud", "iss", "sub"]);

        let data = decode::<SessionClaims>(token, &DecodingKey::from_secret(secret), &validation)
            .map_err(|e| {
                let reason = match e.kind() {
                    ErrorKind::InvalidSignature => "signature mismatch".to_string(),
                    ErrorKind::InvalidAudience => "audience mismatch".to_string(),
                    ErrorKind::InvalidIssuer => "issuer mismatch".to_string(),
                    ErrorKind::InvalidAlgorithm => "algorithm mismatch".to_string(),
                    ErrorKind::MissingRequiredClaim(claim) => format!("missing claim {}", claim),
                    _ => format!("malformed token: {}", e),
                };
                debug!(%reason, "Token rejected");
                Error::TokenInvalid(reason)
            })?;

        let claims = data.claims;
        let now = now.timestamp();

        if now >= claims.exp {
            return Err(Error::TokenExpired);
        }
        if now < claims.nbf {
            return Err(Error::TokenNotYetValid);
        }

        Ok(claims)
    }
}

fn check_secret(secret: &[u8]) -> Result<()> {
    if secret.is_empty() {
        return Err(Error::MalformedInput("token secret must not be empty".to_string()));
    }
    Ok(())
}

/// 32 random bytes, base64url
fn token_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef-test-secret";

    fn service() -> TokenService {
        TokenService::new(TokenConfig::default()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_issue_and_validate() {
        let service = service();
        let request = ClaimsRequest::new("user-42", "analyst").with_claim("branch", "IST-01");

        let issued = service.issue_at(request, SECRET, t0()).unwrap();
        let claims = service.validate_at(&issued.token, SECRET, t0()).unwrap();

        assert_eq!(claims, issued.claims);
        assert_eq!(claims.sub, "user-42");
        assert_eq!(claims.role, "analyst");
        assert_eq!(claims.iat, t0().timestamp());
        assert_eq!(claims.nbf, t0().timestamp());
        assert_eq!(claims.exp, t0().timestamp() + 1800);
        assert_eq!(claims.aud, "banking-fraud-detection");
        assert_eq!(claims.iss, "verivigil-enterprise");
        assert_eq!(claims.custom.get("branch"), Some(&json!("IST-01")));
    }

    #[test]
    fn test_enforced_claims_win() {
        let request = ClaimsRequest::new("user-42", "analyst")
            .with_claim("exp", 9_999_999_999i64)
            .with_claim("iss", "attacker");

        let issued = service().issue_at(request, SECRET, t0()).unwrap();
        assert_eq!(issued.claims.exp, t0().timestamp() + 1800);
        assert_eq!(issued.claims.iss, "verivigil-enterprise");
        assert!(issued.claims.custom.is_empty());
    }

    #[test]
    fn test_token_ids_are_unique() {
        let service = service();
        let a = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();
        let b = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_eq!(a.claims.jti.len(), 43);
    }

    #[test]
    fn test_expiry_boundary() {
        let service = service();
        let issued = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();
        let expiry = t0() + Duration::seconds(1800);

        assert!(service
            .validate_at(&issued.token, SECRET, expiry - Duration::seconds(1))
            .is_ok());
        assert!(matches!(
            service.validate_at(&issued.token, SECRET, expiry),
            Err(Error::TokenExpired)
        ));
        assert!(matches!(
            service.validate_at(&issued.token, SECRET, expiry + Duration::hours(1)),
            Err(Error::TokenExpired)
        ));
    }

    #[test]
    fn test_not_yet_valid() {
        let service = service();
        let issued = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();

        assert!(matches!(
            service.validate_at(&issued.token, SECRET, t0() - Duration::seconds(1)),
            Err(Error::TokenNotYetValid)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let service = service();
        let issued = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();

        assert!(matches!(
            service.validate_at(&issued.token, b"another-secret-of-sufficient-size!!", t0()),
            Err(Error::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_audience_and_issuer_mismatch() {
        let issuer = service();
        let issued = issuer.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();

        let other_audience = TokenService::new(TokenConfig {
            audience: "payments".to_string(),
            ..TokenConfig::default()
        })
        .unwrap();
        assert!(matches!(
            other_audience.validate_at(&issued.token, SECRET, t0()),
            Err(Error::TokenInvalid(_))
        ));

        let other_issuer = TokenService::new(TokenConfig {
            issuer: "someone-else".to_string(),
            ..TokenConfig::default()
        })
        .unwrap();
        assert!(matches!(
            other_issuer.validate_at(&issued.token, SECRET, t0()),
            Err(Error::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_algorithm_mismatch() {
        let hs256 = TokenService::new(TokenConfig {
            algorithm: Algorithm::HS256,
            ..TokenConfig::default()
        })
        .unwrap();
        let issued = hs256.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();

        assert!(matches!(
            service().validate_at(&issued.token, SECRET, t0()),
            Err(Error::TokenInvalid(_))
        ));
    }

    #[test]
    fn test_tampered_and_malformed_tokens() {
        let service = service();
        let issued = service.issue_at(ClaimsRequest::new("u", "r"), SECRET, t0()).unwrap();

        let mut parts: Vec<String> = issued.token.split('.').map(str::to_string).collect();
        let forged = ClaimsRequest::new("admin", "superuser");
        let forged = service.issue_at(forged, b"attacker-controlled-secret-value!!", t0()).unwrap();
        parts[1] = forged.token.split('.').nth(1).unwrap().to_string();
        let spliced = parts.join(".");

        for token in [spliced.as_str(), "", "abc", "a.b.c"] {
            assert!(matches!(
                service.validate_at(token, SECRET, t0()),
                Err(Error::TokenInvalid(_))
            ));
        }
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let service = service();
        assert!(matches!(
            service.issue_at(ClaimsRequest::new("u", "r"), b"", t0()),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            service.issue_at(ClaimsRequest::new(" ", "r"), SECRET, t0()),
            Err(Error::MalformedInput(_))
        ));
        assert!(matches!(
            service.validate_at("x.y.z", b"", t0()),
            Err(Error::MalformedInput(_))
        ));
    }

    #[test]
    fn test_non_hmac_algorithm_rejected() {
        let config = TokenConfig {
            algorithm: Algorithm::RS256,
            ..TokenConfig::default()
        };
        assert!(matches!(TokenService::new(config), Err(Error::Config(_))));
    }
}
