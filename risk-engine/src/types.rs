//! Core types for risk engine

use serde::{Deserialize, Serialize};

/// Risk score (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiskScore(u8);

impl RiskScore {
    /// Create new risk score, clamped to 100
    pub fn new(score: u8) -> Self {
        Self(score.min(100))
    }

    /// Clamp an unbounded sum of contributions
    pub fn from_sum(sum: u32) -> Self {
        Self(sum.min(100) as u8)
    }

    /// Get raw score
    pub fn score(&self) -> u8 {
        self.0
    }

    /// Check if high risk (>= 75)
    pub fn is_high_risk(&self) -> bool {
        self.0 >= 75
    }

    /// Check if medium risk (50-74)
    pub fn is_medium_risk(&self) -> bool {
        (50..75).contains(&self.0)
    }

    /// Check if low risk (< 50)
    pub fn is_low_risk(&self) -> bool {
        self.0 < 50
    }
}

/// Risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
}

impl From<RiskScore> for RiskLevel {
    fn from(score: RiskScore) -> Self {
        if score.is_high_risk() {
            RiskLevel::High
        } else if score.is_medium_risk() {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Snapshot of an inbound request as seen by the scorer
///
/// All fields are optional; absent values are scored fail-closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Origin IP address as received
    pub client_ip: Option<String>,

    /// Device fingerprint supplied by the client
    pub device_fingerprint: Option<String>,

    /// Request timestamp (RFC 3339 or naive ISO-8601)
    pub timestamp: Option<String>,

    /// Geolocation label (country / region code)
    pub location: Option<String>,

    /// Session identifier, carried through to audit records
    pub session_id: Option<String>,

    /// Client user agent, carried through to audit records
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Empty context (every signal missing)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder methods
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    #[allow(missing_docs)]
    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    #[allow(missing_docs)]
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    #[allow(missing_docs)]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[allow(missing_docs)]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[allow(missing_docs)]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Risk factor that contributed to a score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    /// Origin IP flagged by threat intelligence (or unparsable)
    SuspiciousIp,
    /// Device fingerprint absent or flagged
    SuspiciousDevice,
    /// Request outside business hours (or timestamp unusable)
    UnusualTime,
    /// Location absent or anomalous
    UnusualLocation,
    /// Caller-registered signal
    Custom(String),
}

impl RiskFactor {
    /// Stable label for logs and audit details
    pub fn label(&self) -> &str {
        match self {
            RiskFactor::SuspiciousIp => "suspicious_ip",
            RiskFactor::SuspiciousDevice => "suspicious_device",
            RiskFactor::UnusualTime => "unusual_time",
            RiskFactor::UnusualLocation => "unusual_location",
            RiskFactor::Custom(name) => name,
        }
    }
}

/// Risk assessment result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Risk score
    pub risk_score: RiskScore,

    /// Risk level
    pub risk_level: RiskLevel,

    /// Risk factors detected, in evaluation order
    pub risk_factors: Vec<RiskFactor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_clamps() {
        assert_eq!(RiskScore::new(250).score(), 100);
        assert_eq!(RiskScore::from_sum(110).score(), 100);
        assert_eq!(RiskScore::from_sum(90).score(), 90);
    }

    #[test]
    fn test_level_bands() {
        assert_eq!(RiskLevel::from(RiskScore::new(49)), RiskLevel::Low);
        assert_eq!(RiskLevel::from(RiskScore::new(50)), RiskLevel::Medium);
        assert_eq!(RiskLevel::from(RiskScore::new(74)), RiskLevel::Medium);
        assert_eq!(RiskLevel::from(RiskScore::new(75)), RiskLevel::High);
    }
}
