//! Risk scoring engine

use crate::intel::{GeoIntelligence, NoGeoIntel, NoThreatIntel, ThreatIntelligence};
use crate::{
    Error, RequestContext, Result, RiskAssessment, RiskConfig, RiskFactor, RiskLevel, RiskScore,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Additional weighted signal evaluated after the built-in factors
pub trait RiskSignal: Send + Sync {
    /// Factor name reported in assessments
    fn name(&self) -> &str;

    /// Contribution when the signal fires
    fn weight(&self) -> u8;

    /// Whether the signal fires for this context
    fn fires(&self, context: &RequestContext) -> bool;
}

/// Risk scorer
///
/// Holds configuration and collaborators only; every call is independent.
pub struct RiskEngine {
    config: RiskConfig,
    offset: FixedOffset,
    threat_intel: Arc<dyn ThreatIntelligence>,
    geo_intel: Arc<dyn GeoIntelligence>,
    signals: Vec<Arc<dyn RiskSignal>>,
}

impl fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RiskEngine")
            .field("config", &self.config)
            .field("signals", &self.signals.len())
            .finish()
    }
}

impl RiskEngine {
    /// Create new risk engine without external intelligence
    pub fn new(config: RiskConfig) -> Result<Self> {
        config.validate()?;
        let offset = FixedOffset::east_opt(config.business_hours.utc_offset_minutes * 60)
            .ok_or_else(|| Error::InvalidConfig("utc offset out of range".to_string()))?;

        Ok(Self {
            config,
            offset,
            threat_intel: Arc::new(NoThreatIntel),
            geo_intel: Arc::new(NoGeoIntel),
            signals: Vec::new(),
        })
    }

    /// Use a threat-intelligence collaborator
    pub fn with_threat_intel(mut self, intel: Arc<dyn ThreatIntelligence>) -> Self {
        self.threat_intel = intel;
        self
    }

    /// Use a geolocation collaborator
    pub fn with_geo_intel(mut self, intel: Arc<dyn GeoIntelligence>) -> Self {
        self.geo_intel = intel;
        self
    }

    /// Register an additional weighted signal
    pub fn with_signal(mut self, signal: Arc<dyn RiskSignal>) -> Self {
        self.signals.push(signal);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Compute the composite score for a request
    pub fn score(&self, context: &RequestContext) -> RiskScore {
        self.assess(context).risk_score
    }

    /// Compute score, level and contributing factors
    pub fn assess(&self, context: &RequestContext) -> RiskAssessment {
        let weights = &self.config.weights;
        let mut total: u32 = 0;
        let mut risk_factors = Vec::new();

        let ip = present(&context.client_ip).map(|raw| raw.parse::<IpAddr>());

        if self.is_suspicious_ip(ip.as_ref()) {
            total += u32::from(weights.suspicious_ip);
            risk_factors.push(RiskFactor::SuspiciousIp);
        }

        if self.is_suspicious_device(present(&context.device_fingerprint)) {
            total += u32::from(weights.suspicious_device);
            risk_factors.push(RiskFactor::SuspiciousDevice);
        }

        if self.is_unusual_time(present(&context.timestamp)) {
            total += u32::from(weights.unusual_time);
            risk_factors.push(RiskFactor::UnusualTime);
        }

        let parsed_ip = ip.and_then(|r| r.ok());
        if self.is_unusual_location(present(&context.location), parsed_ip) {
            total += u32::from(weights.unusual_location);
            risk_factors.push(RiskFactor::UnusualLocation);
        }

        for signal in &self.signals {
            if signal.fires(context) {
                total += u32::from(signal.weight());
                risk_factors.push(RiskFactor::Custom(signal.name().to_string()));
            }
        }

        let risk_score = RiskScore::from_sum(total);
        debug!(
            score = risk_score.score(),
            raw = total,
            factors = risk_factors.len(),
            "Risk assessed"
        );

        RiskAssessment {
            risk_score,
            risk_level: RiskLevel::from(risk_score),
            risk_factors,
        }
    }

    fn is_suspicious_ip(
        &self,
        ip: Option<&std::result::Result<IpAddr, std::net::AddrParseError>>,
    ) -> bool {
        match ip {
            None => false,
            Some(Err(_)) => {
                debug!("Unparsable client IP");
                true
            }
            Some(Ok(ip)) => self.threat_intel.is_suspicious_ip(*ip).unwrap_or_else(|e| {
                warn!(%ip, error = %e, "Threat intelligence lookup failed, IP not flagged");
                false
            }),
        }
    }

    fn is_suspicious_device(&self, fingerprint: Option<&str>) -> bool {
        match fingerprint {
            None => true,
            Some(fp) => self.threat_intel.is_suspicious_device(fp).unwrap_or_else(|e| {
                warn!(error = %e, "Device reputation lookup failed, device not flagged");
                false
            }),
        }
    }

    fn is_unusual_time(&self, timestamp: Option<&str>) -> bool {
        let hours = &self.config.business_hours;
        match timestamp.and_then(|ts| self.local_hour(ts)) {
            Some(hour) => hour < hours.start_hour || hour > hours.end_hour,
            None => true,
        }
    }

    fn is_unusual_location(&self, location: Option<&str>, ip: Option<IpAddr>) -> bool {
        match location {
            None => true,
            Some(loc) => self.geo_intel.is_unusual_location(loc, ip).unwrap_or_else(|e| {
                warn!(error = %e, "Geolocation lookup failed, location treated as unusual");
                true
            }),
        }
    }

    /// Hour of day in the reference timezone
    fn local_hour(&self, timestamp: &str) -> Option<u32> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
            return Some(dt.with_timezone(&self.offset).hour());
        }

        // Naive timestamps are taken to be in the reference timezone already
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(timestamp, fmt).ok())
            .map(|naive| naive.hour())
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
