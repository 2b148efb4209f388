//! Threat-intelligence and geolocation collaborators
//!
//! Real deployments back these traits with external feeds. Implementations
//! are expected to enforce their own timeouts and report them as
//! [`LookupError::Timeout`]; the scorer never propagates lookup errors.

use std::collections::HashSet;
use std::net::IpAddr;
use thiserror::Error;

/// Collaborator lookup failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    /// Lookup did not complete within the caller-supplied timeout
    #[error("lookup timed out")]
    Timeout,

    /// Feed or service unavailable
    #[error("lookup unavailable: {0}")]
    Unavailable(String),
}

/// IP and device reputation source
pub trait ThreatIntelligence: Send + Sync {
    /// Whether the IP appears in threat feeds
    fn is_suspicious_ip(&self, ip: IpAddr) -> Result<bool, LookupError>;

    /// Whether a (present) device fingerprint has a bad reputation
    fn is_suspicious_device(&self, _fingerprint: &str) -> Result<bool, LookupError> {
        Ok(false)
    }
}

/// Geolocation anomaly source
pub trait GeoIntelligence: Send + Sync {
    /// Whether a (present) location is unusual for this request
    fn is_unusual_location(&self, location: &str, ip: Option<IpAddr>)
        -> Result<bool, LookupError>;
}

/// No threat feed configured: nothing is flagged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThreatIntel;

impl ThreatIntelligence for NoThreatIntel {
    fn is_suspicious_ip(&self, _ip: IpAddr) -> Result<bool, LookupError> {
        Ok(false)
    }
}

/// No geolocation service configured: any present location is usual
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeoIntel;

impl GeoIntelligence for NoGeoIntel {
    fn is_unusual_location(
        &self,
        _location: &str,
        _ip: Option<IpAddr>,
    ) -> Result<bool, LookupError> {
        Ok(false)
    }
}

/// Static blocklist loaded from a threat feed snapshot
#[derive(Debug, Clone, Default)]
pub struct StaticThreatList {
    ips: HashSet<IpAddr>,
    devices: HashSet<String>,
}

impl StaticThreatList {
    /// Create empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a blocked IP
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ips.insert(ip);
        self
    }

    /// Add a blocked device fingerprint
    pub fn with_device(mut self, fingerprint: impl Into<String>) -> Self {
        self.devices.insert(fingerprint.into());
        self
    }

    /// Number of blocked IPs
    pub fn ip_count(&self) -> usize {
        self.ips.len()
    }
}

impl ThreatIntelligence for StaticThreatList {
    fn is_suspicious_ip(&self, ip: IpAddr) -> Result<bool, LookupError> {
        Ok(self.ips.contains(&ip))
    }

    fn is_suspicious_device(&self, fingerprint: &str) -> Result<bool, LookupError> {
        Ok(self.devices.contains(fingerprint))
    }
}

/// Locations the institution normally serves; everything else is unusual
#[derive(Debug, Clone, Default)]
pub struct AllowedRegions {
    regions: HashSet<String>,
}

impl AllowedRegions {
    /// Build from region codes (compared case-insensitively)
    pub fn new<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            regions: regions
                .into_iter()
                .map(|r| r.as_ref().trim().to_uppercase())
                .collect(),
        }
    }
}

impl GeoIntelligence for AllowedRegions {
    fn is_unusual_location(
        &self,
        location: &str,
        _ip: Option<IpAddr>,
    ) -> Result<bool, LookupError> {
        Ok(!self.regions.contains(&location.trim().to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_threat_list() {
        let bad: IpAddr = "203.0.113.7".parse().unwrap();
        let good: IpAddr = "198.51.100.1".parse().unwrap();
        let list = StaticThreatList::new().with_ip(bad).with_device("fp-bad");

        assert_eq!(list.is_suspicious_ip(bad), Ok(true));
        assert_eq!(list.is_suspicious_ip(good), Ok(false));
        assert_eq!(list.is_suspicious_device("fp-bad"), Ok(true));
        assert_eq!(list.is_suspicious_device("fp-good"), Ok(false));
    }

    #[test]
    fn test_allowed_regions_case_insensitive() {
        let geo = AllowedRegions::new(["TR", "de"]);
        assert_eq!(geo.is_unusual_location("tr", None), Ok(false));
        assert_eq!(geo.is_unusual_location(" DE ", None), Ok(false));
        assert_eq!(geo.is_unusual_location("KP", None), Ok(true));
    }
}
