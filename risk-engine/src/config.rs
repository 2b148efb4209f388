//! Risk scoring configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Weight table for the built-in risk factors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    /// Origin IP flagged by threat intelligence
    pub suspicious_ip: u8,

    /// Device fingerprint absent or flagged
    pub suspicious_device: u8,

    /// Outside business hours
    pub unusual_time: u8,

    /// Location absent or anomalous
    pub unusual_location: u8,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            suspicious_ip: 30,
            suspicious_device: 25,
            unusual_time: 15,
            unusual_location: 20,
        }
    }
}

/// Business-hours window, evaluated at hour granularity
///
/// A request is unusual when its local hour is before `start_hour` or after
/// `end_hour`; the whole `end_hour` hour still counts as business time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessHours {
    /// First business hour (0-23)
    pub start_hour: u32,

    /// Last business hour (0-23)
    pub end_hour: u32,

    /// Reference timezone as an offset from UTC in minutes
    pub utc_offset_minutes: i32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 18,
            utc_offset_minutes: 0,
        }
    }
}

/// Risk engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Factor weights
    pub weights: RiskWeights,

    /// Business-hours window
    pub business_hours: BusinessHours,
}

impl RiskConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let hours = &self.business_hours;
        if hours.start_hour > 23 || hours.end_hour > 23 {
            return Err(Error::InvalidConfig(format!(
                "business hours must be within 0-23, got {}-{}",
                hours.start_hour, hours.end_hour
            )));
        }
        if hours.start_hour > hours.end_hour {
            return Err(Error::InvalidConfig(format!(
                "business hours start {} is after end {}",
                hours.start_hour, hours.end_hour
            )));
        }
        // chrono::FixedOffset accepts strictly less than a day
        if hours.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(Error::InvalidConfig(format!(
                "utc offset out of range: {} minutes",
                hours.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RiskConfig::default();
        assert_eq!(config.weights.suspicious_ip, 30);
        assert_eq!(config.weights.suspicious_device, 25);
        assert_eq!(config.weights.unusual_time, 15);
        assert_eq!(config.weights.unusual_location, 20);
        assert_eq!(config.business_hours.start_hour, 9);
        assert_eq!(config.business_hours.end_hour, 18);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_window() {
        let mut config = RiskConfig::default();
        config.business_hours.start_hour = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_offset() {
        let mut config = RiskConfig::default();
        config.business_hours.utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: RiskConfig = toml::from_str(
            r#"
            [weights]
            suspicious_ip = 50

            [business_hours]
            utc_offset_minutes = 180
            "#,
        )
        .unwrap();

        assert_eq!(config.weights.suspicious_ip, 50);
        assert_eq!(config.weights.unusual_time, 15);
        assert_eq!(config.business_hours.utc_offset_minutes, 180);
        assert_eq!(config.business_hours.start_hour, 9);
    }
}
