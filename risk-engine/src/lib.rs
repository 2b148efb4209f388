//! Risk Engine for VeriVigil
//!
//! Composite request risk scoring for the trust core.
//!
//! Every evaluation is a pure function of a [`RequestContext`] snapshot:
//! - Suspicious origin IP (threat intelligence)
//! - Suspicious or absent device fingerprint
//! - Request outside the configured business-hours window
//! - Unusual or unknown geolocation
//!
//! Missing signals are scored fail-closed. Collaborator lookups that fail
//! degrade to the documented defaults instead of surfacing an error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod intel;
pub mod scoring;
pub mod types;

pub use config::{BusinessHours, RiskConfig, RiskWeights};
pub use error::{Error, Result};
pub use intel::{
    AllowedRegions, GeoIntelligence, LookupError, NoGeoIntel, NoThreatIntel, StaticThreatList,
    ThreatIntelligence,
};
pub use scoring::{RiskEngine, RiskSignal};
pub use types::*;
