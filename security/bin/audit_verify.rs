//! Audit chain verifier
//!
//! Usage: `vigil-audit [config.toml]` (falls back to `VIGIL_CONFIG`, then to
//! `VIGIL_*` variables). Exits non-zero when the chain does not verify.

use std::error::Error;
use tracing_subscriber::EnvFilter;
use vigil_security::audit_log::{FileAuditStore, IntegrityReport, ViolationKind};
use vigil_security::SecurityConfig;

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("VIGIL_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = match std::env::args().nth(1).or_else(|| std::env::var("VIGIL_CONFIG").ok()) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path);
            SecurityConfig::from_file(path)?
        }
        None => SecurityConfig::from_env()?,
    };

    let path = config
        .audit
        .log_path
        .ok_or("audit log is not persisted; nothing to verify")?;

    let chain = FileAuditStore::read_chain(&path)?;
    tracing::info!(entries = chain.entries.len(), "Verifying audit chain {:?}", path);

    let report = chain.verify();
    match &report {
        IntegrityReport::Intact { entries } => {
            tracing::info!(entries, "Audit chain intact");
        }
        IntegrityReport::Violation { index, kind } => match chain.entries.get(*index) {
            Some(entry) if !matches!(kind, ViolationKind::Unreadable { .. }) => {
                tracing::error!(
                    index,
                    sequence = entry.sequence,
                    timestamp = %entry.timestamp,
                    %kind,
                    "Audit chain integrity violation"
                );
            }
            _ => tracing::error!(index, %kind, "Audit chain integrity violation"),
        },
    }

    report.into_result()?;
    Ok(())
}
