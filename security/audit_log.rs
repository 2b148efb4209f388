//! Audit Logging
//!
//! Tamper-evident trail of security decisions:
//! - Authentication (login success/failure, second factor failures)
//! - Session tokens (issued, rejected)
//! - Risk (high-risk requests)
//! - Record protection (signature and decryption failures)
//! - Integrity checks and key rotation
//!
//! Features:
//! - Append-only hash chain (SHA-256, "genesis" sentinel)
//! - Deterministic canonical form for every entry
//! - Single-writer appends, snapshot verification
//! - Durable JSON-lines store that resumes from the real tail
//! - Torn or unparsable lines reported as violations, never fatal on open
//! - Search and filtering
//!
//! # Canonical form
//!
//! An entry's digest is `hex(SHA-256(canonical ++ previous_digest))` where
//! `canonical` is the compact JSON object
//! `{sequence, timestamp, event_type, actor_id, detail, risk_level,
//! session_id, ip_address, user_agent}` in exactly that order. Timestamps
//! are RFC 3339 UTC with microsecond precision and detail attributes are a
//! sorted map. An entry whose stored timestamp carries sub-microsecond
//! digits is not in canonical form and fails verification.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// `previous_digest` of the first entry
pub const GENESIS_DIGEST: &str = "genesis";

/// Current [`AuditDetail`] schema version
pub const DETAIL_SCHEMA_VERSION: u16 = 1;

/// Audit event type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Password (and second factor, if enrolled) accepted
    LoginSuccess,
    /// Password rejected
    LoginFailure,
    /// One-time code rejected
    MfaFailure,

    /// Session token issued
    TokenIssued,
    /// Presented session token rejected
    TokenRejected,

    /// Request scored at or above the high-risk threshold
    HighRiskRequest,

    /// Record signature did not verify
    SignatureFailure,
    /// Blob failed to decrypt
    DecryptionFailure,

    /// Chain verification succeeded
    IntegrityCheckPassed,
    /// Chain verification found a violation
    IntegrityViolation,

    /// Key material replaced by a new version
    KeyRotated,
}

/// Audit risk level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditRiskLevel {
    /// Routine
    Info,
    /// Worth keeping
    Low,
    /// Worth reviewing
    Medium,
    /// Needs attention
    High,
    /// Needs immediate attention
    Critical,
}

/// Structured event detail (closed, versioned schema)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDetail {
    /// Schema version of this structure
    pub schema_version: u16,

    /// Human-readable reason for the decision
    pub reason: Option<String>,

    /// Risk score at decision time
    pub risk_score: Option<u8>,

    /// Session token id involved
    pub token_id: Option<String>,

    /// Additional attributes
    pub attributes: BTreeMap<String, String>,
}

impl Default for AuditDetail {
    fn default() -> Self {
        Self {
            schema_version: DETAIL_SCHEMA_VERSION,
            reason: None,
            risk_score: None,
            token_id: None,
            attributes: BTreeMap::new(),
        }
    }
}

impl AuditDetail {
    /// Empty detail
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the risk score
    pub fn with_risk_score(mut self, score: u8) -> Self {
        self.risk_score = Some(score);
        self
    }

    /// Set the session token id
    pub fn with_token_id(mut self, token_id: impl Into<String>) -> Self {
        self.token_id = Some(token_id.into());
        self
    }

    /// Add (or replace) an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Event waiting to be appended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditDraft {
    /// Event type
    pub event_type: AuditEventType,
    /// Actor (user/service/system); must not be blank
    pub actor_id: String,
    /// Structured detail
    pub detail: AuditDetail,
    /// Risk level
    pub risk_level: AuditRiskLevel,
    /// Session id
    pub session_id: Option<String>,
    /// IP address
    pub ip_address: Option<String>,
    /// User agent
    pub user_agent: Option<String>,
}

impl AuditDraft {
    /// Create new draft
    pub fn new(
        event_type: AuditEventType,
        actor_id: impl Into<String>,
        risk_level: AuditRiskLevel,
    ) -> Self {
        Self {
            event_type,
            actor_id: actor_id.into(),
            detail: AuditDetail::default(),
            risk_level,
            session_id: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// Set the detail
    pub fn with_detail(mut self, detail: AuditDetail) -> Self {
        self.detail = detail;
        self
    }

    /// Set the session id
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the IP address
    pub fn with_ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    /// Set the user agent
    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Sealed audit entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the chain, starting at 0
    pub sequence: u64,

    /// Event timestamp (microsecond precision)
    pub timestamp: DateTime<Utc>,

    /// Event type
    pub event_type: AuditEventType,

    /// Actor (user/service/system)
    pub actor_id: String,

    /// Structured detail
    pub detail: AuditDetail,

    /// Risk level
    pub risk_level: AuditRiskLevel,

    /// Session id
    pub session_id: Option<String>,

    /// IP address
    pub ip_address: Option<String>,

    /// User agent
    pub user_agent: Option<String>,

    /// Digest of the preceding entry, or [`GENESIS_DIGEST`]
    pub previous_digest: String,

    /// Digest of this entry
    pub digest: String,
}

/// Hashed view of an entry; field order is part of the format
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    sequence: u64,
    timestamp: String,
    event_type: AuditEventType,
    actor_id: &'a str,
    detail: &'a AuditDetail,
    risk_level: AuditRiskLevel,
    session_id: Option<&'a str>,
    ip_address: Option<&'a str>,
    user_agent: Option<&'a str>,
}

impl AuditEntry {
    /// Seal a draft onto a chain position
    pub fn seal(
        draft: AuditDraft,
        sequence: u64,
        timestamp: DateTime<Utc>,
        previous_digest: String,
    ) -> Result<Self> {
        let mut entry = Self {
            sequence,
            timestamp: timestamp.trunc_subsecs(6),
            event_type: draft.event_type,
            actor_id: draft.actor_id,
            detail: draft.detail,
            risk_level: draft.risk_level,
            session_id: draft.session_id,
            ip_address: draft.ip_address,
            user_agent: draft.user_agent,
            previous_digest,
            digest: String::new(),
        };
        entry.digest = entry.compute_digest()?;
        Ok(entry)
    }

    /// Canonical bytes covered by the digest (excluding `previous_digest`)
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let canonical = CanonicalEntry {
            sequence: self.sequence,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            event_type: self.event_type,
            actor_id: &self.actor_id,
            detail: &self.detail,
            risk_level: self.risk_level,
            session_id: self.session_id.as_deref(),
            ip_address: self.ip_address.as_deref(),
            user_agent: self.user_agent.as_deref(),
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Recompute the digest from stored fields
    pub fn compute_digest(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes()?);
        hasher.update(self.previous_digest.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// Stored digest matches stored fields, and the fields are canonical
    pub fn verify_digest(&self) -> bool {
        self.has_canonical_timestamp()
            && self
                .compute_digest()
                .map(|digest| digest == self.digest)
                .unwrap_or(false)
    }

    // Digits below a microsecond are outside the hashed form
    fn has_canonical_timestamp(&self) -> bool {
        self.timestamp == self.timestamp.trunc_subsecs(6)
    }
}

/// Why a chain failed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Stored digest does not match the entry's fields
    DigestMismatch,
    /// `previous_digest` does not match the predecessor
    BrokenLink,
    /// Sequence number out of order
    SequenceGap {
        /// Expected sequence
        expected: u64,
        /// Stored sequence
        found: u64,
    },
    /// Persisted line could not be parsed as an entry
    Unreadable {
        /// Line number in the log file, starting at 1
        line: usize,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::DigestMismatch => write!(f, "digest mismatch"),
            ViolationKind::BrokenLink => write!(f, "hash chain broken"),
            ViolationKind::SequenceGap { expected, found } => {
                write!(f, "sequence gap: expected {}, found {}", expected, found)
            }
            ViolationKind::Unreadable { line } => write!(f, "unreadable entry at line {}", line),
        }
    }
}

/// Outcome of a chain verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityReport {
    /// Every entry checked out
    Intact {
        /// Number of entries verified
        entries: usize,
    },
    /// First offending entry
    Violation {
        /// Index within the verified slice
        index: usize,
        /// What did not match
        kind: ViolationKind,
    },
}

impl IntegrityReport {
    /// Whether the chain is consistent
    pub fn is_intact(&self) -> bool {
        matches!(self, IntegrityReport::Intact { .. })
    }

    /// Turn a violation into [`Error::IntegrityViolation`]
    pub fn into_result(self) -> Result<usize> {
        match self {
            IntegrityReport::Intact { entries } => Ok(entries),
            IntegrityReport::Violation { index, kind } => Err(Error::IntegrityViolation {
                index,
                reason: kind.to_string(),
            }),
        }
    }
}

/// Verify a complete chain starting at genesis
pub fn verify_chain(entries: &[AuditEntry]) -> IntegrityReport {
    verify_segment(entries, GENESIS_DIGEST, 0)
}

/// Verify a contiguous segment anchored on a known predecessor
pub fn verify_segment(
    entries: &[AuditEntry],
    anchor_digest: &str,
    first_sequence: u64,
) -> IntegrityReport {
    let mut previous = anchor_digest.to_string();

    for (index, entry) in entries.iter().enumerate() {
        let expected = first_sequence + index as u64;
        if entry.sequence != expected {
            return IntegrityReport::Violation {
                index,
                kind: ViolationKind::SequenceGap {
                    expected,
                    found: entry.sequence,
                },
            };
        }

        if entry.previous_digest != previous {
            return IntegrityReport::Violation {
                index,
                kind: ViolationKind::BrokenLink,
            };
        }

        // Never trust the stored digest
        let recomputed = match entry.compute_digest() {
            Ok(digest) if digest == entry.digest && entry.has_canonical_timestamp() => digest,
            _ => {
                return IntegrityReport::Violation {
                    index,
                    kind: ViolationKind::DigestMismatch,
                }
            }
        };

        previous = recomputed;
    }

    IntegrityReport::Intact {
        entries: entries.len(),
    }
}

/// Persisted line that did not parse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreadableLine {
    /// Chain index the line occupies (entries parsed before it)
    pub index: usize,
    /// Line number in the log file, starting at 1
    pub line: usize,
}

/// Entries recovered from storage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedChain {
    /// Every entry that parsed, in storage order
    pub entries: Vec<AuditEntry>,
    /// First line that did not parse, if any
    pub unreadable: Option<UnreadableLine>,
}

impl LoadedChain {
    /// Verify the recovered entries, counting unreadable lines as violations
    pub fn verify(&self) -> IntegrityReport {
        with_unreadable(verify_chain(&self.entries), self.unreadable)
    }
}

impl From<Vec<AuditEntry>> for LoadedChain {
    fn from(entries: Vec<AuditEntry>) -> Self {
        Self {
            entries,
            unreadable: None,
        }
    }
}

/// Report whichever comes first: a chain violation or an unreadable line
fn with_unreadable(report: IntegrityReport, unreadable: Option<UnreadableLine>) -> IntegrityReport {
    let Some(unreadable) = unreadable else {
        return report;
    };

    match report {
        IntegrityReport::Violation { index, .. } if index < unreadable.index => report,
        _ => IntegrityReport::Violation {
            index: unreadable.index,
            kind: ViolationKind::Unreadable {
                line: unreadable.line,
            },
        },
    }
}

/// Durable storage for the chain
pub trait AuditStore: Send {
    /// Load every persisted entry in order
    fn load(&mut self) -> Result<LoadedChain>;

    /// Persist one sealed entry
    fn append(&mut self, entry: &AuditEntry) -> Result<()>;
}

/// Volatile store (tests, ephemeral deployments)
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: Vec<AuditEntry>,
}

impl MemoryAuditStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a previously exported chain
    pub fn with_entries(entries: Vec<AuditEntry>) -> Self {
        Self { entries }
    }
}

impl AuditStore for MemoryAuditStore {
    fn load(&mut self) -> Result<LoadedChain> {
        Ok(self.entries.clone().into())
    }

    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        self.entries.push(entry.clone());
        Ok(())
    }
}

/// JSON-lines file store
///
/// A failed append is truncated away so later entries start on a fresh line.
#[derive(Debug)]
pub struct FileAuditStore {
    path: PathBuf,
    file: File,
    fsync: bool,
    needs_newline: bool,
}

impl FileAuditStore {
    /// Open (or create) the log file in append mode
    pub fn open(path: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Create parent directory
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        // A torn final line must not swallow the next entry
        let needs_newline = ends_mid_line(&mut file)?;
        if needs_newline {
            warn!("Audit log {:?} ends with a partial line", path);
        }

        Ok(Self {
            path,
            file,
            fsync,
            needs_newline,
        })
    }

    /// Read a chain from a log file without opening it for writing
    ///
    /// Lines that do not parse are skipped; the first one is reported in
    /// [`LoadedChain::unreadable`].
    pub fn read_chain(path: impl AsRef<Path>) -> Result<LoadedChain> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut chain = LoadedChain::default();

        for (number, line) in reader.split(b'\n').enumerate() {
            let line = line?;
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match serde_json::from_slice::<AuditEntry>(&line) {
                Ok(entry) => chain.entries.push(entry),
                Err(e) => {
                    warn!(line = number + 1, error = %e, "Unreadable audit entry in {:?}", path);
                    if chain.unreadable.is_none() {
                        chain.unreadable = Some(UnreadableLine {
                            index: chain.entries.len(),
                            line: number + 1,
                        });
                    }
                }
            }
        }

        Ok(chain)
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, line: &[u8]) -> Result<()> {
        self.file.write_all(line)?;
        self.file.flush()?;
        if self.fsync {
            self.file.sync_data()?;
        }
        Ok(())
    }
}

fn ends_mid_line(file: &mut File) -> Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

impl AuditStore for FileAuditStore {
    fn load(&mut self) -> Result<LoadedChain> {
        Self::read_chain(&self.path)
    }

    fn append(&mut self, entry: &AuditEntry) -> Result<()> {
        let mut line = Vec::new();
        if self.needs_newline {
            line.push(b'\n');
        }
        serde_json::to_writer(&mut line, entry)?;
        line.push(b'\n');

        let len_before = self.file.metadata()?.len();
        if let Err(e) = self.write_line(&line) {
            if let Err(truncate_err) = self.file.set_len(len_before) {
                error!(
                    error = %truncate_err,
                    "Failed to truncate partial audit write in {:?}", self.path
                );
                self.needs_newline = true;
            }
            return Err(e);
        }

        self.needs_newline = false;
        Ok(())
    }
}

/// Audit log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// Log file path; `None` keeps the chain in memory only
    pub log_path: Option<PathBuf>,

    /// fsync after every append
    pub fsync: bool,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            log_path: Some(PathBuf::from("./data/audit.log")),
            fsync: true,
        }
    }
}

/// Search criteria; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Exact event type
    pub event_type: Option<AuditEventType>,
    /// Exact actor
    pub actor_id: Option<String>,
    /// Lowest risk level included
    pub min_risk_level: Option<AuditRiskLevel>,
    /// Earliest timestamp included
    pub start_time: Option<DateTime<Utc>>,
    /// Latest timestamp included
    pub end_time: Option<DateTime<Utc>>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.event_type.map_or(true, |t| entry.event_type == t)
            && self.actor_id.as_ref().map_or(true, |a| &entry.actor_id == a)
            && self.min_risk_level.map_or(true, |l| entry.risk_level >= l)
            && self.start_time.map_or(true, |s| entry.timestamp >= s)
            && self.end_time.map_or(true, |e| entry.timestamp <= e)
    }
}

struct ChainState {
    entries: Vec<AuditEntry>,
    unreadable: Option<UnreadableLine>,
    store: Box<dyn AuditStore>,
}

/// Audit logger
///
/// Appends are serialized by one lock held across sealing, persisting and
/// publishing an entry.
pub struct AuditLog {
    state: Mutex<ChainState>,
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog").finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Open the log described by `config`
    pub fn open(config: &AuditLogConfig) -> Result<Self> {
        match &config.log_path {
            Some(path) => {
                info!("Opening audit log {:?}", path);
                Self::with_store(Box::new(FileAuditStore::open(path, config.fsync)?))
            }
            None => {
                warn!("Audit log is not persisted");
                Ok(Self::in_memory())
            }
        }
    }

    /// Volatile log
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(ChainState {
                entries: Vec::new(),
                unreadable: None,
                store: Box::new(MemoryAuditStore::new()),
            }),
        }
    }

    /// Load the persisted chain and continue from its tail
    pub fn with_store(mut store: Box<dyn AuditStore>) -> Result<Self> {
        let LoadedChain {
            entries,
            unreadable,
        } = store.load()?;

        match with_unreadable(verify_chain(&entries), unreadable) {
            IntegrityReport::Intact { entries: count } => {
                info!(entries = count, "Audit chain loaded");
            }
            IntegrityReport::Violation { index, kind } => {
                error!(index, %kind, "Persisted audit chain failed verification");
            }
        }

        Ok(Self {
            state: Mutex::new(ChainState {
                entries,
                unreadable,
                store,
            }),
        })
    }

    /// Append an event to the chain
    pub async fn append(&self, draft: AuditDraft) -> Result<AuditEntry> {
        if draft.actor_id.trim().is_empty() {
            return Err(Error::MalformedInput("actor id must not be empty".to_string()));
        }

        let mut state = self.state.lock().await;

        let previous_digest = state
            .entries
            .last()
            .map(|e| e.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string());
        let sequence = state.entries.len() as u64;

        let entry = AuditEntry::seal(draft, sequence, Utc::now(), previous_digest)?;
        state.store.append(&entry)?;
        state.entries.push(entry.clone());

        info!(
            target: "audit",
            sequence = entry.sequence,
            event = ?entry.event_type,
            actor = %entry.actor_id,
            risk = ?entry.risk_level,
            digest = %entry.digest,
            "Audit event appended"
        );

        Ok(entry)
    }

    /// Verify the chain as of now
    pub async fn verify_integrity(&self) -> bool {
        self.verify_report().await.is_intact()
    }

    /// Verify the chain as of now, reporting the first violation
    pub async fn verify_report(&self) -> IntegrityReport {
        let (snapshot, unreadable) = {
            let state = self.state.lock().await;
            (state.entries.clone(), state.unreadable)
        };
        let report = with_unreadable(verify_chain(&snapshot), unreadable);

        if let IntegrityReport::Violation { index, kind } = &report {
            error!(index, %kind, "Audit chain integrity violation");
        }
        report
    }

    /// Consistent copy of the chain
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().await.entries.clone()
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Whether the chain is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Digest the next entry will link to
    pub async fn tail_digest(&self) -> String {
        self.state
            .lock()
            .await
            .entries
            .last()
            .map(|e| e.digest.clone())
            .unwrap_or_else(|| GENESIS_DIGEST.to_string())
    }

    /// Search audit log
    pub async fn search(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let state = self.state.lock().await;
        state
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn draft(actor: &str) -> AuditDraft {
        AuditDraft::new(AuditEventType::LoginSuccess, actor, AuditRiskLevel::Info)
            .with_ip(Some("192.168.1.1".to_string()))
            .with_detail(AuditDetail::new().with_attribute("channel", "web"))
    }

    async fn populated(n: usize) -> AuditLog {
        let log = AuditLog::in_memory();
        for i in 0..n {
            log.append(draft(&format!("user{}", i))).await.unwrap();
        }
        log
    }

    #[test]
    fn test_entry_digest() {
        let entry = AuditEntry::seal(draft("user123"), 0, Utc::now(), GENESIS_DIGEST.to_string())
            .unwrap();
        assert!(entry.verify_digest());
        assert_eq!(entry.digest.len(), 64);
    }

    #[test]
    fn test_canonical_form_ignores_attribute_insertion_order() {
        let now = Utc::now();
        let a = AuditDraft::new(AuditEventType::TokenRejected, "u", AuditRiskLevel::Medium)
            .with_detail(AuditDetail::new().with_attribute("b", "2").with_attribute("a", "1"));
        let b = AuditDraft::new(AuditEventType::TokenRejected, "u", AuditRiskLevel::Medium)
            .with_detail(AuditDetail::new().with_attribute("a", "1").with_attribute("b", "2"));

        let a = AuditEntry::seal(a, 0, now, GENESIS_DIGEST.to_string()).unwrap();
        let b = AuditEntry::seal(b, 0, now, GENESIS_DIGEST.to_string()).unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_canonical_field_order() {
        let timestamp = DateTime::parse_from_rfc3339("2025-01-01T03:00:00.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let entry = AuditEntry::seal(
            AuditDraft::new(AuditEventType::HighRiskRequest, "svc", AuditRiskLevel::High),
            7,
            timestamp,
            GENESIS_DIGEST.to_string(),
        )
        .unwrap();

        let canonical = String::from_utf8(entry.canonical_bytes().unwrap()).unwrap();
        assert_eq!(
            canonical,
            r#"{"sequence":7,"timestamp":"2025-01-01T03:00:00.123456Z","event_type":"high_risk_request","actor_id":"svc","detail":{"schema_version":1,"reason":null,"risk_score":null,"token_id":null,"attributes":{}},"risk_level":"HIGH","session_id":null,"ip_address":null,"user_agent":null}"#
        );
    }

    #[tokio::test]
    async fn test_append_links_entries() {
        let log = populated(3).await;
        let entries = log.entries().await;

        assert_eq!(entries[0].previous_digest, GENESIS_DIGEST);
        assert_eq!(entries[1].previous_digest, entries[0].digest);
        assert_eq!(entries[2].previous_digest, entries[1].digest);
        assert_eq!(log.tail_digest().await, entries[2].digest);
        assert!(log.verify_integrity().await);
    }

    #[tokio::test]
    async fn test_empty_log_is_intact() {
        let log = AuditLog::in_memory();
        assert!(log.is_empty().await);
        assert!(log.verify_integrity().await);
        assert_eq!(log.tail_digest().await, GENESIS_DIGEST);
    }

    #[tokio::test]
    async fn test_rejects_empty_actor() {
        let log = AuditLog::in_memory();
        assert!(matches!(
            log.append(draft("  ")).await,
            Err(Error::MalformedInput(_))
        ));
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_field_tampering_detected() {
        let entries = populated(4).await.entries().await;
        assert!(verify_chain(&entries).is_intact());

        let tamperings: Vec<Box<dyn Fn(&mut AuditEntry)>> = vec![
            Box::new(|e: &mut AuditEntry| e.actor_id.push('x')),
            Box::new(|e: &mut AuditEntry| e.event_type = AuditEventType::LoginFailure),
            Box::new(|e: &mut AuditEntry| e.risk_level = AuditRiskLevel::Critical),
            Box::new(|e: &mut AuditEntry| e.timestamp = e.timestamp + chrono::Duration::seconds(1)),
            Box::new(|e: &mut AuditEntry| e.ip_address = None),
            Box::new(|e: &mut AuditEntry| e.session_id = Some("forged".to_string())),
            Box::new(|e: &mut AuditEntry| e.user_agent = Some("curl".to_string())),
            Box::new(|e: &mut AuditEntry| e.detail.reason = Some("edited".to_string())),
            Box::new(|e: &mut AuditEntry| {
                e.detail.attributes.insert("channel".to_string(), "api".to_string());
            }),
        ];

        for tamper in &tamperings {
            for index in 0..entries.len() {
                let mut forged = entries.clone();
                tamper(&mut forged[index]);
                assert_eq!(
                    verify_chain(&forged),
                    IntegrityReport::Violation {
                        index,
                        kind: ViolationKind::DigestMismatch
                    }
                );
            }
        }
    }

    #[tokio::test]
    async fn test_resealed_edit_breaks_next_link() {
        let entries = populated(3).await.entries().await;

        // Rewrite entry 1 and recompute its own digest consistently
        let mut forged = entries.clone();
        forged[1].actor_id = "mallory".to_string();
        forged[1].digest = forged[1].compute_digest().unwrap();
        assert!(forged[1].verify_digest());

        assert_eq!(
            verify_chain(&forged),
            IntegrityReport::Violation {
                index: 2,
                kind: ViolationKind::BrokenLink
            }
        );
    }

    #[tokio::test]
    async fn test_removal_and_reordering_detected() {
        let entries = populated(4).await.entries().await;

        let mut removed = entries.clone();
        removed.remove(1);
        assert!(!verify_chain(&removed).is_intact());

        let mut swapped = entries.clone();
        swapped.swap(1, 2);
        assert!(!verify_chain(&swapped).is_intact());

        let mut truncated_head = entries.clone();
        truncated_head.remove(0);
        assert!(!verify_chain(&truncated_head).is_intact());
    }

    #[tokio::test]
    async fn test_segment_verification() {
        let entries = populated(5).await.entries().await;
        let anchor = entries[1].digest.clone();
        assert!(verify_segment(&entries[2..], &anchor, 2).is_intact());
        assert!(!verify_segment(&entries[2..], GENESIS_DIGEST, 2).is_intact());
    }

    #[tokio::test]
    async fn test_report_into_result() {
        let entries = populated(2).await.entries().await;
        assert_eq!(verify_chain(&entries).into_result().unwrap(), 2);

        let mut forged = entries;
        forged[0].previous_digest = "0".repeat(64);
        assert!(matches!(
            verify_chain(&forged).into_result(),
            Err(Error::IntegrityViolation { index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_file_log_resumes_from_tail() {
        let temp_dir = tempdir().unwrap();
        let config = AuditLogConfig {
            log_path: Some(temp_dir.path().join("audit").join("audit.log")),
            fsync: false,
        };

        let tail = {
            let log = AuditLog::open(&config).unwrap();
            log.append(draft("user1")).await.unwrap();
            log.append(draft("user2")).await.unwrap().digest
        };

        // Reopen: new entries link onto the persisted tail, not genesis
        let log = AuditLog::open(&config).unwrap();
        assert_eq!(log.len().await, 2);
        assert_eq!(log.tail_digest().await, tail);

        let third = log.append(draft("user3")).await.unwrap();
        assert_eq!(third.sequence, 2);
        assert_eq!(third.previous_digest, tail);
        assert!(log.verify_integrity().await);

        let on_disk = FileAuditStore::read_chain(config.log_path.as_ref().unwrap()).unwrap();
        assert_eq!(on_disk.unreadable, None);
        assert_eq!(on_disk.entries, log.entries().await);
        assert!(on_disk.verify().is_intact());
    }

    #[tokio::test]
    async fn test_torn_final_line_is_reported_not_fatal() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("audit.log");
        let config = AuditLogConfig {
            log_path: Some(path.clone()),
            fsync: false,
        };

        {
            let log = AuditLog::open(&config).unwrap();
            log.append(draft("user1")).await.unwrap();
            log.append(draft("user2")).await.unwrap();
        }

        // Simulate a crash halfway through writing a third entry
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence":2,"timestamp":"2025-"#).unwrap();
        drop(file);

        let log = AuditLog::open(&config).unwrap();
        assert_eq!(log.len().await, 2);
        let torn = IntegrityReport::Violation {
            index: 2,
            kind: ViolationKind::Unreadable { line: 3 },
        };
        assert_eq!(log.verify_report().await, torn);

        // The next entry lands on its own line and links onto the real tail
        let third = log.append(draft("user3")).await.unwrap();
        assert_eq!(third.sequence, 2);

        let on_disk = FileAuditStore::read_chain(&path).unwrap();
        assert_eq!(on_disk.entries, log.entries().await);
        assert_eq!(
            on_disk.unreadable,
            Some(UnreadableLine { index: 2, line: 3 })
        );
        assert!(verify_chain(&on_disk.entries).is_intact());
        assert_eq!(on_disk.verify(), torn);
        assert_eq!(log.verify_report().await, torn);
    }

    #[tokio::test]
    async fn test_earlier_violation_reported_before_unreadable_line() {
        let mut entries = populated(3).await.entries().await;
        entries[0].actor_id = "mallory".to_string();

        let chain = LoadedChain {
            entries,
            unreadable: Some(UnreadableLine { index: 2, line: 3 }),
        };
        assert_eq!(
            chain.verify(),
            IntegrityReport::Violation {
                index: 0,
                kind: ViolationKind::DigestMismatch
            }
        );
    }

    #[tokio::test]
    async fn test_sub_microsecond_timestamp_edit_detected() {
        let entries = populated(3).await.entries().await;

        let mut forged = entries.clone();
        forged[1].timestamp = forged[1].timestamp + chrono::Duration::nanoseconds(999);

        // The canonical form alone cannot see the change
        assert_eq!(
            forged[1].canonical_bytes().unwrap(),
            entries[1].canonical_bytes().unwrap()
        );
        assert!(!forged[1].verify_digest());
        assert_eq!(
            verify_chain(&forged),
            IntegrityReport::Violation {
                index: 1,
                kind: ViolationKind::DigestMismatch
            }
        );
    }

    #[tokio::test]
    async fn test_forged_store_is_reported() {
        let mut entries = populated(3).await.entries().await;
        entries[0].actor_id = "mallory".to_string();

        let log = AuditLog::with_store(Box::new(MemoryAuditStore::with_entries(entries))).unwrap();
        assert!(!log.verify_integrity().await);
        assert_eq!(
            log.verify_report().await,
            IntegrityReport::Violation {
                index: 0,
                kind: ViolationKind::DigestMismatch
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_serialized() {
        let log = Arc::new(AuditLog::in_memory());

        let mut handles = Vec::new();
        for worker in 0..8 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    log.append(draft(&format!("worker{}-{}", worker, i)))
                        .await
                        .unwrap();
                }
            }));
        }

        // Verification runs alongside the writers on consistent snapshots
        for _ in 0..10 {
            assert!(log.verify_integrity().await);
            tokio::task::yield_now().await;
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let entries = log.entries().await;
        assert_eq!(entries.len(), 200);
        assert!(verify_chain(&entries).is_intact());
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.sequence, i as u64);
        }
    }

    #[tokio::test]
    async fn test_search() {
        let log = AuditLog::in_memory();
        for i in 0..3 {
            log.append(draft(&format!("user{}", i))).await.unwrap();
        }
        log.append(AuditDraft::new(
            AuditEventType::HighRiskRequest,
            "user1",
            AuditRiskLevel::High,
        ))
        .await
        .unwrap();

        // Search by actor
        let results = log
            .search(&AuditFilter {
                actor_id: Some("user1".to_string()),
                ..AuditFilter::default()
            })
            .await;
        assert_eq!(results.len(), 2);

        // Search by event type
        let results = log
            .search(&AuditFilter {
                event_type: Some(AuditEventType::LoginSuccess),
                ..AuditFilter::default()
            })
            .await;
        assert_eq!(results.len(), 3);

        // Search by risk level
        let results = log
            .search(&AuditFilter {
                min_risk_level: Some(AuditRiskLevel::Medium),
                ..AuditFilter::default()
            })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_type, AuditEventType::HighRiskRequest);

        // Time range in the future matches nothing
        let results = log
            .search(&AuditFilter {
                start_time: Some(Utc::now() + chrono::Duration::hours(1)),
                ..AuditFilter::default()
            })
            .await;
        assert!(results.is_empty());
    }
}
