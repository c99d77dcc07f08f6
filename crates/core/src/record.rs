use std::fmt;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::partition::PartitionKey;

/// Timestamp format shared by `ingest_ts` and normalised trip datetimes.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time truncated to whole seconds, the precision the ledger persists.
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

// ── Coverage ──────────────────────────────────────────────────

/// Result of probing one partition's remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageRecord {
    pub key: PartitionKey,
    pub source_url: String,
    pub is_available: bool,
    pub probe_status_code: Option<u16>,
    pub content_length: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl CoverageRecord {
    /// True when the probe ended in a transport or server error rather than
    /// a definitive answer.
    pub fn is_error(&self) -> bool {
        self.note
            .as_deref()
            .map(|n| n.starts_with("error"))
            .unwrap_or(false)
    }
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Ok,
    Pending,
    Missing,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Ok => "OK",
            AuditStatus::Pending => "PENDING",
            AuditStatus::Missing => "MISSING",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived per-partition load status, recomputed on every reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub key: PartitionKey,
    pub row_count: u64,
    pub latest_ingest_ts: Option<NaiveDateTime>,
    pub status: AuditStatus,
    pub note: Option<String>,
}

// ── Load ──────────────────────────────────────────────────────

/// A source file that failed inside an otherwise successful partition load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub url: String,
    pub error: String,
}

/// Outcome of one partition load attempt.
///
/// `error` is set only for partition-fatal failures (the pre-load delete or
/// connection acquisition); per-file failures land in `file_errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResult {
    pub key: PartitionKey,
    pub run_id: Option<Uuid>,
    pub rows_written: u64,
    pub error: Option<String>,
    pub file_errors: Vec<FileError>,
    pub cancelled: bool,
}

impl LoadResult {
    pub fn failed(key: PartitionKey, error: impl Into<String>) -> Self {
        Self {
            key,
            run_id: None,
            rows_written: 0,
            error: Some(error.into()),
            file_errors: Vec::new(),
            cancelled: false,
        }
    }

    /// A load that stopped before touching the warehouse.
    pub fn cancelled(key: PartitionKey) -> Self {
        Self {
            key,
            run_id: None,
            rows_written: 0,
            error: None,
            file_errors: Vec::new(),
            cancelled: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.file_errors.is_empty() && !self.cancelled
    }
}
