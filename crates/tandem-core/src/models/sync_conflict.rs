//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::record::{RecordId, RecordType, SyncRecord};
use crate::error::Error;

/// How divergent local and remote copies are reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep local fields
    #[default]
    LocalWins,
    /// Adopt remote fields
    RemoteWins,
    /// Field-level last-writer-wins on `lastModified`
    Merge,
    /// Leave for an external decision
    Manual,
}

impl ConflictStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalWins => "local_wins",
            Self::RemoteWins => "remote_wins",
            Self::Merge => "merge",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local_wins" | "local" => Ok(Self::LocalWins),
            "remote_wins" | "remote" => Ok(Self::RemoteWins),
            "merge" | "lww" => Ok(Self::Merge),
            "manual" => Ok(Self::Manual),
            other => Err(Error::InvalidInput(format!(
                "unknown conflict strategy '{other}'"
            ))),
        }
    }
}

/// Divergence between the local and a remote copy of one record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    /// Conflict identifier
    pub id: String,
    pub record_type: RecordType,
    pub record_id: RecordId,
    /// Local copy when the conflict was detected
    pub local_payload: SyncRecord,
    /// Remote snapshot that could not be applied
    pub remote_payload: SyncRecord,
    pub local_version: u64,
    pub remote_version: u64,
    /// Detection timestamp (Unix ms)
    pub timestamp: i64,
    pub resolved: bool,
    /// Strategy applied on resolution
    pub resolution_used: Option<ConflictStrategy>,
}

impl SyncConflict {
    pub fn new(local: &SyncRecord, remote: &SyncRecord, now_ms: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            record_type: local.record_type,
            record_id: local.id.clone(),
            local_payload: local.clone(),
            remote_payload: remote.clone(),
            local_version: local.version,
            remote_version: remote.version,
            timestamp: now_ms,
            resolved: false,
            resolution_used: None,
        }
    }
}
