//! Evidence manifest (one JSON document per evidence item).
//!
//! The manifest is the persisted source of truth for an evidence item: the
//! immutable ingest block, the derivative records, and the chained audit
//! entries. It is created once at ingest and only ever appended to; the
//! ingest block never changes and `audit_entries` only grows.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::AuditEntry;

/// Schema version for manifest documents.
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for manifest documents.
pub const MANIFEST_SCHEMA_ID: &str = "evidence-locker/manifest@1";

/// Immutable ingest block, fixed at the moment the original is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRecord {
    /// Filename declared by the uploader (metadata only, never a storage key).
    pub original_filename: String,

    /// Declared MIME type.
    pub mime_type: String,

    /// Size of the original in bytes.
    pub size_bytes: u64,

    /// SHA-256 of the original. Never changes after creation.
    pub sha256: String,

    /// When the original was ingested.
    pub ingested_at: DateTime<Utc>,

    /// Actor who performed the ingest.
    pub ingested_by: String,

    /// Recording device label, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_label: Option<String>,
}

/// Store-level record of one derivative generated from the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestDerivative {
    /// Kind of derivative ("thumbnail", "proxy", "transcript", ...).
    pub derivative_type: String,

    /// Filename the derivative is stored under.
    pub filename: String,

    /// MIME type of the derivative.
    pub mime_type: String,

    /// SHA-256 of the derivative bytes.
    pub sha256: String,

    /// Size of the derivative in bytes.
    pub size_bytes: u64,

    /// When the derivative was stored.
    pub created_at: DateTime<Utc>,

    /// Actor or tool that produced it.
    pub created_by: String,
}

/// Persisted record of one evidence item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceManifest {
    /// Schema version.
    pub schema_version: u32,

    /// Schema identifier.
    pub schema_id: String,

    /// UUID of this evidence item.
    pub evidence_id: String,

    /// Immutable ingest block.
    pub ingest: IngestRecord,

    /// Derivatives stored against this item, in creation order.
    pub derivatives: Vec<ManifestDerivative>,

    /// Chained audit entries, in append order.
    pub audit_entries: Vec<AuditEntry>,
}

impl EvidenceManifest {
    /// Create a fresh manifest around an ingest block.
    pub fn new(evidence_id: String, ingest: IngestRecord) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            schema_id: MANIFEST_SCHEMA_ID.to_string(),
            evidence_id,
            ingest,
            derivatives: Vec::new(),
            audit_entries: Vec::new(),
        }
    }

    /// Hash of the last audit entry, if any. New entries chain onto this.
    pub fn audit_head(&self) -> Option<&str> {
        self.audit_entries.last().map(|e| e.entry_hash.as_str())
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load from a file on disk.
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e)))
    }
}
