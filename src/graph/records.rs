//! Typed overlay records.
//!
//! These rows index what the store persists; the store's manifests and
//! content-addressed files stay the sole source of truth for bytes and
//! hashes. Rows are never physically removed: versioning and deletion are
//! expressed through [`RecordState`] and `supersedes_id` chains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of one overlay row.
pub type RecordId = u64;

/// Lifecycle of a versioned overlay row.
///
/// A row starts `Active`. Regenerating it inserts a replacement row and
/// moves the old one to `Superseded { by }`; deletion is `Deleted`, a soft
/// state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Superseded { by: RecordId },
    Deleted,
}

impl RecordState {
    /// Whether this row is the current version.
    pub fn is_current(&self) -> bool {
        matches!(self, RecordState::Active)
    }
}

/// One generated artifact, tied to its evidence item and the original's
/// hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedArtifact {
    pub id: RecordId,

    /// Owning evidence item.
    pub evidence_id: String,

    /// Copied from the owning evidence's ingest hash, never recomputed, so
    /// provenance queries never touch the filesystem.
    pub original_sha256: String,

    /// Kind of derivative ("thumbnail", "proxy", "transcript", ...).
    pub derivative_type: String,

    /// Filename the derivative is stored under.
    pub filename: String,

    /// MIME type of the derivative.
    pub mime_type: String,

    /// SHA-256 of the derivative bytes, as reported by the store.
    pub sha256: String,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Row this one replaced, if any.
    pub supersedes_id: Option<RecordId>,

    /// Version/deletion state.
    pub state: RecordState,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Where a marker points inside its evidence item.
///
/// Exactly two disjoint kinds exist: a media time range or a document
/// position. The enum makes mixing them unrepresentable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerPosition {
    MediaRange {
        start_seconds: f64,
        end_seconds: f64,
    },
    DocumentPosition {
        page_number: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        char_start: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        char_end: Option<u64>,
    },
}

/// Non-destructive annotation on an evidence item.
///
/// Markers never write to the evidence's bytes; they are append-only with
/// their own supersedes chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceMarker {
    pub id: RecordId,

    /// Evidence item this marker annotates.
    pub evidence_id: String,

    /// Position inside the item.
    pub position: MarkerPosition,

    /// Free-text label ("suspect enters frame", ...).
    pub label: String,

    /// Row this one replaced, if any.
    pub supersedes_id: Option<RecordId>,

    /// Version/deletion state.
    pub state: RecordState,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// A cluster of evidence items produced by a labeled heuristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSequenceGroup {
    pub id: RecordId,

    /// Display label for the cluster.
    pub label: String,

    /// Name and version of the clustering algorithm that built it.
    pub algorithm: String,

    pub created_at: DateTime<Utc>,

    /// Ordered membership.
    pub members: Vec<SequenceMember>,
}

/// One evidence item's place in a sequence group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceMember {
    pub evidence_id: String,

    /// Stable ordering inside the group.
    pub sequence_index: u32,

    /// Recording device, used as an ordering tie-break.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_label: Option<String>,

    /// Clip start time, used as an ordering tie-break.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip_start_time: Option<DateTime<Utc>>,
}

/// One queryable audit event in the overlay.
///
/// Mirrors store-level audit entries and batch operations; the overlay
/// exposes no update or delete for these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: RecordId,

    /// Groups the events of one logical batch operation.
    pub correlation_id: String,

    pub action: String,
    pub component: String,
    pub actor: String,

    /// Evidence item involved, when the event concerns one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_id: Option<String>,

    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_state_currency() {
        assert!(RecordState::Active.is_current());
        assert!(!RecordState::Superseded { by: 7 }.is_current());
        assert!(!RecordState::Deleted.is_current());
    }

    #[test]
    fn marker_position_kinds_are_disjoint_in_json() {
        let media = MarkerPosition::MediaRange {
            start_seconds: 1.5,
            end_seconds: 9.0,
        };
        let doc = MarkerPosition::DocumentPosition {
            page_number: 3,
            char_start: Some(10),
            char_end: None,
        };

        let media_json = serde_json::to_value(&media).unwrap();
        let doc_json = serde_json::to_value(&doc).unwrap();
        assert_eq!(media_json["kind"], "media_range");
        assert_eq!(doc_json["kind"], "document_position");
        assert!(media_json.get("page_number").is_none());
        assert!(doc_json.get("start_seconds").is_none());
    }

    #[test]
    fn audit_event_roundtrip() {
        let event = AuditEvent {
            id: 1,
            correlation_id: "batch-1".to_string(),
            action: "ingested".to_string(),
            component: "store".to_string(),
            actor: "intake".to_string(),
            evidence_id: Some("ev-1".to_string()),
            details: json!({ "n": 1 }),
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.correlation_id, "batch-1");
        assert_eq!(parsed.evidence_id.as_deref(), Some("ev-1"));
    }
}
