//! Evidence graph overlay.
//!
//! Queryable, typed indexes over what the store persists. The overlay is
//! never the source of truth for bytes or hashes: every row is written from
//! store results, and the whole thing can be regenerated from persisted
//! manifests with [`EvidenceGraph::rebuild_from_store`].
//!
//! Rows live in an arena behind one `RwLock`; ids are assigned from a single
//! monotonically increasing space and rows are never physically removed.

pub mod records;
pub mod sequence;

use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::store::{EvidenceManifest, EvidenceStore, StoreError};

pub use records::{
    AuditEvent, DerivedArtifact, EvidenceMarker, EvidenceSequenceGroup, MarkerPosition, RecordId,
    RecordState, SequenceMember,
};
pub use sequence::{
    cluster_candidates, SequenceCandidate, SequenceGroupSpec, SEQUENCE_ALGORITHM,
};

/// Errors from overlay operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown record id: {id}")]
    RecordNotFound { id: RecordId },

    #[error("record {id} is not current; only the current version can be superseded or deleted")]
    NotCurrent { id: RecordId },

    #[error("invalid marker position: {reason}")]
    InvalidPosition { reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs for a new derivative row.
#[derive(Debug, Clone)]
pub struct DerivativeSpec {
    pub evidence_id: String,
    pub original_sha256: String,
    pub derivative_type: String,
    pub filename: String,
    pub mime_type: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_by: String,
}

/// What a rebuild recovered from persisted manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildSummary {
    pub manifests: usize,
    pub derivatives: usize,
    pub audit_events: usize,
}

#[derive(Default)]
struct GraphInner {
    next_id: RecordId,
    derivatives: Vec<DerivedArtifact>,
    markers: Vec<EvidenceMarker>,
    groups: Vec<EvidenceSequenceGroup>,
    audit_events: Vec<AuditEvent>,
}

impl GraphInner {
    fn mint_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }
}

/// The overlay arena.
#[derive(Default)]
pub struct EvidenceGraph {
    inner: RwLock<GraphInner>,
}

impl EvidenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Derivatives
    // ------------------------------------------------------------------

    /// Insert a derivative row. Call only after the store accepted the
    /// derivative; `spec.original_sha256` must be the owning evidence's
    /// ingest hash, copied, never recomputed.
    pub fn record_derivative(&self, spec: DerivativeSpec) -> RecordId {
        let mut inner = self.inner.write().expect("lock poisoned");
        let id = inner.mint_id();
        inner.derivatives.push(DerivedArtifact {
            id,
            evidence_id: spec.evidence_id,
            original_sha256: spec.original_sha256,
            derivative_type: spec.derivative_type,
            filename: spec.filename,
            mime_type: spec.mime_type,
            sha256: spec.sha256,
            size_bytes: spec.size_bytes,
            supersedes_id: None,
            state: RecordState::Active,
            created_at: Utc::now(),
            created_by: spec.created_by,
        });
        id
    }

    /// Replace a current derivative row with a regenerated version.
    ///
    /// The old row keeps its data and moves to `Superseded`; the new row
    /// inherits the old row's provenance (evidence id, original hash,
    /// derivative type).
    pub fn supersede_derivative(
        &self,
        old_id: RecordId,
        filename: String,
        mime_type: String,
        sha256: String,
        size_bytes: u64,
        created_by: String,
    ) -> Result<RecordId, GraphError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let old = inner
            .derivatives
            .iter()
            .find(|d| d.id == old_id)
            .cloned()
            .ok_or(GraphError::RecordNotFound { id: old_id })?;
        if !old.state.is_current() {
            return Err(GraphError::NotCurrent { id: old_id });
        }

        let new_id = inner.mint_id();
        inner.derivatives.push(DerivedArtifact {
            id: new_id,
            evidence_id: old.evidence_id.clone(),
            original_sha256: old.original_sha256.clone(),
            derivative_type: old.derivative_type.clone(),
            filename,
            mime_type,
            sha256,
            size_bytes,
            supersedes_id: Some(old_id),
            state: RecordState::Active,
            created_at: Utc::now(),
            created_by,
        });
        if let Some(row) = inner.derivatives.iter_mut().find(|d| d.id == old_id) {
            row.state = RecordState::Superseded { by: new_id };
        }
        Ok(new_id)
    }

    /// Soft-delete a current derivative row. The row is never removed.
    pub fn soft_delete_derivative(&self, id: RecordId) -> Result<(), GraphError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let row = inner
            .derivatives
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(GraphError::RecordNotFound { id })?;
        if !row.state.is_current() {
            return Err(GraphError::NotCurrent { id });
        }
        row.state = RecordState::Deleted;
        Ok(())
    }

    /// One derivative row by id.
    pub fn derivative(&self, id: RecordId) -> Option<DerivedArtifact> {
        let inner = self.inner.read().expect("lock poisoned");
        inner.derivatives.iter().find(|d| d.id == id).cloned()
    }

    /// Current (active) derivative rows for an evidence item.
    pub fn current_derivatives(&self, evidence_id: &str) -> Vec<DerivedArtifact> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .derivatives
            .iter()
            .filter(|d| d.evidence_id == evidence_id && d.state.is_current())
            .cloned()
            .collect()
    }

    /// Version history of a derivative, newest first, following the
    /// supersedes chain from `id`.
    pub fn derivative_history(&self, id: RecordId) -> Vec<DerivedArtifact> {
        let inner = self.inner.read().expect("lock poisoned");
        let mut history = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            match inner.derivatives.iter().find(|d| d.id == current) {
                Some(row) => {
                    cursor = row.supersedes_id;
                    history.push(row.clone());
                }
                None => break,
            }
        }
        history
    }

    // ------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------

    /// Add an annotation. Never touches the evidence's bytes.
    pub fn add_marker(
        &self,
        evidence_id: &str,
        position: MarkerPosition,
        label: &str,
        created_by: &str,
    ) -> Result<RecordId, GraphError> {
        validate_position(&position)?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let id = inner.mint_id();
        inner.markers.push(EvidenceMarker {
            id,
            evidence_id: evidence_id.to_string(),
            position,
            label: label.to_string(),
            supersedes_id: None,
            state: RecordState::Active,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        });
        Ok(id)
    }

    /// Replace a current marker with a corrected version.
    pub fn supersede_marker(
        &self,
        old_id: RecordId,
        position: MarkerPosition,
        label: &str,
        created_by: &str,
    ) -> Result<RecordId, GraphError> {
        validate_position(&position)?;
        let mut inner = self.inner.write().expect("lock poisoned");
        let old = inner
            .markers
            .iter()
            .find(|m| m.id == old_id)
            .cloned()
            .ok_or(GraphError::RecordNotFound { id: old_id })?;
        if !old.state.is_current() {
            return Err(GraphError::NotCurrent { id: old_id });
        }

        let new_id = inner.mint_id();
        inner.markers.push(EvidenceMarker {
            id: new_id,
            evidence_id: old.evidence_id.clone(),
            position,
            label: label.to_string(),
            supersedes_id: Some(old_id),
            state: RecordState::Active,
            created_at: Utc::now(),
            created_by: created_by.to_string(),
        });
        if let Some(row) = inner.markers.iter_mut().find(|m| m.id == old_id) {
            row.state = RecordState::Superseded { by: new_id };
        }
        Ok(new_id)
    }

    /// Soft-delete a current marker.
    pub fn soft_delete_marker(&self, id: RecordId) -> Result<(), GraphError> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let row = inner
            .markers
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(GraphError::RecordNotFound { id })?;
        if !row.state.is_current() {
            return Err(GraphError::NotCurrent { id });
        }
        row.state = RecordState::Deleted;
        Ok(())
    }

    /// Current markers on an evidence item.
    pub fn current_markers(&self, evidence_id: &str) -> Vec<EvidenceMarker> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .markers
            .iter()
            .filter(|m| m.evidence_id == evidence_id && m.state.is_current())
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Sequence groups
    // ------------------------------------------------------------------

    /// Store a cluster proposal as a sequence group.
    pub fn create_sequence_group(&self, spec: SequenceGroupSpec) -> RecordId {
        let mut inner = self.inner.write().expect("lock poisoned");
        let id = inner.mint_id();
        let mut members = spec.members;
        members.sort_by(|a, b| {
            a.sequence_index
                .cmp(&b.sequence_index)
                .then_with(|| a.device_label.cmp(&b.device_label))
                .then_with(|| a.clip_start_time.cmp(&b.clip_start_time))
        });
        inner.groups.push(EvidenceSequenceGroup {
            id,
            label: spec.label,
            algorithm: spec.algorithm,
            created_at: Utc::now(),
            members,
        });
        id
    }

    /// One sequence group by id.
    pub fn group(&self, id: RecordId) -> Option<EvidenceSequenceGroup> {
        let inner = self.inner.read().expect("lock poisoned");
        inner.groups.iter().find(|g| g.id == id).cloned()
    }

    /// Ordered membership of a group.
    pub fn group_members(&self, id: RecordId) -> Result<Vec<SequenceMember>, GraphError> {
        self.group(id)
            .map(|g| g.members)
            .ok_or(GraphError::RecordNotFound { id })
    }

    /// Groups an evidence item belongs to.
    pub fn groups_for_evidence(&self, evidence_id: &str) -> Vec<EvidenceSequenceGroup> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .groups
            .iter()
            .filter(|g| g.members.iter().any(|m| m.evidence_id == evidence_id))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Audit events
    // ------------------------------------------------------------------

    /// Append one audit event. There is no update or delete for these.
    pub fn record_audit_event(
        &self,
        correlation_id: &str,
        action: &str,
        component: &str,
        actor: &str,
        evidence_id: Option<&str>,
        details: Value,
    ) -> RecordId {
        let mut inner = self.inner.write().expect("lock poisoned");
        let id = inner.mint_id();
        inner.audit_events.push(AuditEvent {
            id,
            correlation_id: correlation_id.to_string(),
            action: action.to_string(),
            component: component.to_string(),
            actor: actor.to_string(),
            evidence_id: evidence_id.map(str::to_string),
            details,
            recorded_at: Utc::now(),
        });
        id
    }

    /// Every event of one logical batch operation, in append order.
    pub fn events_for_correlation(&self, correlation_id: &str) -> Vec<AuditEvent> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .audit_events
            .iter()
            .filter(|e| e.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Every event touching one evidence item, in append order.
    pub fn events_for_evidence(&self, evidence_id: &str) -> Vec<AuditEvent> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .audit_events
            .iter()
            .filter(|e| e.evidence_id.as_deref() == Some(evidence_id))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Rebuild
    // ------------------------------------------------------------------

    /// Discard the overlay and regenerate it from persisted manifests.
    ///
    /// Derivative rows and audit events come back; markers and sequence
    /// groups are overlay-only state and are not recoverable from the
    /// store (they start empty after a rebuild).
    pub fn rebuild_from_store(&self, store: &EvidenceStore) -> Result<RebuildSummary, GraphError> {
        let mut manifests: Vec<EvidenceManifest> = Vec::new();
        for entry in WalkDir::new(store.manifests_dir())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| GraphError::Io(e.into()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            manifests.push(EvidenceManifest::from_file(path).map_err(StoreError::Io)?);
        }

        let mut inner = self.inner.write().expect("lock poisoned");
        *inner = GraphInner::default();

        let mut derivatives = 0usize;
        let mut audit_events = 0usize;
        for manifest in &manifests {
            for derivative in &manifest.derivatives {
                let id = inner.mint_id();
                inner.derivatives.push(DerivedArtifact {
                    id,
                    evidence_id: manifest.evidence_id.clone(),
                    original_sha256: manifest.ingest.sha256.clone(),
                    derivative_type: derivative.derivative_type.clone(),
                    filename: derivative.filename.clone(),
                    mime_type: derivative.mime_type.clone(),
                    sha256: derivative.sha256.clone(),
                    size_bytes: derivative.size_bytes,
                    supersedes_id: None,
                    state: RecordState::Active,
                    created_at: derivative.created_at,
                    created_by: derivative.created_by.clone(),
                });
                derivatives += 1;
            }
            for entry in &manifest.audit_entries {
                let id = inner.mint_id();
                inner.audit_events.push(AuditEvent {
                    id,
                    correlation_id: entry
                        .correlation_id
                        .clone()
                        .unwrap_or_else(|| manifest.evidence_id.clone()),
                    action: entry.action.clone(),
                    component: entry.component.clone(),
                    actor: entry.actor.clone(),
                    evidence_id: Some(manifest.evidence_id.clone()),
                    details: entry.details.clone(),
                    recorded_at: entry.recorded_at,
                });
                audit_events += 1;
            }
        }

        let summary = RebuildSummary {
            manifests: manifests.len(),
            derivatives,
            audit_events,
        };
        info!(
            manifests = summary.manifests,
            derivatives = summary.derivatives,
            audit_events = summary.audit_events,
            "rebuilt overlay from store"
        );
        Ok(summary)
    }
}

fn validate_position(position: &MarkerPosition) -> Result<(), GraphError> {
    match position {
        MarkerPosition::MediaRange {
            start_seconds,
            end_seconds,
        } => {
            if !start_seconds.is_finite() || !end_seconds.is_finite() || start_seconds < &0.0 {
                return Err(GraphError::InvalidPosition {
                    reason: "media range must be finite and non-negative".to_string(),
                });
            }
            if end_seconds < start_seconds {
                return Err(GraphError::InvalidPosition {
                    reason: format!("media range ends ({end_seconds}) before it starts ({start_seconds})"),
                });
            }
        }
        MarkerPosition::DocumentPosition {
            page_number,
            char_start,
            char_end,
        } => {
            if *page_number == 0 {
                return Err(GraphError::InvalidPosition {
                    reason: "page numbers start at 1".to_string(),
                });
            }
            if let (Some(start), Some(end)) = (char_start, char_end) {
                if end < start {
                    return Err(GraphError::InvalidPosition {
                        reason: format!("char range ends ({end}) before it starts ({start})"),
                    });
                }
            }
        }
    }
    Ok(())
}
