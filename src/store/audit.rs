//! Append-only, hash-chained audit entries.
//!
//! Every operation against an evidence item appends one entry to its
//! manifest. Entries are linked: each entry hashes the previous entry's
//! hash together with the canonical (JCS) bytes of its own fields, so
//! editing, reordering, or dropping a prior entry breaks every hash after
//! it. The genesis entry links to a well-known zero hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Previous-hash value for the first entry in a chain.
pub const GENESIS_PREV_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Errors from audit chain operations.
#[derive(Debug, Error)]
pub enum AuditChainError {
    /// Canonical serialization of entry fields failed.
    #[error("audit entry canonicalization failed: {0}")]
    Canonical(String),

    /// An entry does not link to the hash of the entry before it.
    #[error("audit chain broken at sequence {sequence}: expected prev {expected}, got {actual}")]
    BrokenLink {
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// An entry's recorded hash does not match its recomputed hash.
    #[error("audit entry hash mismatch at sequence {sequence}: expected {expected}, got {actual}")]
    BadEntryHash {
        sequence: u64,
        expected: String,
        actual: String,
    },

    /// Entry sequence numbers are not 0..N in order.
    #[error("audit entry out of order: position {position} holds sequence {sequence}")]
    OutOfOrder { position: u64, sequence: u64 },
}

/// One chained audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Zero-based position in the chain.
    pub sequence: u64,

    /// What happened ("ingested", "derivative_stored", "exported", ...).
    pub action: String,

    /// Component that performed the action ("store", "exporter", ...).
    pub component: String,

    /// Actor on whose behalf the action ran.
    pub actor: String,

    /// Groups the entries of one logical batch operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Structured detail payload.
    pub details: Value,

    /// When the entry was appended.
    pub recorded_at: DateTime<Utc>,

    /// Hash of the previous entry ([`GENESIS_PREV_HASH`] for the first).
    pub prev_hash: String,

    /// SHA-256 over `prev_hash || JCS(core fields)`.
    pub entry_hash: String,
}

/// The fields covered by `entry_hash`, in their canonical shape.
#[derive(Serialize)]
struct EntryCore<'a> {
    sequence: u64,
    action: &'a str,
    component: &'a str,
    actor: &'a str,
    correlation_id: &'a Option<String>,
    details: &'a Value,
    recorded_at: &'a DateTime<Utc>,
}

impl AuditEntry {
    /// Build the next entry in a chain.
    ///
    /// `prev_hash` is the hash of the current chain head, or `None` for the
    /// genesis entry.
    #[allow(clippy::too_many_arguments)]
    pub fn next(
        prev_hash: Option<&str>,
        sequence: u64,
        action: &str,
        component: &str,
        actor: &str,
        correlation_id: Option<String>,
        details: Value,
    ) -> Result<Self, AuditChainError> {
        let prev_hash = prev_hash.unwrap_or(GENESIS_PREV_HASH).to_string();
        let recorded_at = Utc::now();

        let mut entry = Self {
            sequence,
            action: action.to_string(),
            component: component.to_string(),
            actor: actor.to_string(),
            correlation_id,
            details,
            recorded_at,
            prev_hash,
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Recompute this entry's hash from its fields and `prev_hash`.
    pub fn compute_hash(&self) -> Result<String, AuditChainError> {
        let core = EntryCore {
            sequence: self.sequence,
            action: &self.action,
            component: &self.component,
            actor: &self.actor,
            correlation_id: &self.correlation_id,
            details: &self.details,
            recorded_at: &self.recorded_at,
        };
        let canonical = serde_json_canonicalizer::to_vec(&core)
            .map_err(|e| AuditChainError::Canonical(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Verify a whole chain, returning the number of entries checked.
///
/// Checks, for each entry in order: sequence numbering, the link to the
/// previous entry's hash, and the entry's own recomputed hash.
pub fn verify_entries(entries: &[AuditEntry]) -> Result<usize, AuditChainError> {
    let mut expected_prev = GENESIS_PREV_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        let position = position as u64;
        if entry.sequence != position {
            return Err(AuditChainError::OutOfOrder {
                position,
                sequence: entry.sequence,
            });
        }
        if entry.prev_hash != expected_prev {
            return Err(AuditChainError::BrokenLink {
                sequence: entry.sequence,
                expected: expected_prev,
                actual: entry.prev_hash.clone(),
            });
        }
        let recomputed = entry.compute_hash()?;
        if recomputed != entry.entry_hash {
            return Err(AuditChainError::BadEntryHash {
                sequence: entry.sequence,
                expected: entry.entry_hash.clone(),
                actual: recomputed,
            });
        }
        expected_prev = entry.entry_hash.clone();
    }

    Ok(entries.len())
}

/// One line of the global (cross-evidence) append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerLine {
    /// Evidence item the entry belongs to.
    pub evidence_id: String,

    /// Copy of the chained entry.
    #[serde(flatten)]
    pub entry: AuditEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain_of(n: u64) -> Vec<AuditEntry> {
        let mut entries: Vec<AuditEntry> = Vec::new();
        for sequence in 0..n {
            let prev = entries.last().map(|e| e.entry_hash.as_str());
            entries.push(
                AuditEntry::next(
                    prev,
                    sequence,
                    "ingested",
                    "store",
                    "tester",
                    None,
                    json!({ "n": sequence }),
                )
                .unwrap(),
            );
        }
        entries
    }

    #[test]
    fn genesis_links_to_zero_hash() {
        let chain = chain_of(1);
        assert_eq!(chain[0].prev_hash, GENESIS_PREV_HASH);
        assert_eq!(chain[0].entry_hash.len(), 64);
    }

    #[test]
    fn valid_chain_verifies() {
        let chain = chain_of(5);
        assert_eq!(verify_entries(&chain).unwrap(), 5);
    }

    #[test]
    fn empty_chain_verifies() {
        assert_eq!(verify_entries(&[]).unwrap(), 0);
    }

    #[test]
    fn edited_details_break_verification() {
        let mut chain = chain_of(3);
        chain[1].details = json!({ "n": 99 });
        assert!(matches!(
            verify_entries(&chain),
            Err(AuditChainError::BadEntryHash { sequence: 1, .. })
        ));
    }

    #[test]
    fn reordered_entries_break_verification() {
        let mut chain = chain_of(3);
        chain.swap(0, 1);
        assert!(verify_entries(&chain).is_err());
    }

    #[test]
    fn dropped_entry_breaks_verification() {
        let mut chain = chain_of(3);
        chain.remove(1);
        assert!(verify_entries(&chain).is_err());
    }

    #[test]
    fn entry_hash_covers_prev_hash() {
        let chain = chain_of(2);
        let mut tampered = chain[1].clone();
        tampered.prev_hash = GENESIS_PREV_HASH.to_string();
        // Same fields, different link: hash must change.
        assert_ne!(tampered.compute_hash().unwrap(), chain[1].entry_hash);
    }

    #[test]
    fn roundtrips_through_json_and_still_verifies() {
        let chain = chain_of(2);
        let json = serde_json::to_string(&chain).unwrap();
        let parsed: Vec<AuditEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(verify_entries(&parsed).unwrap(), 2);
    }
}
