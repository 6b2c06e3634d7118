//! Content-addressed evidence store.
//!
//! Originals live under a two-level hash fan-out
//! (`originals/<sha256[..2]>/<sha256>/original<.ext>`) so identical bytes
//! always resolve to one path regardless of declared filename. Derivatives
//! are filed under the owning original's hash. Every write goes to a temp
//! location first, is verified against its declared hash, then placed
//! atomically, so no partially written file is ever visible at a canonical
//! path.
//!
//! Concurrency: ingests of distinct content touch disjoint paths and need no
//! coordination. Two concurrent ingests of the same bytes race on placement;
//! the loser detects the winner's file and reports a duplicate. Audit appends
//! against one evidence item are serialized by a per-manifest mutex.

pub mod audit;
pub mod manifest;

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LockerConfig;
use crate::digest::{digest_copy, digest_file, ContentDigest};

pub use audit::{verify_entries, AuditChainError, AuditEntry, LedgerLine, GENESIS_PREV_HASH};
pub use manifest::{
    EvidenceManifest, IngestRecord, ManifestDerivative, MANIFEST_SCHEMA_ID,
    MANIFEST_SCHEMA_VERSION,
};

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("integrity failure: expected sha256 {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("unknown evidence id: {evidence_id}")]
    EvidenceNotFound { evidence_id: String },

    #[error("no stored original for sha256 {sha256}")]
    OriginalNotFound { sha256: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    AuditChain(#[from] AuditChainError),
}

/// Result of re-verifying stored content against its declared hash.
///
/// `message` always carries the literal expected and actual hashes on
/// failure; that text is the forensic payload surfaced to reviewers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    /// Whether verification passed.
    pub passed: bool,

    /// Human-readable summary.
    pub message: String,
}

impl VerificationOutcome {
    pub fn pass(message: String) -> Self {
        Self {
            passed: true,
            message,
        }
    }

    pub fn fail(message: String) -> Self {
        Self {
            passed: false,
            message,
        }
    }
}

/// Inputs to [`EvidenceStore::ingest`], supplied by the upload layer.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// File to ingest.
    pub source_path: PathBuf,

    /// Filename declared by the uploader (metadata only).
    pub declared_filename: String,

    /// Declared MIME type.
    pub mime_type: String,

    /// Acting user; the configured default actor when `None`.
    pub ingested_by: Option<String>,

    /// Recording device label, when known.
    pub device_label: Option<String>,
}

/// Result of one ingest call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// Freshly minted UUID for this evidence item.
    pub evidence_id: String,

    /// SHA-256 of the original.
    pub sha256: String,

    /// Size of the original in bytes.
    pub size_bytes: u64,

    /// True when identical bytes were already stored. A duplicate still
    /// mints a new evidence id; two logical records may share content.
    pub duplicate: bool,

    /// Always true on `Ok`; integrity and I/O failures return `Err` instead.
    pub success: bool,
}

/// Result of one derivative store call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivativeOutcome {
    /// SHA-256 of the derivative bytes.
    pub sha256: String,

    /// Size of the derivative in bytes.
    pub size_bytes: u64,
}

/// Durable, content-addressed, tamper-detectable storage for evidence
/// originals and their derivatives.
pub struct EvidenceStore {
    root: PathBuf,
    fanout_width: usize,
    default_actor: String,
    manifest_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    ledger_lock: Mutex<()>,
}

impl EvidenceStore {
    /// Open (creating if needed) a store described by `config`.
    pub fn open(config: &LockerConfig) -> Result<Self, StoreError> {
        let root = config.root.clone();
        for dir in [
            root.clone(),
            root.join("originals"),
            root.join("derivatives"),
            root.join("manifests"),
            root.join("audit"),
            root.join(".tmp"),
            config.effective_export_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }

        // Verify the store is writable
        let probe = root.join(".store_probe");
        File::create(&probe)?;
        fs::remove_file(&probe)?;

        Ok(Self {
            root,
            fanout_width: config.fanout_width,
            default_actor: config.default_actor.clone(),
            manifest_locks: Mutex::new(HashMap::new()),
            ledger_lock: Mutex::new(()),
        })
    }

    /// Open a store rooted at `root` with default configuration.
    pub fn at(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let config = LockerConfig {
            root: root.as_ref().to_path_buf(),
            ..LockerConfig::default()
        };
        Self::open(&config)
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    // ------------------------------------------------------------------
    // Path layout
    // ------------------------------------------------------------------

    fn shard<'a>(&self, sha256: &'a str) -> &'a str {
        &sha256[..self.fanout_width.min(sha256.len())]
    }

    fn original_dir(&self, sha256: &str) -> PathBuf {
        self.root
            .join("originals")
            .join(self.shard(sha256))
            .join(sha256)
    }

    fn derivative_dir(&self, original_sha256: &str, derivative_type: &str) -> PathBuf {
        self.root
            .join("derivatives")
            .join(self.shard(original_sha256))
            .join(original_sha256)
            .join(derivative_type)
    }

    fn manifest_path(&self, evidence_id: &str) -> PathBuf {
        self.root.join("manifests").join(format!("{evidence_id}.json"))
    }

    /// Directory holding persisted manifests. The graph overlay rescans it.
    pub(crate) fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    fn ledger_path(&self) -> PathBuf {
        self.root.join("audit").join("ledger.jsonl")
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(".tmp")
    }

    fn temp_path(&self, label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.temp_dir()
            .join(format!(".tmp.{label}.{}.{nanos}", std::process::id()))
    }

    /// Canonical path of a stored original, if present.
    ///
    /// Originals are addressed solely by hash; the stored filename keeps the
    /// first-seen extension, so the lookup scans the per-hash directory.
    pub fn get_original_path(&self, sha256: &str) -> Option<PathBuf> {
        let dir = self.original_dir(sha256);
        let entries = fs::read_dir(&dir).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                return Some(path);
            }
        }
        None
    }

    /// Canonical path of a stored derivative, if present.
    pub fn get_derivative_path(
        &self,
        original_sha256: &str,
        derivative_type: &str,
        filename: &str,
    ) -> Option<PathBuf> {
        let path = self
            .derivative_dir(original_sha256, derivative_type)
            .join(filename);
        path.is_file().then_some(path)
    }

    // ------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------

    /// Ingest one original: hash, copy, verify, manifest, audit.
    ///
    /// Identical bytes already present are a normal outcome
    /// (`duplicate = true`), not an error; a fresh evidence id is minted
    /// either way. Any integrity or I/O failure is `Err` and leaves no
    /// partial file at a canonical path.
    pub fn ingest(&self, request: &IngestRequest) -> Result<IngestOutcome, StoreError> {
        let source_digest = digest_file(&request.source_path)?;
        let sha256 = source_digest.sha256.clone();

        let stored_name = match declared_extension(&request.declared_filename) {
            Some(ext) => format!("original.{ext}"),
            None => "original".to_string(),
        };
        let final_path = self.original_dir(&sha256).join(&stored_name);

        let duplicate = if self.get_original_path(&sha256).is_some() {
            true
        } else {
            !self.copy_verified(&request.source_path, &sha256, &final_path, "ingest", false)?
        };

        let evidence_id = Uuid::new_v4().to_string();
        let actor = request
            .ingested_by
            .clone()
            .unwrap_or_else(|| self.default_actor.clone());

        let ingest = IngestRecord {
            original_filename: request.declared_filename.clone(),
            mime_type: request.mime_type.clone(),
            size_bytes: source_digest.size_bytes,
            sha256: sha256.clone(),
            ingested_at: Utc::now(),
            ingested_by: actor.clone(),
            device_label: request.device_label.clone(),
        };

        let mut manifest = EvidenceManifest::new(evidence_id.clone(), ingest);
        let entry = AuditEntry::next(
            None,
            0,
            "ingested",
            "store",
            &actor,
            None,
            json!({
                "sha256": sha256,
                "size_bytes": source_digest.size_bytes,
                "duplicate": duplicate,
                "original_filename": request.declared_filename,
            }),
        )?;
        manifest.audit_entries.push(entry.clone());
        self.write_manifest(&manifest)?;
        self.append_ledger_line(&LedgerLine {
            evidence_id: evidence_id.clone(),
            entry,
        })?;

        info!(
            evidence_id = %evidence_id,
            sha256 = %sha256,
            duplicate,
            "ingested original"
        );

        Ok(IngestOutcome {
            evidence_id,
            sha256,
            size_bytes: source_digest.size_bytes,
            duplicate,
            success: true,
        })
    }

    /// Store one derivative against a stored original.
    ///
    /// Same hash-then-verify-then-place discipline as ingest. The owning
    /// original must already exist.
    pub fn store_derivative(
        &self,
        original_sha256: &str,
        derivative_type: &str,
        source_path: &Path,
        filename: &str,
    ) -> Result<DerivativeOutcome, StoreError> {
        if self.get_original_path(original_sha256).is_none() {
            return Err(StoreError::OriginalNotFound {
                sha256: original_sha256.to_string(),
            });
        }

        let source_digest = digest_file(source_path)?;
        let final_path = self
            .derivative_dir(original_sha256, derivative_type)
            .join(filename);
        self.copy_verified(source_path, &source_digest.sha256, &final_path, "derivative", true)?;

        info!(
            original_sha256 = %original_sha256,
            derivative_type,
            filename,
            sha256 = %source_digest.sha256,
            "stored derivative"
        );

        Ok(DerivativeOutcome {
            sha256: source_digest.sha256,
            size_bytes: source_digest.size_bytes,
        })
    }

    /// Append a derivative record to the owning manifest, with its audit
    /// entry. Call after [`store_derivative`](Self::store_derivative)
    /// succeeds.
    pub fn record_derivative(
        &self,
        evidence_id: &str,
        record: ManifestDerivative,
    ) -> Result<AuditEntry, StoreError> {
        let lock = self.manifest_lock(evidence_id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut manifest = self.load_manifest(evidence_id)?;
        let details = json!({
            "derivative_type": record.derivative_type,
            "filename": record.filename,
            "sha256": record.sha256,
            "size_bytes": record.size_bytes,
        });
        let entry = AuditEntry::next(
            manifest.audit_head(),
            manifest.audit_entries.len() as u64,
            "derivative_stored",
            "store",
            &record.created_by,
            None,
            details,
        )?;
        manifest.derivatives.push(record);
        manifest.audit_entries.push(entry.clone());
        self.write_manifest(&manifest)?;
        self.append_ledger_line(&LedgerLine {
            evidence_id: evidence_id.to_string(),
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    // ------------------------------------------------------------------
    // Manifests and audit
    // ------------------------------------------------------------------

    /// Load the persisted manifest for one evidence item.
    pub fn load_manifest(&self, evidence_id: &str) -> Result<EvidenceManifest, StoreError> {
        let path = self.manifest_path(evidence_id);
        if !path.is_file() {
            return Err(StoreError::EvidenceNotFound {
                evidence_id: evidence_id.to_string(),
            });
        }
        Ok(EvidenceManifest::from_file(&path)?)
    }

    /// Append one audit entry to an evidence item's chain.
    pub fn append_audit(
        &self,
        evidence_id: &str,
        action: &str,
        component: &str,
        actor: Option<&str>,
        details: Option<Value>,
    ) -> Result<AuditEntry, StoreError> {
        self.append_audit_correlated(evidence_id, action, component, actor, details, None)
    }

    /// Append one audit entry carrying a correlation id, so one logical
    /// multi-item operation is queryable as a unit.
    pub fn append_audit_correlated(
        &self,
        evidence_id: &str,
        action: &str,
        component: &str,
        actor: Option<&str>,
        details: Option<Value>,
        correlation_id: Option<String>,
    ) -> Result<AuditEntry, StoreError> {
        let lock = self.manifest_lock(evidence_id);
        let _guard = lock.lock().expect("lock poisoned");

        let mut manifest = self.load_manifest(evidence_id)?;
        let entry = AuditEntry::next(
            manifest.audit_head(),
            manifest.audit_entries.len() as u64,
            action,
            component,
            actor.unwrap_or(&self.default_actor),
            correlation_id,
            details.unwrap_or(Value::Null),
        )?;
        manifest.audit_entries.push(entry.clone());
        self.write_manifest(&manifest)?;
        self.append_ledger_line(&LedgerLine {
            evidence_id: evidence_id.to_string(),
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    /// Re-read and re-hash a stored original against its declared hash.
    ///
    /// This is the tamper-detection primitive: a missing file or a hash
    /// mismatch fails loudly, quoting expected and actual values.
    pub fn verify_original(&self, sha256: &str) -> VerificationOutcome {
        let Some(path) = self.get_original_path(sha256) else {
            warn!(sha256 = %sha256, "verification failed: original missing");
            return VerificationOutcome::fail(format!(
                "verification FAILED: no stored original for sha256 {sha256}"
            ));
        };

        match digest_file(&path) {
            Ok(ContentDigest {
                sha256: actual,
                size_bytes,
            }) => {
                if actual == sha256 {
                    VerificationOutcome::pass(format!(
                        "original verified: sha256 {sha256} ({size_bytes} bytes)"
                    ))
                } else {
                    warn!(expected = %sha256, actual = %actual, "verification failed: hash mismatch");
                    VerificationOutcome::fail(format!(
                        "verification FAILED: expected sha256 {sha256}, got {actual}"
                    ))
                }
            }
            Err(e) => VerificationOutcome::fail(format!(
                "verification FAILED: could not read stored original for {sha256}: {e}"
            )),
        }
    }

    /// Walk an evidence item's audit chain, returning the entry count.
    pub fn verify_audit_chain(&self, evidence_id: &str) -> Result<usize, StoreError> {
        let manifest = self.load_manifest(evidence_id)?;
        Ok(audit::verify_entries(&manifest.audit_entries)?)
    }

    /// Read every line of the global ledger, oldest first.
    pub fn read_ledger(&self) -> Result<Vec<LedgerLine>, StoreError> {
        let path = self.ledger_path();
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut lines = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines.push(serde_json::from_str(&line)?);
        }
        Ok(lines)
    }

    /// Remove `.tmp` files older than `max_age` left behind by crashed
    /// writers. Returns the number removed.
    pub fn cleanup_orphaned_temps(&self, max_age: Duration) -> Result<usize, StoreError> {
        let temp_dir = self.temp_dir();
        if !temp_dir.exists() {
            return Ok(0);
        }

        let mut cleaned = 0;
        for entry in fs::read_dir(&temp_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(".tmp.") {
                continue;
            }
            if let Ok(metadata) = fs::metadata(&path) {
                if let Ok(modified) = metadata.modified() {
                    if let Ok(age) = modified.elapsed() {
                        if age > max_age && fs::remove_file(&path).is_ok() {
                            cleaned += 1;
                        }
                    }
                }
            }
        }
        Ok(cleaned)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn manifest_lock(&self, evidence_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.manifest_locks.lock().expect("lock poisoned");
        locks
            .entry(evidence_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Copy `source` to `final_path` via a temp file, verifying the copied
    /// stream and then the placed file against `expected_sha256`.
    ///
    /// Returns `true` when this call placed the file, `false` when the path
    /// already held the same content — the caller reports that as a
    /// duplicate, never as an error. With `allow_replace`, a file already at
    /// the path with *different* content is atomically replaced instead
    /// (derivative regeneration); originals never allow that.
    fn copy_verified(
        &self,
        source: &Path,
        expected_sha256: &str,
        final_path: &Path,
        label: &str,
        allow_replace: bool,
    ) -> Result<bool, StoreError> {
        fs::create_dir_all(self.temp_dir())?;
        let temp_path = self.temp_path(label);

        let copied = (|| -> Result<ContentDigest, StoreError> {
            let reader = BufReader::new(File::open(source)?);
            let out = File::create(&temp_path)?;
            let digest = digest_copy(reader, out)?;
            if digest.sha256 != expected_sha256 {
                // Source changed between hashing and copying.
                return Err(StoreError::HashMismatch {
                    expected: expected_sha256.to_string(),
                    actual: digest.sha256,
                });
            }
            Ok(digest)
        })();
        if let Err(e) = copied {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Some(parent) = final_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::Io(e));
            }
        }

        if final_path.exists() {
            if !allow_replace {
                // Lost the race before we even tried; existing content wins.
                let _ = fs::remove_file(&temp_path);
                return Ok(false);
            }
            match digest_file(final_path) {
                Ok(existing) if existing.sha256 == expected_sha256 => {
                    // Same bytes already in place.
                    let _ = fs::remove_file(&temp_path);
                    return Ok(false);
                }
                _ => {
                    // Regeneration: deliberately replace the occupied slot.
                    if let Err(e) = fs::rename(&temp_path, final_path) {
                        let _ = fs::remove_file(&temp_path);
                        return Err(StoreError::Io(e));
                    }
                }
            }
        } else {
            // Link-then-unlink instead of rename: a rename would silently
            // replace a concurrent writer's file, while a hard link fails if
            // the canonical path is already occupied, which is exactly how
            // the loser of a same-hash race finds out.
            let placed = fs::hard_link(&temp_path, final_path);
            let _ = fs::remove_file(&temp_path);
            if let Err(e) = placed {
                if e.kind() == io::ErrorKind::AlreadyExists || final_path.exists() {
                    // Concurrent writer placed the same content first.
                    return Ok(false);
                }
                return Err(StoreError::Io(e));
            }
        }

        // Post-placement verification: re-read what actually landed.
        let placed = digest_file(final_path)?;
        if placed.sha256 != expected_sha256 {
            let _ = fs::remove_file(final_path);
            warn!(expected = %expected_sha256, actual = %placed.sha256, "post-copy verification failed");
            return Err(StoreError::HashMismatch {
                expected: expected_sha256.to_string(),
                actual: placed.sha256,
            });
        }

        Ok(true)
    }

    /// Atomically persist a manifest (temp write, then rename).
    fn write_manifest(&self, manifest: &EvidenceManifest) -> Result<(), StoreError> {
        fs::create_dir_all(self.temp_dir())?;
        let temp_path = self.temp_path("manifest");
        let json = manifest.to_json()?;

        let write = (|| -> Result<(), StoreError> {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
            fs::rename(&temp_path, self.manifest_path(&manifest.evidence_id))?;
            Ok(())
        })();
        if write.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        write
    }

    fn append_ledger_line(&self, line: &LedgerLine) -> Result<(), StoreError> {
        let _guard = self.ledger_lock.lock().expect("lock poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.ledger_path())?;
        let mut json = serde_json::to_string(line)?;
        json.push('\n');
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

/// Lowercased extension of a declared filename, if it has one.
fn declared_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> EvidenceStore {
        EvidenceStore::at(dir.path().join("locker")).unwrap()
    }

    fn write_source(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn request(source: PathBuf, declared: &str) -> IngestRequest {
        IngestRequest {
            source_path: source,
            declared_filename: declared.to_string(),
            mime_type: "video/mp4".to_string(),
            ingested_by: Some("tester".to_string()),
            device_label: Some("dashcam-1".to_string()),
        }
    }

    #[test]
    fn ingest_stores_and_manifests() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip bytes");

        let outcome = store.ingest(&request(source, "clip.mp4")).unwrap();
        assert!(outcome.success);
        assert!(!outcome.duplicate);
        assert_eq!(outcome.sha256.len(), 64);
        assert_eq!(outcome.size_bytes, 10);

        let stored = store.get_original_path(&outcome.sha256).unwrap();
        assert_eq!(fs::read(stored).unwrap(), b"clip bytes");

        let manifest = store.load_manifest(&outcome.evidence_id).unwrap();
        assert_eq!(manifest.ingest.sha256, outcome.sha256);
        assert_eq!(manifest.ingest.original_filename, "clip.mp4");
        assert_eq!(manifest.audit_entries.len(), 1);
        assert_eq!(manifest.audit_entries[0].action, "ingested");
    }

    #[test]
    fn duplicate_ingest_shares_hash_not_id() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = write_source(&dir, "a.mp4", b"same bytes");
        let b = write_source(&dir, "b.mp4", b"same bytes");

        let first = store.ingest(&request(a, "a.mp4")).unwrap();
        let second = store.ingest(&request(b, "b.mp4")).unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.sha256, second.sha256);
        assert_ne!(first.evidence_id, second.evidence_id);
    }

    #[test]
    fn original_path_is_keyed_by_hash_not_name() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "whatever.mov", b"content");

        let outcome = store.ingest(&request(source, "Declared Name.MOV")).unwrap();
        let path = store.get_original_path(&outcome.sha256).unwrap();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains(&outcome.sha256));
        assert!(path_str.contains(&outcome.sha256[..2]));
        assert!(path_str.ends_with("original.mov"));
    }

    #[test]
    fn verify_original_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "doc.pdf", b"original bytes");

        let outcome = store.ingest(&request(source, "doc.pdf")).unwrap();
        assert!(store.verify_original(&outcome.sha256).passed);

        // Corrupt the stored copy by appending.
        let stored = store.get_original_path(&outcome.sha256).unwrap();
        let mut bytes = fs::read(&stored).unwrap();
        bytes.extend_from_slice(b"!");
        fs::write(&stored, bytes).unwrap();

        let verdict = store.verify_original(&outcome.sha256);
        assert!(!verdict.passed);
        assert!(verdict.message.contains("FAILED"));
        assert!(verdict.message.contains(&outcome.sha256));
    }

    #[test]
    fn verify_original_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let verdict = store.verify_original(&"f".repeat(64));
        assert!(!verdict.passed);
        assert!(verdict.message.contains("no stored original"));
    }

    #[test]
    fn derivative_requires_original() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let thumb = write_source(&dir, "thumb.jpg", b"jpeg");

        let missing = "0".repeat(64);
        let result = store.store_derivative(&missing, "thumbnail", &thumb, "thumb.jpg");
        assert!(matches!(result, Err(StoreError::OriginalNotFound { .. })));
    }

    #[test]
    fn derivative_roundtrip_and_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        let thumb = write_source(&dir, "thumb.jpg", b"jpeg bytes");

        let ingest = store.ingest(&request(source, "clip.mp4")).unwrap();
        let derived = store
            .store_derivative(&ingest.sha256, "thumbnail", &thumb, "thumb.jpg")
            .unwrap();
        assert_eq!(derived.size_bytes, 10);

        let path = store
            .get_derivative_path(&ingest.sha256, "thumbnail", "thumb.jpg")
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"jpeg bytes");

        store
            .record_derivative(
                &ingest.evidence_id,
                ManifestDerivative {
                    derivative_type: "thumbnail".to_string(),
                    filename: "thumb.jpg".to_string(),
                    mime_type: "image/jpeg".to_string(),
                    sha256: derived.sha256.clone(),
                    size_bytes: derived.size_bytes,
                    created_at: Utc::now(),
                    created_by: "thumbnailer".to_string(),
                },
            )
            .unwrap();

        let manifest = store.load_manifest(&ingest.evidence_id).unwrap();
        assert_eq!(manifest.derivatives.len(), 1);
        assert_eq!(manifest.derivatives[0].sha256, derived.sha256);
        assert_eq!(manifest.audit_entries.len(), 2);
        assert_eq!(manifest.audit_entries[1].action, "derivative_stored");
    }

    #[test]
    fn regenerated_derivative_replaces_the_slot() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        let ingest = store.ingest(&request(source, "clip.mp4")).unwrap();

        let v1 = write_source(&dir, "thumb_v1.jpg", b"first render");
        store
            .store_derivative(&ingest.sha256, "thumbnail", &v1, "thumb.jpg")
            .unwrap();

        let v2 = write_source(&dir, "thumb_v2.jpg", b"second render");
        let derived = store
            .store_derivative(&ingest.sha256, "thumbnail", &v2, "thumb.jpg")
            .unwrap();

        let path = store
            .get_derivative_path(&ingest.sha256, "thumbnail", "thumb.jpg")
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"second render");
        assert_eq!(derived.sha256, crate::digest::digest_bytes(b"second render"));
    }

    #[test]
    fn audit_append_preserves_prior_entries() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        let ingest = store.ingest(&request(source, "clip.mp4")).unwrap();

        for i in 0..3 {
            store
                .append_audit(
                    &ingest.evidence_id,
                    "viewed",
                    "store",
                    Some("reviewer"),
                    Some(json!({ "view": i })),
                )
                .unwrap();
        }

        let before = store.load_manifest(&ingest.evidence_id).unwrap();
        let serialized_before: Vec<String> = before.audit_entries[..3]
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();

        store
            .append_audit(&ingest.evidence_id, "viewed", "store", None, None)
            .unwrap();

        let after = store.load_manifest(&ingest.evidence_id).unwrap();
        assert_eq!(after.audit_entries.len(), 5);
        let serialized_after: Vec<String> = after.audit_entries[..3]
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        assert_eq!(serialized_before, serialized_after);

        assert_eq!(store.verify_audit_chain(&ingest.evidence_id).unwrap(), 5);
    }

    #[test]
    fn audit_chain_detects_manifest_tampering() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        let ingest = store.ingest(&request(source, "clip.mp4")).unwrap();
        store
            .append_audit(&ingest.evidence_id, "viewed", "store", None, None)
            .unwrap();

        // Edit a persisted entry's action by hand.
        let path = store.manifest_path(&ingest.evidence_id);
        let text = fs::read_to_string(&path)
            .unwrap()
            .replace("\"viewed\"", "\"redacted\"");
        fs::write(&path, text).unwrap();

        assert!(matches!(
            store.verify_audit_chain(&ingest.evidence_id),
            Err(StoreError::AuditChain(AuditChainError::BadEntryHash { .. }))
        ));
    }

    #[test]
    fn global_ledger_accumulates_lines() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = write_source(&dir, "a.bin", b"aaa");
        let b = write_source(&dir, "b.bin", b"bbb");

        let first = store.ingest(&request(a, "a.bin")).unwrap();
        store.ingest(&request(b, "b.bin")).unwrap();
        store
            .append_audit(&first.evidence_id, "viewed", "store", None, None)
            .unwrap();

        let lines = store.read_ledger().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].entry.action, "ingested");
        assert_eq!(lines[2].entry.action, "viewed");
        assert_eq!(lines[2].evidence_id, first.evidence_id);
    }

    #[test]
    fn correlated_entries_carry_the_id() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        let ingest = store.ingest(&request(source, "clip.mp4")).unwrap();

        let entry = store
            .append_audit_correlated(
                &ingest.evidence_id,
                "batch_tagged",
                "store",
                None,
                None,
                Some("batch-42".to_string()),
            )
            .unwrap();
        assert_eq!(entry.correlation_id.as_deref(), Some("batch-42"));
    }

    #[test]
    fn load_manifest_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.load_manifest("no-such-id"),
            Err(StoreError::EvidenceNotFound { .. })
        ));
    }

    #[test]
    fn cleanup_removes_stale_temps() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let stale = store.temp_dir().join(".tmp.ingest.1.1");
        fs::write(&stale, b"leftover").unwrap();

        let cleaned = store.cleanup_orphaned_temps(Duration::ZERO).unwrap();
        assert_eq!(cleaned, 1);
        assert!(!stale.exists());
    }

    #[test]
    fn no_temp_files_remain_after_ingest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let source = write_source(&dir, "clip.mp4", b"clip");
        store.ingest(&request(source, "clip.mp4")).unwrap();

        let leftovers: Vec<_> = fs::read_dir(store.temp_dir()).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
