//! Evidence exporter.
//!
//! Builds one self-verifying ZIP package per evidence item from the store
//! alone: the original, the included derivatives, `manifest.json`,
//! `audit_log.json`, and `integrity_report.md`, written in a fixed order for
//! reproducibility. The package is assembled at a temp path and renamed into
//! place; a failed export deletes its partial package and leaves nothing
//! behind. The finished package is hashed, and that hash is both returned
//! and appended to the source evidence's audit chain — exporting is itself
//! an audited event.

pub mod report;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::LockerConfig;
use crate::digest::{digest_copy, digest_file};
use crate::store::{
    AuditEntry, EvidenceStore, ManifestDerivative, StoreError, VerificationOutcome,
};

/// Schema version for export manifests.
pub const EXPORT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for export manifests.
pub const EXPORT_SCHEMA_ID: &str = "evidence-locker/export@1";

/// Errors from export operations.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("original missing from store: sha256 {sha256}")]
    MissingOriginal { sha256: String },

    #[error("derivative missing from store: {derivative_type}/{filename}")]
    MissingDerivative {
        derivative_type: String,
        filename: String,
    },

    #[error("integrity failure packaging {path}: expected sha256 {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Inputs to one export call.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    /// Evidence item to package.
    pub evidence_id: String,

    /// Whether derivatives are packaged alongside the original.
    pub include_derivatives: bool,

    /// Acting user recorded in the package and the audit trail.
    pub exported_by: Option<String>,
}

impl ExportRequest {
    pub fn new(evidence_id: &str) -> Self {
        Self {
            evidence_id: evidence_id.to_string(),
            include_derivatives: true,
            exported_by: None,
        }
    }
}

/// One file inside a package, with its own hash and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackagedFile {
    /// Path inside the package.
    pub path: String,

    /// SHA-256 of the packaged bytes.
    pub sha256: String,

    /// Size in bytes.
    pub size_bytes: u64,
}

/// Export metadata block inside `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportInfo {
    pub exported_at: DateTime<Utc>,
    pub exported_by: String,
    pub include_derivatives: bool,
    pub package_name: String,
}

/// The `manifest.json` document written into every package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub evidence_id: String,
    pub ingest: crate::store::IngestRecord,
    pub derivatives: Vec<ManifestDerivative>,
    pub files: Vec<PackagedFile>,
    pub export: ExportInfo,
}

/// The `audit_log.json` document written into every package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogDocument {
    pub evidence_id: String,
    pub entries: Vec<AuditEntry>,
}

/// Result of one export call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOutcome {
    /// Always true on `Ok`; failures are `Err` and leave no package behind.
    pub success: bool,

    /// Where the package was written.
    pub export_path: PathBuf,

    /// Number of entries in the package.
    pub file_count: usize,

    /// Total bytes written into package entries.
    pub total_bytes: u64,

    /// SHA-256 sealing the entire package file.
    pub package_sha256: String,

    /// Present only in serialized failure reports produced by callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds export packages from a store.
pub struct Exporter {
    export_dir: PathBuf,
}

impl Exporter {
    /// Exporter writing into the configured export directory.
    pub fn new(config: &LockerConfig) -> Result<Self, ExportError> {
        let export_dir = config.effective_export_dir();
        fs::create_dir_all(&export_dir)?;
        Ok(Self { export_dir })
    }

    /// Exporter writing into `<store root>/exports`.
    pub fn for_store(store: &EvidenceStore) -> Result<Self, ExportError> {
        let export_dir = store.root().join("exports");
        fs::create_dir_all(&export_dir)?;
        Ok(Self { export_dir })
    }

    /// Build one package. Fails fast on an unknown evidence id; on any
    /// failure the partial package is deleted before returning.
    pub fn export(
        &self,
        store: &EvidenceStore,
        request: &ExportRequest,
    ) -> Result<ExportOutcome, ExportError> {
        let manifest = store.load_manifest(&request.evidence_id)?;
        let exported_at = Utc::now();
        let exported_by = request
            .exported_by
            .clone()
            .unwrap_or_else(|| "system".to_string());

        let id_prefix = &request.evidence_id[..8.min(request.evidence_id.len())];
        let package_name = format!(
            "{id_prefix}_{}.zip",
            exported_at.format("%Y%m%dT%H%M%S%9fZ")
        );
        let final_path = self.export_dir.join(&package_name);
        let temp_path = self.temp_path(&package_name);

        let export_info = ExportInfo {
            exported_at,
            exported_by: exported_by.clone(),
            include_derivatives: request.include_derivatives,
            package_name: package_name.clone(),
        };

        let built = self.build_package(store, &manifest, &export_info, &temp_path);
        let (file_count, total_bytes) = match built {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                warn!(evidence_id = %request.evidence_id, error = %e, "export failed; partial package removed");
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&temp_path, &final_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(ExportError::Io(e));
        }

        // Seal: hash the entire finished package.
        let package_sha256 = match digest_file(&final_path) {
            Ok(digest) => digest.sha256,
            Err(e) => {
                let _ = fs::remove_file(&final_path);
                return Err(ExportError::Io(e));
            }
        };

        // Exporting is itself an audited event on the source evidence.
        let audited = store.append_audit(
            &request.evidence_id,
            "exported",
            "exporter",
            Some(&exported_by),
            Some(json!({
                "package_name": package_name,
                "package_sha256": package_sha256,
                "file_count": file_count,
                "total_bytes": total_bytes,
            })),
        );
        if let Err(e) = audited {
            let _ = fs::remove_file(&final_path);
            return Err(ExportError::Store(e));
        }

        info!(
            evidence_id = %request.evidence_id,
            package = %final_path.display(),
            package_sha256 = %package_sha256,
            file_count,
            "exported evidence package"
        );

        Ok(ExportOutcome {
            success: true,
            export_path: final_path,
            file_count,
            total_bytes,
            package_sha256,
            error: None,
        })
    }

    /// Re-hash a finished package against its recorded seal.
    pub fn verify_package(path: &Path, expected_sha256: &str) -> VerificationOutcome {
        match digest_file(path) {
            Ok(digest) => {
                if digest.sha256 == expected_sha256 {
                    VerificationOutcome::pass(format!(
                        "package verified: sha256 {expected_sha256}"
                    ))
                } else {
                    VerificationOutcome::fail(format!(
                        "package verification FAILED: expected sha256 {expected_sha256}, got {}",
                        digest.sha256
                    ))
                }
            }
            Err(e) => VerificationOutcome::fail(format!(
                "package verification FAILED: could not read {}: {e}",
                path.display()
            )),
        }
    }

    fn temp_path(&self, package_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.export_dir
            .join(format!(".tmp.{package_name}.{}.{nanos}", std::process::id()))
    }

    /// Write all package entries in their fixed order. Returns
    /// `(file_count, total_bytes)`.
    fn build_package(
        &self,
        store: &EvidenceStore,
        manifest: &crate::store::EvidenceManifest,
        export_info: &ExportInfo,
        temp_path: &Path,
    ) -> Result<(usize, u64), ExportError> {
        let file = File::create(temp_path)?;
        let mut zip = ZipWriter::new(BufWriter::new(file));
        let options = SimpleFileOptions::default();

        let mut packaged: Vec<PackagedFile> = Vec::new();

        // (1) The original, verified against the ingest hash as it is read.
        let original_path = store.get_original_path(&manifest.ingest.sha256).ok_or_else(|| {
            ExportError::MissingOriginal {
                sha256: manifest.ingest.sha256.clone(),
            }
        })?;
        let original_entry = format!("originals/{}", manifest.ingest.original_filename);
        let entry = write_file_entry(&mut zip, options, &original_entry, &original_path)?;
        if entry.sha256 != manifest.ingest.sha256 {
            return Err(ExportError::Integrity {
                path: original_entry,
                expected: manifest.ingest.sha256.clone(),
                actual: entry.sha256,
            });
        }
        packaged.push(entry);

        // (2) Derivatives, latest record per (type, filename), sorted.
        let included = if export_info.include_derivatives {
            current_derivative_records(manifest)
        } else {
            Vec::new()
        };
        for derivative in &included {
            let source = store
                .get_derivative_path(
                    &manifest.ingest.sha256,
                    &derivative.derivative_type,
                    &derivative.filename,
                )
                .ok_or_else(|| ExportError::MissingDerivative {
                    derivative_type: derivative.derivative_type.clone(),
                    filename: derivative.filename.clone(),
                })?;
            let entry_name = format!(
                "derivatives/{}/{}",
                derivative.derivative_type, derivative.filename
            );
            let entry = write_file_entry(&mut zip, options, &entry_name, &source)?;
            if entry.sha256 != derivative.sha256 {
                return Err(ExportError::Integrity {
                    path: entry_name,
                    expected: derivative.sha256.clone(),
                    actual: entry.sha256,
                });
            }
            packaged.push(entry);
        }

        // (3) manifest.json over the data files packaged so far.
        let export_manifest = ExportManifest {
            schema_version: EXPORT_SCHEMA_VERSION,
            schema_id: EXPORT_SCHEMA_ID.to_string(),
            evidence_id: manifest.evidence_id.clone(),
            ingest: manifest.ingest.clone(),
            derivatives: included.clone(),
            files: packaged.clone(),
            export: export_info.clone(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&export_manifest)?;
        packaged.push(write_bytes_entry(
            &mut zip,
            options,
            "manifest.json",
            &manifest_bytes,
        )?);

        // (4) The full audit history.
        let audit_bytes = serde_json::to_vec_pretty(&AuditLogDocument {
            evidence_id: manifest.evidence_id.clone(),
            entries: manifest.audit_entries.clone(),
        })?;
        packaged.push(write_bytes_entry(
            &mut zip,
            options,
            "audit_log.json",
            &audit_bytes,
        )?);

        // (5) The human-auditable report, covering everything above.
        let report = report::render(manifest, &included, &packaged, export_info);
        packaged.push(write_bytes_entry(
            &mut zip,
            options,
            "integrity_report.md",
            report.as_bytes(),
        )?);

        zip.finish()?;

        let total_bytes = packaged.iter().map(|f| f.size_bytes).sum();
        Ok((packaged.len(), total_bytes))
    }
}

/// Latest derivative record per `(type, filename)`, sorted by that key.
fn current_derivative_records(
    manifest: &crate::store::EvidenceManifest,
) -> Vec<ManifestDerivative> {
    let mut latest: BTreeMap<(String, String), ManifestDerivative> = BTreeMap::new();
    for record in &manifest.derivatives {
        latest.insert(
            (record.derivative_type.clone(), record.filename.clone()),
            record.clone(),
        );
    }
    latest.into_values().collect()
}

/// Stream one file from disk into the package, hashing it on the way.
fn write_file_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    entry_name: &str,
    source: &Path,
) -> Result<PackagedFile, ExportError> {
    zip.start_file(entry_name, options)?;
    let reader = BufReader::new(File::open(source)?);
    let digest = digest_copy(reader, &mut *zip)?;
    Ok(PackagedFile {
        path: entry_name.to_string(),
        sha256: digest.sha256,
        size_bytes: digest.size_bytes,
    })
}

/// Write an in-memory document into the package.
fn write_bytes_entry<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    entry_name: &str,
    bytes: &[u8],
) -> Result<PackagedFile, ExportError> {
    zip.start_file(entry_name, options)?;
    zip.write_all(bytes)?;
    Ok(PackagedFile {
        path: entry_name.to_string(),
        sha256: crate::digest::digest_bytes(bytes),
        size_bytes: bytes.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IngestRequest;
    use std::io::Read;
    use tempfile::TempDir;

    fn ingest_one(dir: &TempDir, store: &EvidenceStore, content: &[u8]) -> crate::store::IngestOutcome {
        let source = dir.path().join("clip.mp4");
        fs::write(&source, content).unwrap();
        store
            .ingest(&IngestRequest {
                source_path: source,
                declared_filename: "clip.mp4".to_string(),
                mime_type: "video/mp4".to_string(),
                ingested_by: Some("intake".to_string()),
                device_label: None,
            })
            .unwrap()
    }

    #[test]
    fn export_unknown_evidence_fails_fast() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();

        let result = exporter.export(&store, &ExportRequest::new("no-such-id"));
        assert!(matches!(
            result,
            Err(ExportError::Store(StoreError::EvidenceNotFound { .. }))
        ));
        // Nothing may be left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("locker/exports"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn package_contains_the_fixed_entry_set() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"package me");

        let outcome = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.file_count, 4); // original + three metadata docs
        assert_eq!(outcome.package_sha256.len(), 64);

        let file = File::open(&outcome.export_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        for required in ["originals/clip.mp4", "manifest.json", "audit_log.json", "integrity_report.md"] {
            assert!(archive.by_name(required).is_ok(), "missing {required}");
        }
    }

    #[test]
    fn packaged_manifest_carries_the_ingest_hash() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"hash binding");

        let outcome = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();

        let file = File::open(&outcome.export_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut json = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut json)
            .unwrap();
        let parsed: ExportManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.ingest.sha256, ingest.sha256);
        assert_eq!(parsed.evidence_id, ingest.evidence_id);
        assert_eq!(parsed.files[0].path, "originals/clip.mp4");
        assert_eq!(parsed.files[0].sha256, ingest.sha256);
    }

    #[test]
    fn export_appends_an_audit_entry_with_the_seal() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"audited export");

        let outcome = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();

        let manifest = store.load_manifest(&ingest.evidence_id).unwrap();
        let last = manifest.audit_entries.last().unwrap();
        assert_eq!(last.action, "exported");
        assert_eq!(last.component, "exporter");
        assert_eq!(
            last.details["package_sha256"].as_str().unwrap(),
            outcome.package_sha256
        );
        assert_eq!(store.verify_audit_chain(&ingest.evidence_id).unwrap(), 2);
    }

    #[test]
    fn verify_package_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"sealed");

        let outcome = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();
        assert!(Exporter::verify_package(&outcome.export_path, &outcome.package_sha256).passed);

        let mut bytes = fs::read(&outcome.export_path).unwrap();
        bytes.push(0);
        fs::write(&outcome.export_path, bytes).unwrap();

        let verdict = Exporter::verify_package(&outcome.export_path, &outcome.package_sha256);
        assert!(!verdict.passed);
        assert!(verdict.message.contains(&outcome.package_sha256));
    }

    #[test]
    fn corrupted_original_aborts_the_export_cleanly() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"will be corrupted");

        let stored = store.get_original_path(&ingest.sha256).unwrap();
        fs::write(&stored, b"tampered").unwrap();

        let result = exporter.export(&store, &ExportRequest::new(&ingest.evidence_id));
        assert!(matches!(result, Err(ExportError::Integrity { .. })));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("locker/exports"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty(), "partial package left behind");
    }

    #[test]
    fn concurrent_style_exports_produce_distinct_packages() {
        let dir = TempDir::new().unwrap();
        let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
        let exporter = Exporter::for_store(&store).unwrap();
        let ingest = ingest_one(&dir, &store, b"exported twice");

        let first = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();
        let second = exporter
            .export(&store, &ExportRequest::new(&ingest.evidence_id))
            .unwrap();
        assert_ne!(first.export_path, second.export_path);
        // Second package embeds the first export's audit entry, so the
        // seals differ too.
        assert_ne!(first.package_sha256, second.package_sha256);
    }
}
