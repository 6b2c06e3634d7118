//! Overlay tests against a live store
//!
//! The graph overlay is a rebuildable secondary index: everything the store
//! persists must come back from a rescan, and overlay writes must never be
//! needed for the store to stay coherent.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use evidence_locker::graph::{
    cluster_candidates, DerivativeSpec, EvidenceGraph, SequenceCandidate,
};
use evidence_locker::store::{EvidenceStore, IngestRequest, ManifestDerivative};
use tempfile::TempDir;

fn ingest(store: &EvidenceStore, dir: &TempDir, name: &str, content: &[u8]) -> (String, String) {
    let source: PathBuf = dir.path().join(name);
    fs::write(&source, content).unwrap();
    let outcome = store
        .ingest(&IngestRequest {
            source_path: source,
            declared_filename: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            ingested_by: Some("intake".to_string()),
            device_label: Some("dashcam-1".to_string()),
        })
        .unwrap();
    (outcome.evidence_id, outcome.sha256)
}

#[test]
fn rebuild_recovers_derivatives_and_audit_events() {
    let dir = TempDir::new().unwrap();
    let store = EvidenceStore::at(dir.path().join("locker")).unwrap();

    let (first_id, first_sha) = ingest(&store, &dir, "one.bin", b"first item");
    let (second_id, _) = ingest(&store, &dir, "two.bin", b"second item");

    let thumb = dir.path().join("thumb.jpg");
    fs::write(&thumb, b"thumbnail").unwrap();
    let derived = store
        .store_derivative(&first_sha, "thumbnail", &thumb, "thumb.jpg")
        .unwrap();
    store
        .record_derivative(
            &first_id,
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

    let graph = EvidenceGraph::new();
    let summary = graph.rebuild_from_store(&store).unwrap();
    assert_eq!(summary.manifests, 2);
    assert_eq!(summary.derivatives, 1);
    // Two ingest entries plus one derivative entry.
    assert_eq!(summary.audit_events, 3);

    let rows = graph.current_derivatives(&first_id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].original_sha256, first_sha);
    assert_eq!(rows[0].sha256, derived.sha256);

    assert_eq!(graph.events_for_evidence(&second_id).len(), 1);
}

#[test]
fn rebuild_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
    ingest(&store, &dir, "one.bin", b"only item");

    let graph = EvidenceGraph::new();
    let first = graph.rebuild_from_store(&store).unwrap();
    let second = graph.rebuild_from_store(&store).unwrap();
    assert_eq!(first, second);
    assert_eq!(graph.events_for_correlation("nothing").len(), 0);
}

#[test]
fn overlay_rows_mirror_store_results_without_recomputing() {
    let dir = TempDir::new().unwrap();
    let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
    let (evidence_id, sha256) = ingest(&store, &dir, "clip.mp4", b"clip bytes");

    let proxy = dir.path().join("proxy.mp4");
    fs::write(&proxy, b"proxy bytes").unwrap();
    let derived = store
        .store_derivative(&sha256, "proxy", &proxy, "proxy.mp4")
        .unwrap();

    // The overlay row copies the store's hashes; provenance queries then
    // never touch the filesystem.
    let graph = EvidenceGraph::new();
    let row_id = graph.record_derivative(DerivativeSpec {
        evidence_id: evidence_id.clone(),
        original_sha256: sha256.clone(),
        derivative_type: "proxy".to_string(),
        filename: "proxy.mp4".to_string(),
        mime_type: "video/mp4".to_string(),
        sha256: derived.sha256.clone(),
        size_bytes: derived.size_bytes,
        created_by: "transcoder".to_string(),
    });

    fs::remove_dir_all(store.root().join("derivatives")).unwrap();
    let row = graph.derivative(row_id).unwrap();
    assert_eq!(row.original_sha256, sha256);
    assert_eq!(row.sha256, derived.sha256);
}

#[test]
fn clustered_ingests_become_sequence_groups() {
    let dir = TempDir::new().unwrap();
    let store = EvidenceStore::at(dir.path().join("locker")).unwrap();
    let graph = EvidenceGraph::new();

    let base = Utc::now();
    let mut candidates = Vec::new();
    for i in 0..3u32 {
        let (evidence_id, _) = ingest(
            &store,
            &dir,
            &format!("clip-{i}.mp4"),
            format!("clip {i}").as_bytes(),
        );
        candidates.push(SequenceCandidate {
            evidence_id,
            device_label: Some("dashcam-1".to_string()),
            clip_start_time: Some(base + chrono::Duration::seconds(i64::from(i) * 30)),
            filename: format!("clip-{i}.mp4"),
        });
    }

    let specs = cluster_candidates(&candidates, 120);
    assert_eq!(specs.len(), 1);
    let group_id = graph.create_sequence_group(specs.into_iter().next().unwrap());

    let members = graph.group_members(group_id).unwrap();
    assert_eq!(members.len(), 3);
    assert_eq!(members[0].evidence_id, candidates[0].evidence_id);
    let indexes: Vec<u32> = members.iter().map(|m| m.sequence_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}
