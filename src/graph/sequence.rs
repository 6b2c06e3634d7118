//! Sequence clustering heuristic.
//!
//! Groups evidence items that plausibly belong to one recording sequence:
//! same device, ordered by clip start time, split wherever the gap between
//! consecutive clips exceeds a threshold. Items without a start time fall
//! back to filename ordering within their device.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::records::SequenceMember;

/// Name and version of the clustering algorithm recorded on every group it
/// produces.
pub const SEQUENCE_ALGORITHM: &str = "device-time-gap/1";

/// Bucket label for candidates with no device metadata.
const UNLABELED_DEVICE: &str = "(unlabeled)";

/// One evidence item offered to the clusterer.
#[derive(Debug, Clone)]
pub struct SequenceCandidate {
    pub evidence_id: String,
    pub device_label: Option<String>,
    pub clip_start_time: Option<DateTime<Utc>>,
    pub filename: String,
}

/// A cluster proposal: label, algorithm, ordered members.
#[derive(Debug, Clone)]
pub struct SequenceGroupSpec {
    pub label: String,
    pub algorithm: String,
    pub members: Vec<SequenceMember>,
}

/// Cluster candidates into sequence groups.
///
/// Only runs of two or more clips become groups; a lone clip is not a
/// sequence. Output order is deterministic: devices alphabetically, runs
/// chronologically.
pub fn cluster_candidates(
    candidates: &[SequenceCandidate],
    gap_seconds: i64,
) -> Vec<SequenceGroupSpec> {
    let mut by_device: BTreeMap<String, Vec<&SequenceCandidate>> = BTreeMap::new();
    for candidate in candidates {
        let device = candidate
            .device_label
            .clone()
            .unwrap_or_else(|| UNLABELED_DEVICE.to_string());
        by_device.entry(device).or_default().push(candidate);
    }

    let mut groups = Vec::new();
    for (device, mut bucket) in by_device {
        // Timed clips first in chronological order, untimed clips after in
        // filename order.
        bucket.sort_by(|a, b| match (&a.clip_start_time, &b.clip_start_time) {
            (Some(x), Some(y)) => x.cmp(y).then_with(|| a.filename.cmp(&b.filename)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.filename.cmp(&b.filename),
        });

        let mut run: Vec<&SequenceCandidate> = Vec::new();
        let mut run_number = 0u32;
        for candidate in bucket {
            let splits = match (run.last().and_then(|p| p.clip_start_time), candidate.clip_start_time) {
                (Some(prev), Some(next)) => (next - prev).num_seconds() > gap_seconds,
                // First clip, or transition into the untimed tail: keep the
                // untimed tail as one naming-ordered run of its own.
                (None, _) => false,
                (Some(_), None) => true,
            };
            if splits && !run.is_empty() {
                push_group(&mut groups, &device, &mut run_number, std::mem::take(&mut run));
            }
            run.push(candidate);
        }
        push_group(&mut groups, &device, &mut run_number, run);
    }

    groups
}

fn push_group(
    groups: &mut Vec<SequenceGroupSpec>,
    device: &str,
    run_number: &mut u32,
    run: Vec<&SequenceCandidate>,
) {
    if run.len() < 2 {
        return;
    }
    *run_number += 1;
    let members = run
        .iter()
        .enumerate()
        .map(|(index, candidate)| SequenceMember {
            evidence_id: candidate.evidence_id.clone(),
            sequence_index: index as u32,
            device_label: candidate.device_label.clone(),
            clip_start_time: candidate.clip_start_time,
        })
        .collect();
    groups.push(SequenceGroupSpec {
        label: format!("{device} sequence {run_number}"),
        algorithm: SEQUENCE_ALGORITHM.to_string(),
        members,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, second).unwrap()
    }

    fn candidate(id: &str, device: &str, time: Option<DateTime<Utc>>) -> SequenceCandidate {
        SequenceCandidate {
            evidence_id: id.to_string(),
            device_label: Some(device.to_string()),
            clip_start_time: time,
            filename: format!("{id}.mp4"),
        }
    }

    #[test]
    fn interleaved_devices_cluster_separately() {
        let candidates = vec![
            candidate("a1", "dashcam", Some(at(0, 0))),
            candidate("b1", "bodycam", Some(at(0, 10))),
            candidate("a2", "dashcam", Some(at(0, 30))),
            candidate("b2", "bodycam", Some(at(0, 40))),
        ];

        let groups = cluster_candidates(&candidates, 120);
        assert_eq!(groups.len(), 2);
        // BTreeMap ordering: bodycam before dashcam.
        assert_eq!(groups[0].members[0].evidence_id, "b1");
        assert_eq!(groups[1].members[0].evidence_id, "a1");
        for group in &groups {
            assert_eq!(group.algorithm, SEQUENCE_ALGORITHM);
            let indexes: Vec<u32> = group.members.iter().map(|m| m.sequence_index).collect();
            assert_eq!(indexes, vec![0, 1]);
        }
    }

    #[test]
    fn large_gap_splits_runs() {
        let candidates = vec![
            candidate("c1", "dashcam", Some(at(0, 0))),
            candidate("c2", "dashcam", Some(at(1, 0))),
            candidate("c3", "dashcam", Some(at(30, 0))),
            candidate("c4", "dashcam", Some(at(31, 0))),
        ];

        let groups = cluster_candidates(&candidates, 120);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].members[0].evidence_id, "c3");
    }

    #[test]
    fn singletons_are_not_sequences() {
        let candidates = vec![
            candidate("solo", "dashcam", Some(at(0, 0))),
            candidate("far", "dashcam", Some(at(45, 0))),
        ];
        assert!(cluster_candidates(&candidates, 120).is_empty());
    }

    #[test]
    fn untimed_clips_group_by_filename() {
        let candidates = vec![
            candidate("z-second", "gopro", None),
            candidate("a-first", "gopro", None),
        ];
        let groups = cluster_candidates(&candidates, 120);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members[0].evidence_id, "a-first");
        assert_eq!(groups[0].members[1].evidence_id, "z-second");
    }

    #[test]
    fn sequence_index_is_strictly_increasing() {
        let candidates: Vec<SequenceCandidate> = (0u32..5)
            .map(|i| candidate(&format!("c{i}"), "cam", Some(at(0, i * 10))))
            .collect();
        let groups = cluster_candidates(&candidates, 120);
        assert_eq!(groups.len(), 1);
        let indexes: Vec<u32> = groups[0].members.iter().map(|m| m.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
    }
}
