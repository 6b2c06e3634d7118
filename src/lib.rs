//! Evidence Locker - content-addressed evidence storage and pipeline registry
//!
//! This crate implements the evidence-integrity core of a digital evidence
//! product: a content-addressed store that holds originals immutably, tracks
//! every derivative by provenance hash, records every operation in an
//! append-only, hash-chained audit ledger, and models the processing
//! pipeline as an explicit, validated dependency graph. It is a local
//! library boundary: no wire protocol, no UI.

pub mod config;
pub mod digest;
pub mod export;
pub mod graph;
pub mod registry;
pub mod store;

pub use config::{ConfigError, ConfigOverlay, LockerConfig};
pub use digest::{digest_bytes, digest_file, digest_reader, ContentDigest};
pub use export::{ExportError, ExportOutcome, ExportRequest, Exporter};
pub use graph::{EvidenceGraph, GraphError, MarkerPosition, RecordState};
pub use registry::{standard_pipeline, RegistryError, ToolManifest, ToolRegistry};
pub use store::{
    EvidenceStore, IngestOutcome, IngestRequest, StoreError, VerificationOutcome,
};
