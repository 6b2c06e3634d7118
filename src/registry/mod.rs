//! Tool registry.
//!
//! The processing pipeline is an explicit, validated dependency graph, not
//! an implicit call order. Tools register immutable manifests; the registry
//! checks that every declared dependency exists and that the graph is
//! acyclic, and computes topologically sorted execution plans.
//!
//! Lifecycle: a registry is *open* while tools are being registered, and
//! *validated* once [`ToolRegistry::validate`] has passed, after which
//! further registration is rejected. Callers must validate before trusting
//! an execution plan.

pub mod manifest;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::digest::{digest_bytes, digest_file};
use crate::store::VerificationOutcome;

pub use manifest::{
    ToolCategory, ToolManifest, ToolParameter, TOOL_SCHEMA_ID, TOOL_SCHEMA_VERSION,
};

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {name}")]
    DuplicateTool { name: String },

    #[error("unknown tool: {name}")]
    ToolNotFound { name: String },

    #[error("missing dependencies: {}", .names.join(", "))]
    MissingDependencies { names: Vec<String> },

    #[error("dependency cycle: {}", .path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("registry is validated and sealed; cannot register {name}")]
    RegistrySealed { name: String },

    #[error("canonicalization failed: {0}")]
    Canonical(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialized registry snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct RegistrySnapshot {
    schema_version: u32,
    schema_id: String,
    exported_at: DateTime<Utc>,
    tool_count: usize,
    tools: BTreeMap<String, ToolManifest>,
}

/// Name → manifest map with graph validation and execution planning.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolManifest>,
    validated: bool,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tool. Rejects a name that is already taken and any
    /// registration after the registry has been validated.
    pub fn register(&mut self, manifest: ToolManifest) -> Result<(), RegistryError> {
        if self.validated {
            return Err(RegistryError::RegistrySealed {
                name: manifest.name.clone(),
            });
        }
        if self.tools.contains_key(&manifest.name) {
            return Err(RegistryError::DuplicateTool {
                name: manifest.name.clone(),
            });
        }
        self.tools.insert(manifest.name.clone(), manifest);
        Ok(())
    }

    /// Look up one manifest.
    pub fn get(&self, name: &str) -> Option<&ToolManifest> {
        self.tools.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Whether validation has passed and the registry is sealed.
    pub fn is_validated(&self) -> bool {
        self.validated
    }

    /// Every declared dependency that is not itself registered, sorted and
    /// deduplicated. Reports without raising; the caller decides fatality.
    pub fn validate_dependencies(&self) -> Vec<String> {
        let mut missing = BTreeSet::new();
        for tool in self.tools.values() {
            for dep in &tool.depends_on {
                if !self.tools.contains_key(dep) {
                    missing.insert(dep.clone());
                }
            }
        }
        missing.into_iter().collect()
    }

    /// Every dependency cycle, each as an ordered name list. A clean graph
    /// returns an empty list. Edges to unregistered names are skipped here;
    /// [`validate_dependencies`](Self::validate_dependencies) reports those.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();
        let mut done: BTreeSet<&str> = BTreeSet::new();

        for root in self.tools.keys() {
            if done.contains(root.as_str()) {
                continue;
            }
            let mut path: Vec<&str> = Vec::new();
            self.cycle_walk(root, &mut path, &mut done, &mut cycles);
        }
        cycles
    }

    fn cycle_walk<'a>(
        &'a self,
        name: &'a str,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        if let Some(position) = path.iter().position(|n| *n == name) {
            cycles.push(path[position..].iter().map(|n| n.to_string()).collect());
            return;
        }
        if done.contains(name) {
            return;
        }

        path.push(name);
        if let Some(tool) = self.tools.get(name) {
            for dep in &tool.depends_on {
                if self.tools.contains_key(dep) {
                    self.cycle_walk(dep, path, done, cycles);
                }
            }
        }
        path.pop();
        done.insert(name);
    }

    /// Validate the whole graph: no missing dependencies, no cycles. On
    /// success the registry is sealed against further registration.
    pub fn validate(&mut self) -> Result<(), RegistryError> {
        let missing = self.validate_dependencies();
        if !missing.is_empty() {
            return Err(RegistryError::MissingDependencies { names: missing });
        }
        let cycles = self.detect_cycles();
        if let Some(cycle) = cycles.into_iter().next() {
            return Err(RegistryError::CycleDetected { path: cycle });
        }
        self.validated = true;
        info!(tool_count = self.tools.len(), "tool registry validated");
        Ok(())
    }

    /// Topologically sorted list of tool names required to run `target`,
    /// ending in `target` itself.
    ///
    /// Raises the instant a back-edge is found; there is no partial or
    /// best-effort order for a cyclic graph.
    pub fn execution_plan(&self, target: &str) -> Result<Vec<String>, RegistryError> {
        if !self.tools.contains_key(target) {
            return Err(RegistryError::ToolNotFound {
                name: target.to_string(),
            });
        }

        let mut order = Vec::new();
        let mut placed: BTreeSet<&str> = BTreeSet::new();
        let mut on_path: Vec<&str> = Vec::new();
        self.plan_walk(target, &mut on_path, &mut placed, &mut order)?;
        Ok(order)
    }

    fn plan_walk<'a>(
        &'a self,
        name: &'a str,
        on_path: &mut Vec<&'a str>,
        placed: &mut BTreeSet<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), RegistryError> {
        if placed.contains(name) {
            return Ok(());
        }
        if let Some(position) = on_path.iter().position(|n| *n == name) {
            let mut path: Vec<String> = on_path[position..].iter().map(|n| n.to_string()).collect();
            path.push(name.to_string());
            return Err(RegistryError::CycleDetected { path });
        }

        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| RegistryError::ToolNotFound {
                name: name.to_string(),
            })?;

        on_path.push(name);
        for dep in &tool.depends_on {
            self.plan_walk(dep, on_path, placed, order)?;
        }
        on_path.pop();

        placed.insert(name);
        order.push(name.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Serialize the whole registry deterministically (sorted tool names,
    /// fixed field order).
    pub fn export_json(&self) -> Result<String, RegistryError> {
        let snapshot = RegistrySnapshot {
            schema_version: TOOL_SCHEMA_VERSION,
            schema_id: TOOL_SCHEMA_ID.to_string(),
            exported_at: Utc::now(),
            tool_count: self.tools.len(),
            tools: self.tools.clone(),
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Write a snapshot to disk and return the SHA-256 of the written
    /// bytes, so this exact snapshot can be pinned and re-verified later.
    pub fn save(&self, path: &Path) -> Result<String, RegistryError> {
        let json = self.export_json()?;
        fs::write(path, json.as_bytes())?;
        Ok(digest_bytes(json.as_bytes()))
    }

    /// Load a snapshot from disk. The loaded registry is open (not yet
    /// validated).
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let json = fs::read_to_string(path)?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&json)?;
        Ok(Self {
            tools: snapshot.tools,
            validated: false,
        })
    }

    /// Re-hash a saved snapshot against the hash `save` returned.
    pub fn verify_snapshot(path: &Path, expected_sha256: &str) -> VerificationOutcome {
        match digest_file(path) {
            Ok(digest) => {
                if digest.sha256 == expected_sha256 {
                    VerificationOutcome::pass(format!(
                        "registry snapshot verified: sha256 {expected_sha256}"
                    ))
                } else {
                    VerificationOutcome::fail(format!(
                        "snapshot verification FAILED: expected sha256 {expected_sha256}, got {}",
                        digest.sha256
                    ))
                }
            }
            Err(e) => VerificationOutcome::fail(format!(
                "snapshot verification FAILED: could not read {}: {e}",
                path.display()
            )),
        }
    }
}

/// The built-in five-stage pipeline, registered and validated.
pub fn standard_pipeline() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();

    registry.register(ToolManifest {
        name: "ingest".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::Ingest,
        description: "Hash, copy, and verify an original into the locker".to_string(),
        inputs: vec![
            ToolParameter::required("source_path", "path", "file to ingest"),
            ToolParameter::required("declared_filename", "string", "uploader-declared name"),
            ToolParameter::required("mime_type", "string", "declared MIME type"),
            ToolParameter::optional("ingested_by", "string", "acting user"),
        ],
        outputs: vec![
            ToolParameter::required("evidence_id", "string", "minted evidence id"),
            ToolParameter::required("sha256", "string", "content hash of the original"),
        ],
        depends_on: vec![],
        capabilities: vec![
            "video".to_string(),
            "image".to_string(),
            "document".to_string(),
        ],
        deterministic: false,
        requires_audit: true,
    })?;

    registry.register(ToolManifest {
        name: "normalize".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::Normalize,
        description: "Produce playback proxies and thumbnails from originals".to_string(),
        inputs: vec![ToolParameter::required(
            "evidence_id",
            "string",
            "item to normalize",
        )],
        outputs: vec![ToolParameter::required(
            "derivatives",
            "json",
            "generated proxy and thumbnail records",
        )],
        depends_on: vec!["ingest".to_string()],
        capabilities: vec!["video".to_string(), "image".to_string()],
        deterministic: true,
        requires_audit: true,
    })?;

    registry.register(ToolManifest {
        name: "index".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::Index,
        description: "Extract text and transcripts for search".to_string(),
        inputs: vec![ToolParameter::required(
            "evidence_id",
            "string",
            "item to index",
        )],
        outputs: vec![ToolParameter::required(
            "transcript",
            "path",
            "extracted text derivative",
        )],
        depends_on: vec!["normalize".to_string()],
        capabilities: vec!["video".to_string(), "document".to_string()],
        deterministic: true,
        requires_audit: false,
    })?;

    registry.register(ToolManifest {
        name: "analyze".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::Analyze,
        description: "Run annotation and sequence heuristics over indexed items".to_string(),
        inputs: vec![ToolParameter::required(
            "evidence_id",
            "string",
            "item to analyze",
        )],
        outputs: vec![ToolParameter::required(
            "markers",
            "json",
            "proposed markers and sequence groups",
        )],
        depends_on: vec!["index".to_string()],
        capabilities: vec!["video".to_string(), "document".to_string()],
        deterministic: false,
        requires_audit: true,
    })?;

    registry.register(ToolManifest {
        name: "export".to_string(),
        version: "1.0.0".to_string(),
        category: ToolCategory::Export,
        description: "Build the self-verifying evidence package".to_string(),
        inputs: vec![
            ToolParameter::required("evidence_id", "string", "item to export"),
            ToolParameter::optional("include_derivatives", "bool", "package derivatives too"),
        ],
        outputs: vec![
            ToolParameter::required("export_path", "path", "written package"),
            ToolParameter::required("package_sha256", "string", "hash sealing the package"),
        ],
        depends_on: vec!["analyze".to_string()],
        capabilities: vec![
            "video".to_string(),
            "image".to_string(),
            "document".to_string(),
        ],
        deterministic: false,
        requires_audit: true,
    })?;

    registry.validate()?;
    Ok(registry)
}
