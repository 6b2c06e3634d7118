//! Tool manifests.
//!
//! A tool manifest is the immutable description of one pipeline stage:
//! typed inputs and outputs, the stages it depends on, and its behavioural
//! flags. `manifest_hash` is a pure function of the fields — canonical (JCS)
//! bytes hashed with SHA-256 — so two manifests with identical fields always
//! hash identically, regardless of construction order.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::RegistryError;

/// Schema version for tool manifests.
pub const TOOL_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for registry snapshots.
pub const TOOL_SCHEMA_ID: &str = "evidence-locker/tool-registry@1";

/// Pipeline stage a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Ingest,
    Normalize,
    Index,
    Analyze,
    Export,
}

/// One typed input or output of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    /// Parameter name.
    pub name: String,

    /// Value type ("path", "string", "bool", "json", ...).
    #[serde(rename = "type")]
    pub param_type: String,

    /// Whether the parameter must be supplied.
    pub required: bool,

    /// What the parameter means.
    pub description: String,
}

impl ToolParameter {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: true,
            description: description.to_string(),
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            required: false,
            description: description.to_string(),
        }
    }
}

/// Immutable descriptor of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Unique tool name.
    pub name: String,

    /// Tool version string.
    pub version: String,

    /// Pipeline stage.
    pub category: ToolCategory,

    /// What the tool does.
    pub description: String,

    /// Typed inputs.
    pub inputs: Vec<ToolParameter>,

    /// Typed outputs.
    pub outputs: Vec<ToolParameter>,

    /// Names of tools that must run before this one.
    pub depends_on: Vec<String>,

    /// Capability tags ("video", "document", ...).
    pub capabilities: Vec<String>,

    /// Whether identical inputs always produce identical outputs.
    pub deterministic: bool,

    /// Whether every invocation must append an audit entry.
    pub requires_audit: bool,
}

impl ToolManifest {
    /// Hash of the canonical serialized form of this manifest.
    pub fn manifest_hash(&self) -> Result<String, RegistryError> {
        let canonical = serde_json_canonicalizer::to_vec(self)
            .map_err(|e| RegistryError::Canonical(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }
}
