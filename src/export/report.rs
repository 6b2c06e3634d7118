//! Human-auditable integrity report.
//!
//! Rendered into every export package as `integrity_report.md`: the original's
//! metadata, the packaged derivatives, the full chain of custody, a hash table
//! of every packaged file, and literal re-verification instructions quoting
//! the expected SHA-256 values.

use std::fmt::Write;

use crate::store::{EvidenceManifest, ManifestDerivative};

use super::{ExportInfo, PackagedFile};

/// Render the report body.
pub fn render(
    manifest: &EvidenceManifest,
    included_derivatives: &[ManifestDerivative],
    packaged_files: &[PackagedFile],
    export: &ExportInfo,
) -> String {
    let mut out = String::new();
    let ingest = &manifest.ingest;

    let _ = writeln!(out, "# Evidence Integrity Report");
    let _ = writeln!(out);
    let _ = writeln!(out, "- Evidence ID: `{}`", manifest.evidence_id);
    let _ = writeln!(out, "- Package: `{}`", export.package_name);
    let _ = writeln!(
        out,
        "- Exported at: {} by {}",
        export.exported_at.format("%Y-%m-%d %H:%M:%S UTC"),
        export.exported_by
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "## Original");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Field | Value |");
    let _ = writeln!(out, "|---|---|");
    let _ = writeln!(out, "| Filename | `{}` |", ingest.original_filename);
    let _ = writeln!(out, "| MIME type | `{}` |", ingest.mime_type);
    let _ = writeln!(out, "| Size | {} bytes |", ingest.size_bytes);
    let _ = writeln!(out, "| SHA-256 | `{}` |", ingest.sha256);
    let _ = writeln!(
        out,
        "| Ingested | {} by {} |",
        ingest.ingested_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ingest.ingested_by
    );
    if let Some(device) = &ingest.device_label {
        let _ = writeln!(out, "| Device | `{device}` |");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Derivatives");
    let _ = writeln!(out);
    if included_derivatives.is_empty() {
        let _ = writeln!(out, "No derivatives are included in this package.");
    } else {
        let _ = writeln!(out, "| Type | Filename | Size | SHA-256 |");
        let _ = writeln!(out, "|---|---|---|---|");
        for derivative in included_derivatives {
            let _ = writeln!(
                out,
                "| {} | `{}` | {} bytes | `{}` |",
                derivative.derivative_type,
                derivative.filename,
                derivative.size_bytes,
                derivative.sha256
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Chain of Custody");
    let _ = writeln!(out);
    let _ = writeln!(out, "| # | Time | Action | Component | Actor | Entry hash |");
    let _ = writeln!(out, "|---|---|---|---|---|---|");
    for entry in &manifest.audit_entries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | `{}` |",
            entry.sequence,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.action,
            entry.component,
            entry.actor,
            entry.entry_hash
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## Packaged Files");
    let _ = writeln!(out);
    let _ = writeln!(out, "| Path | Size | SHA-256 |");
    let _ = writeln!(out, "|---|---|---|");
    for file in packaged_files {
        let _ = writeln!(
            out,
            "| `{}` | {} bytes | `{}` |",
            file.path, file.size_bytes, file.sha256
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "## How to Verify");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "1. Extract this package and compute the hash of the original:"
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "   ```\n   sha256sum \"originals/{}\"\n   ```",
        ingest.original_filename
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "2. The output must be exactly:");
    let _ = writeln!(out);
    let _ = writeln!(out, "   ```\n   {}\n   ```", ingest.sha256);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "3. Repeat for every file in the Packaged Files table above; any \
         difference means the package has been altered since export."
    );

    out
}
