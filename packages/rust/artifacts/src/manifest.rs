//! Export manifest: checksums of every artifact an export run wrote.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use tractscore_shared::{CURRENT_SCHEMA_VERSION, ExportManifest, Result, TractScoreError};

use crate::{sha256_hex, write_json_file};

/// File name of the manifest inside the downloadable directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Write `manifest` to `path`.
pub fn write_manifest(path: &Path, manifest: &ExportManifest) -> Result<()> {
    write_json_file(path, manifest)?;
    debug!(path = %path.display(), artifacts = manifest.artifacts.len(), "wrote manifest");
    Ok(())
}

/// Read and parse a manifest, checking its schema version.
pub fn read_manifest(path: &Path) -> Result<ExportManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| TractScoreError::io(path, e))?;
    let manifest: ExportManifest = serde_json::from_str(&content).map_err(|e| {
        TractScoreError::validation(format!("invalid {}: {e}", path.display()))
    })?;

    if manifest.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(TractScoreError::validation(format!(
            "unsupported schema_version: {} (expected {})",
            manifest.schema_version, CURRENT_SCHEMA_VERSION
        )));
    }
    Ok(manifest)
}

/// Check that every artifact listed in `manifest` exists under `root` with
/// the recorded size and checksum.
#[instrument(skip_all, fields(root = %root.display(), artifacts = manifest.artifacts.len()))]
pub fn verify_manifest(root: &Path, manifest: &ExportManifest) -> Result<()> {
    for artifact in &manifest.artifacts {
        let path: PathBuf = root.join(&artifact.path);
        if !path.is_file() {
            return Err(TractScoreError::validation(format!(
                "missing artifact {}",
                artifact.path
            )));
        }
        let bytes = std::fs::read(&path).map_err(|e| TractScoreError::io(&path, e))?;
        if bytes.len() as u64 != artifact.size_bytes || sha256_hex(&bytes) != artifact.sha256 {
            return Err(TractScoreError::validation(format!(
                "artifact {} does not match its recorded checksum",
                artifact.path
            )));
        }
    }
    debug!("manifest verified");
    Ok(())
}
