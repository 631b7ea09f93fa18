//! Zip bundles of already-written artifacts.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::Path;

use tracing::{debug, instrument};
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use tractscore_shared::{Result, TractScoreError};

use crate::write_bytes;

/// Package `files` into a zip archive at `archive_path`.
///
/// Each file is stored under its base name; two inputs with the same base
/// name are rejected. Inputs are copied byte-for-byte.
#[instrument(skip_all, fields(archive = %archive_path.display(), files = files.len()))]
pub fn write_bundle<P: AsRef<Path>>(archive_path: &Path, files: &[P]) -> Result<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let mut names = HashSet::new();

    for file in files {
        let file = file.as_ref();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TractScoreError::validation(format!("not a file path: {}", file.display()))
            })?;
        if !names.insert(name.clone()) {
            return Err(TractScoreError::validation(format!(
                "bundle {} has two entries named `{name}`",
                archive_path.display()
            )));
        }

        let bytes = std::fs::read(file).map_err(|e| TractScoreError::io(file, e))?;
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| TractScoreError::Artifact(format!("adding `{name}`: {e}")))?;
        writer
            .write_all(&bytes)
            .map_err(|e| TractScoreError::Artifact(format!("adding `{name}`: {e}")))?;
        debug!(entry = %name, size = bytes.len(), "bundled file");
    }

    let archive = writer
        .finish()
        .map_err(|e| TractScoreError::Artifact(format!("finishing archive: {e}")))?
        .into_inner();
    write_bytes(archive_path, &archive)
}
