//! Durable artifact writers for tractscore exports.
//!
//! Every artifact is written to a temp file beside its target and renamed
//! into place, so a reader never sees a half-written file. Writers return
//! [`ArtifactMeta`] (path, SHA-256, size) for the export manifest.

mod bundle;
mod manifest;
mod workbook;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Component, Path};

use sha2::{Digest, Sha256};
use tracing::debug;

use tractscore_shared::{ArtifactMeta, Result, TractScoreError};
use tractscore_table::{Table, write_csv};

pub use bundle::write_bundle;
pub use manifest::{MANIFEST_FILE_NAME, read_manifest, verify_manifest, write_manifest};
pub use workbook::{Sheet, WorkbookFormat, write_workbook};

/// Write `path` atomically: `fill` writes into a sibling temp file that is then renamed.
pub fn write_atomic(
    path: &Path,
    fill: impl FnOnce(&mut BufWriter<File>) -> Result<()>,
) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent).map_err(|e| TractScoreError::io(parent, e))?;
    }
    let filename = path
        .file_name()
        .ok_or_else(|| TractScoreError::validation(format!("not a file path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{}.tmp", filename.to_string_lossy()));

    let file = File::create(&temp).map_err(|e| TractScoreError::io(&temp, e))?;
    let mut writer = BufWriter::new(file);
    let filled = fill(&mut writer).and_then(|()| {
        writer
            .flush()
            .map_err(|e| TractScoreError::io(&temp, e))
    });
    drop(writer);
    if let Err(e) = filled {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }

    std::fs::rename(&temp, path).map_err(|e| TractScoreError::io(path, e))?;
    Ok(())
}

/// Write raw bytes atomically.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |w| {
        w.write_all(bytes).map_err(|e| TractScoreError::io(path, e))
    })
}

/// Write a table as CSV, optionally preceded by a UTF-8 byte order mark.
pub fn write_csv_file(path: &Path, table: &Table, bom: bool) -> Result<()> {
    write_atomic(path, |w| write_csv(table, w, bom))?;
    debug!(path = %path.display(), rows = table.len(), "wrote csv");
    Ok(())
}

/// Write a table as a JSON array of row objects, nulls included.
pub fn write_records_file(path: &Path, table: &Table) -> Result<()> {
    write_atomic(path, |w| table.write_records(w))?;
    debug!(path = %path.display(), rows = table.len(), "wrote json records");
    Ok(())
}

/// Write a serializable value as pretty-printed JSON.
pub fn write_json_file<T: serde::Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| TractScoreError::Artifact(format!("JSON serialization failed: {e}")))?;
    write_bytes(path, &json)?;
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Checksum metadata of a written file, with its path relative to `root`.
pub fn artifact_meta(root: &Path, path: &Path) -> Result<ArtifactMeta> {
    let bytes = std::fs::read(path).map_err(|e| TractScoreError::io(path, e))?;
    let relative = path.strip_prefix(root).map_err(|_| {
        TractScoreError::validation(format!(
            "{} is not under {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(ArtifactMeta {
        path: portable_path(relative),
        sha256: sha256_hex(&bytes),
        size_bytes: bytes.len() as u64,
    })
}

/// `/`-separated form of a relative path.
fn portable_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
