//! Zip extraction for downloaded archives.

use std::io::Cursor;
use std::path::Path;

use tracing::debug;

use tractscore_shared::{Result, TractScoreError};

/// Extract an in-memory zip archive into `destination`, creating it if needed.
///
/// Entries are written under `destination` only; entries whose paths would
/// escape it are rejected by the archive reader.
pub fn extract_zip(bytes: &[u8], destination: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| TractScoreError::parse(format!("reading zip archive: {e}")))?;
    let entries = archive.len();

    std::fs::create_dir_all(destination).map_err(|e| TractScoreError::io(destination, e))?;
    archive.extract(destination).map_err(|e| {
        TractScoreError::parse(format!(
            "extracting zip archive into {}: {e}",
            destination.display()
        ))
    })?;

    debug!(entries, destination = %destination.display(), "extracted archive");
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Build a zip archive with the given `(name, contents)` entries.
    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn extracts_entries() {
        let dir = std::env::temp_dir().join(format!("ts-zip-{}", uuid::Uuid::now_v7()));
        let bytes = zip_bytes(&[("2010_Gaz_counties_national.txt", "USPS\tGEOID\n")]);

        let count = extract_zip(&bytes, &dir).unwrap();
        assert_eq!(count, 1);
        let text = std::fs::read_to_string(dir.join("2010_Gaz_counties_national.txt")).unwrap();
        assert_eq!(text, "USPS\tGEOID\n");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn rejects_non_archives() {
        let dir = std::env::temp_dir().join(format!("ts-zip-{}", uuid::Uuid::now_v7()));
        let err = extract_zip(b"not a zip", &dir).unwrap_err();
        assert!(matches!(err, TractScoreError::Parse { .. }));
    }
}
