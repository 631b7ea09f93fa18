//! Core domain types for tractscore runs and exports.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for the export manifest format.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Length of the state/territory FIPS prefix of a tract id.
pub const STATE_PREFIX_LEN: usize = 2;

/// Length of the county FIPS prefix of a tract id.
pub const COUNTY_PREFIX_LEN: usize = 5;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one scheduler or export run (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Tract ids
// ---------------------------------------------------------------------------

/// Leading `len` characters of a tract id (the whole id if shorter).
pub fn fips_prefix(tract_id: &str, len: usize) -> &str {
    match tract_id.char_indices().nth(len) {
        Some((end, _)) => &tract_id[..end],
        None => tract_id,
    }
}

/// State/territory key of a tract id.
pub fn state_prefix(tract_id: &str) -> &str {
    fips_prefix(tract_id, STATE_PREFIX_LEN)
}

/// County key of a tract id.
pub fn county_prefix(tract_id: &str) -> &str {
    fips_prefix(tract_id, COUNTY_PREFIX_LEN)
}

/// Whether the id has the 11-digit census tract shape.
pub fn is_well_formed_tract_id(tract_id: &str) -> bool {
    static TRACT_ID: OnceLock<Regex> = OnceLock::new();
    TRACT_ID
        .get_or_init(|| Regex::new(r"^\d{11}$").expect("static regex"))
        .is_match(tract_id)
}

// ---------------------------------------------------------------------------
// ExportManifest
// ---------------------------------------------------------------------------

/// Checksum metadata of one written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Path relative to the manifest's directory root.
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// The `manifest.json` written next to the downloadable artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub run_id: RunId,
    /// Tool version that produced the export.
    pub tool_version: String,
    pub created_at: DateTime<Utc>,
    /// Rows in the merged score table.
    pub tract_count: usize,
    pub artifacts: Vec<ArtifactMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let s = id.to_string();
        let parsed: RunId = s.parse().expect("parse RunId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn prefixes_of_tract_id() {
        assert_eq!(state_prefix("01001020100"), "01");
        assert_eq!(county_prefix("01001020100"), "01001");
        assert_eq!(county_prefix("660"), "660");
        assert_eq!(state_prefix(""), "");
    }

    #[test]
    fn tract_id_shape() {
        assert!(is_well_formed_tract_id("72001956300"));
        assert!(!is_well_formed_tract_id("7200195630"));
        assert!(!is_well_formed_tract_id("7200195630A"));
    }

    #[test]
    fn manifest_serialization() {
        let manifest = ExportManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            tool_version: "0.1.0".into(),
            created_at: Utc::now(),
            tract_count: 3,
            artifacts: vec![ArtifactMeta {
                path: "downloadable/codebook.csv".into(),
                sha256: "0".repeat(64),
                size_bytes: 12,
            }],
        };

        let json = serde_json::to_string_pretty(&manifest).expect("serialize");
        let parsed: ExportManifest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(parsed.artifacts, manifest.artifacts);
    }
}
