//! Cross-artifact invariant checks.
//!
//! Checks return a typed [`InvariantViolation`] instead of failing outright,
//! so a caller can abort with [`InvariantViolation::into_error`] or just
//! report the violation.

use std::collections::BTreeSet;

use tractscore_shared::TractScoreError;
use tractscore_table::Table;

/// A broken consistency rule between tables or artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A tract id occurs on more than one row.
    DuplicateTractId { column: String, value: String },
    /// Row `row` of the codebook has different primary and spreadsheet labels.
    /// `sheet` names the spreadsheet occurrence compared, if there is one.
    LabelMismatch {
        row: usize,
        score_name: String,
        sheet: Option<String>,
        csv_label: Option<String>,
        excel_label: Option<String>,
    },
    /// The codebook's labels and the primary downloadable's columns differ.
    CodebookColumns {
        missing_from_codebook: Vec<String>,
        missing_from_download: Vec<String>,
    },
}

impl InvariantViolation {
    /// The error class this violation aborts a run with.
    pub fn into_error(self) -> TractScoreError {
        match self {
            Self::DuplicateTractId { .. } => TractScoreError::data_integrity(self.to_string()),
            Self::LabelMismatch { .. } | Self::CodebookColumns { .. } => {
                TractScoreError::config(self.to_string())
            }
        }
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTractId { column, value } => {
                write!(f, "duplicate tract id `{value}` in column `{column}`")
            }
            Self::LabelMismatch {
                row,
                score_name,
                sheet,
                csv_label,
                excel_label,
            } => {
                write!(
                    f,
                    "codebook row {row} (`{score_name}`): csv label {} differs from excel label {}",
                    display_label(csv_label.as_deref()),
                    display_label(excel_label.as_deref())
                )?;
                match sheet {
                    Some(sheet) => write!(f, " on sheet `{sheet}`"),
                    None => Ok(()),
                }
            }
            Self::CodebookColumns {
                missing_from_codebook,
                missing_from_download,
            } => write!(
                f,
                "codebook does not match the downloadable columns (missing from codebook: {missing_from_codebook:?}; not in download: {missing_from_download:?})"
            ),
        }
    }
}

fn display_label(label: Option<&str>) -> String {
    label.map_or_else(|| "<none>".to_string(), |l| format!("`{l}`"))
}

/// Every value of `column` is distinct.
pub fn check_unique_tract_ids(table: &Table, column: &str) -> Result<(), InvariantViolation> {
    // A missing column cannot hold duplicates; the merge reports it separately.
    match table.first_duplicate(column) {
        Ok(Some(value)) => Err(InvariantViolation::DuplicateTractId {
            column: column.to_string(),
            value,
        }),
        Ok(None) | Err(_) => Ok(()),
    }
}

/// The csv label and one spreadsheet label of a codebook row.
///
/// A field published on several sheets gives one pair per sheet, all with the
/// same `row`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPair<'a> {
    pub row: usize,
    pub score_name: &'a str,
    pub sheet: Option<&'a str>,
    pub csv_label: Option<&'a str>,
    pub excel_label: Option<&'a str>,
}

/// The csv label sequence equals the excel label sequence, row for row and
/// sheet for sheet.
pub fn check_label_sequences(pairs: &[LabelPair<'_>]) -> Result<(), InvariantViolation> {
    match pairs.iter().find(|p| p.csv_label != p.excel_label) {
        Some(pair) => Err(InvariantViolation::LabelMismatch {
            row: pair.row,
            score_name: pair.score_name.to_string(),
            sheet: pair.sheet.map(str::to_string),
            csv_label: pair.csv_label.map(str::to_string),
            excel_label: pair.excel_label.map(str::to_string),
        }),
        None => Ok(()),
    }
}

/// The set of present codebook labels equals the downloadable column set.
pub fn check_codebook_columns<'a>(
    codebook_labels: impl IntoIterator<Item = &'a str>,
    download_columns: &[String],
) -> Result<(), InvariantViolation> {
    let codebook: BTreeSet<&str> = codebook_labels.into_iter().collect();
    let download: BTreeSet<&str> = download_columns.iter().map(String::as_str).collect();

    let missing_from_codebook: Vec<String> =
        download.difference(&codebook).map(|s| s.to_string()).collect();
    let missing_from_download: Vec<String> =
        codebook.difference(&download).map(|s| s.to_string()).collect();

    if missing_from_codebook.is_empty() && missing_from_download.is_empty() {
        Ok(())
    } else {
        Err(InvariantViolation::CodebookColumns {
            missing_from_codebook,
            missing_from_download,
        })
    }
}
