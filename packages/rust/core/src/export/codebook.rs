//! The codebook: one row per published field with its labels, format and
//! description.

use std::collections::{HashMap, HashSet};

use tractscore_shared::{CodebookConfig, CsvConfig, ExcelConfig, FieldFormat, Result};
use tractscore_table::{Table, Value};

use crate::invariants::{InvariantViolation, LabelPair, check_codebook_columns, check_label_sequences};

/// Codebook column headers.
pub const CODEBOOK_COLUMNS: [&str; 5] = ["score_name", "csv_label", "excel_label", "format", "description"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebookRow {
    pub score_name: String,
    pub csv_label: Option<String>,
    /// Label on the first sheet publishing the field.
    pub excel_label: Option<String>,
    /// Every sheet publishing the field, in workbook order.
    pub sheet_labels: Vec<SheetLabel>,
    pub format: FieldFormat,
    pub description: Option<String>,
}

/// One spreadsheet occurrence of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLabel {
    pub sheet: String,
    pub label: String,
}

/// Outer-join the csv fields with every spreadsheet field on `score_name`.
///
/// Csv fields come first in their declared order, followed by fields only
/// the spreadsheet publishes. A field on several sheets appears once and
/// keeps each sheet's label.
pub fn build_codebook(csv: &CsvConfig, excel: &ExcelConfig, descriptions: &CodebookConfig) -> Vec<CodebookRow> {
    let mut sheet_labels: HashMap<&str, Vec<SheetLabel>> = HashMap::new();
    for sheet in &excel.sheets {
        for field in &sheet.fields {
            sheet_labels
                .entry(field.score_name.as_str())
                .or_default()
                .push(SheetLabel {
                    sheet: sheet.label.clone(),
                    label: field.label.clone(),
                });
        }
    }
    let described: HashMap<&str, &str> = descriptions
        .fields
        .iter()
        .filter_map(|d| Some((d.score_name.as_str(), d.description.as_deref()?)))
        .collect();

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for field in &csv.fields {
        seen.insert(field.score_name.as_str());
        let occurrences = sheet_labels
            .get(field.score_name.as_str())
            .cloned()
            .unwrap_or_default();
        rows.push(CodebookRow {
            score_name: field.score_name.clone(),
            csv_label: Some(field.label.clone()),
            excel_label: occurrences.first().map(|o| o.label.clone()),
            sheet_labels: occurrences,
            format: field.format,
            description: described.get(field.score_name.as_str()).map(|d| d.to_string()),
        });
    }
    for field in excel.all_fields() {
        if !seen.insert(field.score_name.as_str()) {
            continue;
        }
        rows.push(CodebookRow {
            score_name: field.score_name.clone(),
            csv_label: None,
            excel_label: Some(field.label.clone()),
            sheet_labels: sheet_labels
                .get(field.score_name.as_str())
                .cloned()
                .unwrap_or_default(),
            format: field.format,
            description: described.get(field.score_name.as_str()).map(|d| d.to_string()),
        });
    }
    rows
}

/// Both codebook invariants, checked before anything is written.
pub fn check_codebook(
    rows: &[CodebookRow],
    download_columns: &[String],
) -> std::result::Result<(), InvariantViolation> {
    let mut pairs: Vec<LabelPair<'_>> = Vec::with_capacity(rows.len());
    for (row, r) in rows.iter().enumerate() {
        if r.sheet_labels.is_empty() {
            pairs.push(LabelPair {
                row,
                score_name: &r.score_name,
                sheet: None,
                csv_label: r.csv_label.as_deref(),
                excel_label: None,
            });
        }
        pairs.extend(r.sheet_labels.iter().map(|o| LabelPair {
            row,
            score_name: &r.score_name,
            sheet: Some(o.sheet.as_str()),
            csv_label: r.csv_label.as_deref(),
            excel_label: Some(o.label.as_str()),
        }));
    }
    check_label_sequences(&pairs)?;
    check_codebook_columns(rows.iter().filter_map(|r| r.csv_label.as_deref()), download_columns)
}

/// Rows as a table ready for CSV output.
pub fn codebook_table(rows: &[CodebookRow]) -> Result<Table> {
    let text = |v: &Option<String>| v.clone().map_or(Value::Null, Value::Str);
    Table::from_rows(
        CODEBOOK_COLUMNS,
        rows.iter()
            .map(|row| {
                vec![
                    Value::from(row.score_name.as_str()),
                    text(&row.csv_label),
                    text(&row.excel_label),
                    Value::from(row.format.as_str()),
                    text(&row.description),
                ]
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tractscore_shared::{FieldConfig, parse_export_config};

    fn config() -> tractscore_shared::ExportConfig {
        let content = std::fs::read_to_string("../../../fixtures/config/export.toml").unwrap();
        parse_export_config(&content).unwrap()
    }

    fn labels(config: &tractscore_shared::ExportConfig) -> Vec<String> {
        config.csv.fields.iter().map(|f| f.label.clone()).collect()
    }

    #[test]
    fn consistent_config_passes_both_checks() {
        let config = config();
        let rows = build_codebook(&config.csv, &config.excel, &config.codebook);

        assert_eq!(rows.len(), config.csv.fields.len());
        assert_eq!(rows[0].score_name, "GEOID10_TRACT");
        assert_eq!(
            rows[0].description.as_deref(),
            Some("11-digit 2010 census tract identifier")
        );
        assert_eq!(rows[1].description, None);
        check_codebook(&rows, &labels(&config)).unwrap();

        let table = codebook_table(&rows).unwrap();
        assert_eq!(table.columns(), &CODEBOOK_COLUMNS);
        assert_eq!(table.value(3, "format"), Some(Value::from("int64")));
    }

    #[test]
    fn excel_only_field_breaks_label_sequence() {
        let mut config = config();
        config.excel.sheets[1].fields.push(FieldConfig {
            score_name: "State Abbreviation".into(),
            label: "State Abbreviation".into(),
            format: FieldFormat::String,
        });
        let rows = build_codebook(&config.csv, &config.excel, &config.codebook);

        assert_eq!(rows.last().unwrap().csv_label, None);
        let violation = check_codebook(&rows, &labels(&config)).unwrap_err();
        assert!(matches!(violation, InvariantViolation::LabelMismatch { .. }));
        assert!(violation.into_error().is_configuration());
    }

    #[test]
    fn relabelled_excel_field_breaks_label_sequence() {
        let mut config = config();
        config.excel.sheets[0].fields[1].label = "County".into();
        let rows = build_codebook(&config.csv, &config.excel, &config.codebook);

        let violation = check_codebook(&rows, &labels(&config)).unwrap_err();
        assert_eq!(
            violation,
            InvariantViolation::LabelMismatch {
                row: 1,
                score_name: "County Name".into(),
                sheet: Some("Data".into()),
                csv_label: Some("County Name".into()),
                excel_label: Some("County".into()),
            }
        );
    }

    #[test]
    fn download_columns_must_equal_codebook_labels() {
        let config = config();
        let rows = build_codebook(&config.csv, &config.excel, &config.codebook);
        let mut columns = labels(&config);
        columns.pop();

        let violation = check_codebook(&rows, &columns).unwrap_err();
        assert!(matches!(violation, InvariantViolation::CodebookColumns { .. }));
    }

    #[test]
    fn relabelling_on_one_of_several_sheets_is_caught() {
        let mut first = config();
        first.excel.sheets[0].fields[0].label = "Tract".into();
        let rows = build_codebook(&first.csv, &first.excel, &first.codebook);

        assert_eq!(rows[0].excel_label.as_deref(), Some("Tract"));
        assert_eq!(rows[0].sheet_labels.len(), 2);
        let violation = check_codebook(&rows, &labels(&first)).unwrap_err();
        assert_eq!(
            violation,
            InvariantViolation::LabelMismatch {
                row: 0,
                score_name: "GEOID10_TRACT".into(),
                sheet: Some("Data".into()),
                csv_label: Some("Census tract 2010 ID".into()),
                excel_label: Some("Tract".into()),
            }
        );

        let mut second = config();
        second.excel.sheets[1].fields[0].label = "Tract".into();
        let rows = build_codebook(&second.csv, &second.excel, &second.codebook);
        let violation = check_codebook(&rows, &labels(&second)).unwrap_err();
        assert!(violation.to_string().ends_with("on sheet `Burdens`"));
    }
}
