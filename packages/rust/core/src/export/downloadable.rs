//! Published downloadable tables.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use tractscore_shared::{DownloadGlobalConfig, FieldConfig, FieldFormat, Result, RoundingConfig, TractScoreError};
use tractscore_table::arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use tractscore_table::arrow::compute::cast;
use tractscore_table::arrow::datatypes::DataType;
use tractscore_table::{Table, floor_round, floor_to_int};

/// Normalize one column for publication.
///
/// Percentages become floored whole percents, loss rates floored percents at
/// the loss precision and floats are floored at the float precision. Numeric
/// formats turn non-numeric input into null; other formats pass through.
pub fn normalize_column(column: &ArrayRef, format: FieldFormat, rounding: &RoundingConfig) -> Result<ArrayRef> {
    let normalized: ArrayRef = match format {
        FieldFormat::Percentage => Arc::new(
            numbers(column)?
                .iter()
                .map(|v| v.and_then(|v| floor_to_int(v * 100.0)))
                .collect::<Int64Array>(),
        ),
        FieldFormat::LossRatePercentage => Arc::new(
            numbers(column)?
                .iter()
                .map(|v| v.map(|v| floor_round(v * 100.0, rounding.loss_rate_percentage)))
                .collect::<Float64Array>(),
        ),
        FieldFormat::Float => Arc::new(
            numbers(column)?
                .iter()
                .map(|v| v.map(|v| floor_round(v, rounding.float)))
                .collect::<Float64Array>(),
        ),
        FieldFormat::String | FieldFormat::Bool | FieldFormat::Integer => Arc::clone(column),
    };
    Ok(normalized)
}

/// The column as floats; text that does not parse and NaN become null.
fn numbers(column: &ArrayRef) -> Result<Float64Array> {
    let converted = cast(column.as_ref(), &DataType::Float64)
        .map_err(|e| TractScoreError::validation(format!("numeric field: {e}")))?;
    let floats = converted
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| TractScoreError::validation("numeric field did not cast to float"))?;
    Ok(floats.iter().map(|v| v.filter(|v| !v.is_nan())).collect())
}

/// Project, normalize, relabel and sort the merged score for one download.
#[instrument(skip_all, fields(fields = fields.len()))]
pub fn build_downloadable(
    merged: &Table,
    fields: &[FieldConfig],
    global: &DownloadGlobalConfig,
) -> Result<Table> {
    let names: Vec<&str> = fields.iter().map(|f| f.score_name.as_str()).collect();
    let mut table = merged.select(&names).map_err(|e| {
        TractScoreError::config(format!("downloadable fields do not match the score: {e}"))
    })?;

    for field in fields {
        let column = normalize_column(table.column(&field.score_name)?, field.format, &global.rounding_num)?;
        table = table.with_column(&field.score_name, column)?;
    }

    let renames: HashMap<&str, &str> = fields
        .iter()
        .map(|f| (f.score_name.as_str(), f.label.as_str()))
        .collect();
    let mut table = table.rename(&renames)?;

    if let Some(label) = &global.sort_by_label {
        table = table.sort_by_column(label)?;
    }
    debug!(rows = table.len(), columns = table.width(), "downloadable built");
    Ok(table)
}
