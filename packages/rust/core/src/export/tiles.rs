//! Compact per-tract table consumed by the map tiles.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use tractscore_shared::{Result, TilesConfig, TractScoreError, state_prefix};
use tractscore_table::arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
use tractscore_table::arrow::datatypes::{DataType, Float64Type};
use tractscore_table::{Table, floor_round};

/// Tile table plus its label index.
#[derive(Debug, Clone)]
pub struct TileOutput {
    pub table: Table,
    /// Short label to score column name, in tile column order.
    pub index: serde_json::Map<String, serde_json::Value>,
}

/// Map experience and threshold count of one tract.
///
/// Rules are checked in order against the tract's 2-character state prefix;
/// the first match wins, otherwise the default applies.
pub fn classify_experience<'a>(tract_id: &str, tiles: &'a TilesConfig) -> (&'a str, u32) {
    let prefix = state_prefix(tract_id);
    tiles
        .experiences
        .iter()
        .find(|rule| rule.fips_codes.iter().any(|code| code == prefix))
        .map(|rule| (rule.label.as_str(), rule.threshold_count))
        .unwrap_or((
            tiles.default_experience.label.as_str(),
            tiles.default_experience.threshold_count,
        ))
}

/// Build the tile table from the merged score.
///
/// Keeps the configured columns, drops excluded state prefixes, floors every
/// float to `round_num_decimals`, appends the experience columns and renames
/// to the short labels.
#[instrument(skip_all, fields(rows = merged.len()))]
pub fn build_tiles(merged: &Table, tiles: &TilesConfig, tract_id_column: &str) -> Result<TileOutput> {
    let names: Vec<&str> = tiles.columns.iter().map(|c| c.score_name.as_str()).collect();
    let table = merged.select(&names).map_err(|e| {
        TractScoreError::config(format!("tile columns do not match the score: {e}"))
    })?;
    let tract_ids = table.text_column(tract_id_column).map_err(|_| {
        TractScoreError::config(format!(
            "tile columns must include the tract id column `{tract_id_column}`"
        ))
    })?;

    let keep: BooleanArray = tract_ids
        .iter()
        .map(|id| {
            let id = id.unwrap_or_default();
            Some(!tiles.drop_fips_codes.iter().any(|code| id.starts_with(code.as_str())))
        })
        .collect();
    let mut table = table.filter(&keep)?;
    if table.len() != tract_ids.len() {
        debug!(dropped = tract_ids.len() - table.len(), "dropped excluded state prefixes");
    }

    let decimals = tiles.round_num_decimals;
    for name in table.columns() {
        let column = table.column(&name)?;
        if column.data_type() != &DataType::Float64 {
            continue;
        }
        let Some(values) = column.as_any().downcast_ref::<Float64Array>() else {
            continue;
        };
        let floored =
            values.unary::<_, Float64Type>(|v| if v.is_nan() { v } else { floor_round(v, decimals) });
        table = table.with_column(&name, Arc::new(floored))?;
    }

    let tract_ids = table.text_column(tract_id_column)?;
    let experiences: Vec<(&str, u32)> = tract_ids
        .iter()
        .map(|id| classify_experience(id.unwrap_or_default(), tiles))
        .collect();
    let labels: StringArray = experiences.iter().map(|(label, _)| Some(*label)).collect();
    let counts: Int64Array = experiences
        .iter()
        .map(|(_, count)| Some(i64::from(*count)))
        .collect();
    let table = table
        .with_column(&tiles.experience_field, Arc::new(labels))?
        .with_column(&tiles.threshold_count_field, Arc::new(counts))?;

    let renames: HashMap<&str, &str> = tiles
        .columns
        .iter()
        .map(|c| (c.score_name.as_str(), c.label.as_str()))
        .collect();
    let table = table.rename(&renames)?;

    let index = tiles
        .columns
        .iter()
        .map(|c| (c.label.clone(), serde_json::Value::String(c.score_name.clone())))
        .collect();

    Ok(TileOutput { table, index })
}
