//! Joining county and state reference data onto the score table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument};

use tractscore_shared::{MergeConfig, Result, TractScoreError, county_prefix, state_prefix};
use tractscore_table::Table;
use tractscore_table::arrow::array::{ArrayRef, StringArray};

use crate::invariants::check_unique_tract_ids;

/// Raw gazetteer columns.
const COUNTIES_STATE_COLUMN: &str = "USPS";
const COUNTIES_KEY_COLUMN: &str = "GEOID";
const COUNTIES_NAME_COLUMN: &str = "NAME";

/// Raw state reference columns.
pub(crate) const STATES_FIPS_COLUMN: &str = "fips";
pub(crate) const STATES_NAME_COLUMN: &str = "state_name";
pub(crate) const STATES_ABBREVIATION_COLUMN: &str = "state_abbreviation";

/// Columns the gazetteer reader keeps.
pub(crate) fn counties_columns() -> [&'static str; 3] {
    [COUNTIES_STATE_COLUMN, COUNTIES_KEY_COLUMN, COUNTIES_NAME_COLUMN]
}

/// Gazetteer columns read as text.
pub(crate) fn counties_string_columns() -> [&'static str; 2] {
    [COUNTIES_KEY_COLUMN, COUNTIES_STATE_COLUMN]
}

/// Project the gazetteer to `{county key, county name, state abbreviation}`.
pub fn normalize_counties(raw: &Table, merge: &MergeConfig) -> Result<Table> {
    raw.select(&[COUNTIES_KEY_COLUMN, COUNTIES_NAME_COLUMN, COUNTIES_STATE_COLUMN])
        .map_err(|e| TractScoreError::parse(format!("county gazetteer: {e}")))?
        .rename(&HashMap::from([
            (COUNTIES_KEY_COLUMN, merge.county_key_column.as_str()),
            (COUNTIES_NAME_COLUMN, merge.county_name_label.as_str()),
            (COUNTIES_STATE_COLUMN, merge.state_abbreviation_label.as_str()),
        ]))
}

/// Rename the state reference columns to their published labels.
pub fn normalize_states(raw: &Table, merge: &MergeConfig) -> Result<Table> {
    raw.select(&[STATES_FIPS_COLUMN, STATES_NAME_COLUMN, STATES_ABBREVIATION_COLUMN])
        .map_err(|e| TractScoreError::parse(format!("state reference: {e}")))?
        .rename(&HashMap::from([
            (STATES_FIPS_COLUMN, merge.state_code_column.as_str()),
            (STATES_NAME_COLUMN, merge.state_name_label.as_str()),
            (STATES_ABBREVIATION_COLUMN, merge.state_abbreviation_label.as_str()),
        ]))
}

/// Left-join counties on the 5-character county key, then states on the
/// 2-character state key, and check the tract id is still unique.
///
/// The two keys are derived independently from the tract id: territories
/// without counties still get their state columns.
#[instrument(skip_all, fields(score_rows = score.len()))]
pub fn merge_score(score: &Table, counties: &Table, states: &Table, merge: &MergeConfig) -> Result<Table> {
    let tract_ids = score.text_column(&merge.tract_id_column).map_err(|_| {
        TractScoreError::parse(format!(
            "score table has no `{}` column",
            merge.tract_id_column
        ))
    })?;

    let merged = score.with_column(&merge.county_key_column, derive_key(&tract_ids, county_prefix))?;
    let county_lookup = counties.select(&[&merge.county_key_column, &merge.county_name_label])?;
    let merged = merged.left_join(
        &county_lookup,
        &merge.county_key_column,
        &merge.county_key_column,
    )?;
    debug!(rows = merged.len(), "merged counties");

    // The county join can repeat rows, so the state key is derived from the merged ids.
    let tract_ids = merged.text_column(&merge.tract_id_column)?;
    let merged = merged.with_column(&merge.state_code_column, derive_key(&tract_ids, state_prefix))?;
    let merged = merged.left_join(states, &merge.state_code_column, &merge.state_code_column)?;
    debug!(rows = merged.len(), "merged states");

    check_unique_tract_ids(&merged, &merge.tract_id_column).map_err(|v| v.into_error())?;
    Ok(merged)
}

/// Join key cut from each tract id; a null id gives a null key.
fn derive_key(tract_ids: &StringArray, prefix: fn(&str) -> &str) -> ArrayRef {
    Arc::new(tract_ids.iter().map(|id| id.map(prefix)).collect::<StringArray>())
}
