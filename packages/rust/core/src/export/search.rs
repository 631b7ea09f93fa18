//! Tract search index: one centroid per tract.

use tractscore_shared::{Result, SearchConfig, TractScoreError};
use tractscore_table::Table;

/// Project the centroid reference to `{tract id, latitude, longitude}`.
pub fn build_tract_search(centroids: &Table, search: &SearchConfig) -> Result<Table> {
    centroids
        .select(&[&search.id_column, &search.lat_column, &search.lon_column])
        .map_err(|e| TractScoreError::parse(format!("tract centroids: {e}")))
}
