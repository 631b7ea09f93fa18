//! File layout of the score export.

use std::path::{Path, PathBuf};

use tractscore_shared::{BundleConfig, MergeConfig};

/// Input, output and content paths of one export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// Root the export manifest's paths are relative to.
    pub score_dir: PathBuf,
    pub tmp_dir: PathBuf,

    pub score_input: PathBuf,
    pub states_input: PathBuf,
    pub centroids_input: PathBuf,
    /// Extraction directory of the county gazetteer archive.
    pub counties_dir: PathBuf,
    pub counties_input: PathBuf,

    pub merged_full: PathBuf,
    pub tiles_csv: PathBuf,
    pub tile_index: PathBuf,
    pub tract_search: PathBuf,

    pub downloadable_dir: PathBuf,
    pub downloadable_csv: PathBuf,
    pub downloadable_xlsx: PathBuf,
    pub codebook_csv: PathBuf,
    pub csv_bundle: PathBuf,
    pub xlsx_bundle: PathBuf,
    pub documentation_bundle: PathBuf,
    pub manifest: PathBuf,

    pub readme: PathBuf,
    pub documentation: Vec<PathBuf>,
}

impl ExportPaths {
    pub fn new(data_dir: &Path, content_dir: &Path, merge: &MergeConfig, bundle: &BundleConfig) -> Self {
        let score_dir = data_dir.join("score");
        let tmp_dir = data_dir.join("tmp").join("score_post");
        let counties_dir = tmp_dir.join("counties");
        let downloadable_dir = score_dir.join("downloadable");

        Self {
            score_input: score_dir.join("csv/full/usa.csv"),
            states_input: data_dir.join("census/csv/fips_states_2010.csv"),
            centroids_input: data_dir.join("census/csv/tract_centroids.csv"),
            counties_input: counties_dir.join(&merge.counties_file),
            counties_dir,

            merged_full: score_dir.join("csv/full/usa_counties.csv"),
            tiles_csv: score_dir.join("csv/tiles/usa.csv"),
            tile_index: score_dir.join("tiles/tile_indexes.json"),
            tract_search: score_dir.join("search/tracts.json"),

            downloadable_csv: downloadable_dir.join("communities-list.csv"),
            downloadable_xlsx: downloadable_dir.join("communities-list.xlsx"),
            codebook_csv: downloadable_dir.join("codebook.csv"),
            csv_bundle: downloadable_dir.join("communities-list-csv.zip"),
            xlsx_bundle: downloadable_dir.join("communities-list-xlsx.zip"),
            documentation_bundle: downloadable_dir.join("data-documentation.zip"),
            manifest: downloadable_dir.join(tractscore_artifacts::MANIFEST_FILE_NAME),
            downloadable_dir,

            readme: content_dir.join(&bundle.readme),
            documentation: bundle.documentation.iter().map(|d| content_dir.join(d)).collect(),

            score_dir,
            tmp_dir,
        }
    }
}
