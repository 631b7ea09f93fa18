//! The post-score export unit.
//!
//! Merges the scored tract table with county and state reference data, then
//! derives every public artifact from the merged table: the full CSV, the map
//! tile table and its label index, the tract search index, the primary CSV
//! download, the multi-sheet workbook, the codebook and three zip bundles.
//! Each load writes a manifest with the checksum of every artifact, and
//! validate re-checks the files against it.
//!
//! Both codebook invariants and tract id uniqueness are checked during
//! transform, so a failing run writes nothing.

mod codebook;
mod downloadable;
mod merge;
mod paths;
mod search;
mod tiles;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use tractscore_artifacts::{
    Sheet, WorkbookFormat, artifact_meta, read_manifest, verify_manifest, write_bundle,
    write_csv_file, write_json_file, write_manifest, write_records_file, write_workbook,
};
use tractscore_shared::{
    CURRENT_SCHEMA_VERSION, ExportConfig, ExportManifest, Result, RunId, TractScoreError,
    is_well_formed_tract_id,
};
use tractscore_sources::{DataSource, FetchOptions, fetch_all_blocking};
use tractscore_table::{Encoding, ReadOptions, Table, read_delimited};

use crate::unit::PipelineUnit;

pub use codebook::{CODEBOOK_COLUMNS, CodebookRow, SheetLabel, build_codebook, check_codebook, codebook_table};
pub use downloadable::{build_downloadable, normalize_column};
pub use merge::{merge_score, normalize_counties, normalize_states};
pub use paths::ExportPaths;
pub use search::build_tract_search;
pub use tiles::{TileOutput, build_tiles, classify_experience};

/// Registry name of the export unit.
pub const EXPORT_DATASET_NAME: &str = "score-post";

/// Where the export unit is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Idle,
    Extracted,
    Transformed,
    Loaded,
    Validated,
    CleanedUp,
}

/// Everything needed to build a fresh export unit. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub config: Arc<ExportConfig>,
    pub paths: ExportPaths,
    counties: DataSource,
}

impl ExportSettings {
    pub fn new(config: Arc<ExportConfig>, data_dir: &Path, content_dir: &Path) -> Result<Self> {
        let paths = ExportPaths::new(data_dir, content_dir, &config.merge, &config.bundle);
        let url = Url::parse(&config.merge.counties_url).map_err(|e| {
            TractScoreError::config(format!(
                "merge counties_url `{}` is not a valid URL: {e}",
                config.merge.counties_url
            ))
        })?;
        let counties = DataSource::zip(url, paths.counties_dir.clone());
        Ok(Self {
            config,
            paths,
            counties,
        })
    }
}

struct Inputs {
    score: Table,
    counties: Table,
    states: Table,
    centroids: Table,
}

struct Outputs {
    merged: Table,
    tiles: TileOutput,
    search: Table,
    downloadable: Table,
    sheets: Vec<(String, Table)>,
    codebook: Table,
}

/// Pipeline unit producing every public score artifact.
pub struct PostScoreUnit {
    settings: ExportSettings,
    stage: ExportStage,
    inputs: Option<Inputs>,
    outputs: Option<Outputs>,
}

impl PostScoreUnit {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            settings,
            stage: ExportStage::Idle,
            inputs: None,
            outputs: None,
        }
    }

    pub fn stage(&self) -> ExportStage {
        self.stage
    }

    pub fn paths(&self) -> &ExportPaths {
        &self.settings.paths
    }

    fn require_stage(&self, expected: ExportStage, operation: &str) -> Result<()> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(TractScoreError::validation(format!(
                "{operation} called in stage {:?}, expected {expected:?}",
                self.stage
            )))
        }
    }

    fn read_inputs(&self) -> Result<Inputs> {
        let config = &self.settings.config;
        let paths = &self.settings.paths;

        let score = read_delimited(
            &paths.score_input,
            &ReadOptions::csv().with_string_columns([config.merge.tract_id_column.as_str()]),
        )?;
        let counties = read_delimited(
            &paths.counties_input,
            &ReadOptions::tsv()
                .with_encoding(Encoding::Latin1)
                .with_string_columns(merge::counties_string_columns())
                .with_columns(merge::counties_columns()),
        )?;
        let states = read_delimited(
            &paths.states_input,
            &ReadOptions::csv()
                .with_string_columns([merge::STATES_FIPS_COLUMN, merge::STATES_ABBREVIATION_COLUMN])
                .with_columns([
                    merge::STATES_FIPS_COLUMN,
                    merge::STATES_NAME_COLUMN,
                    merge::STATES_ABBREVIATION_COLUMN,
                ]),
        )?;
        let centroids = read_delimited(
            &paths.centroids_input,
            &ReadOptions::csv().with_string_columns([config.search.id_column.as_str()]),
        )?;

        if let Ok(ids) = score.text_column(&config.merge.tract_id_column) {
            let malformed = ids
                .iter()
                .filter(|id| !id.is_some_and(is_well_formed_tract_id))
                .count();
            if malformed > 0 {
                warn!(malformed, "score table has tract ids that are not 11 digits");
            }
        }

        Ok(Inputs {
            score,
            counties,
            states,
            centroids,
        })
    }

    fn build_outputs(&self, inputs: &Inputs) -> Result<Outputs> {
        let config = &self.settings.config;

        let search = build_tract_search(&inputs.centroids, &config.search)?;

        let counties = normalize_counties(&inputs.counties, &config.merge)?;
        let states = normalize_states(&inputs.states, &config.merge)?;
        let merged = merge_score(&inputs.score, &counties, &states, &config.merge)?;

        let tiles = build_tiles(&merged, &config.tiles, &config.merge.tract_id_column)?;

        let downloadable = build_downloadable(&merged, &config.csv.fields, &config.csv.global_config)?;
        let sheet_global = config.excel.global_config.download();
        let sheets = config
            .excel
            .sheets
            .iter()
            .map(|sheet| {
                build_downloadable(&merged, &sheet.fields, &sheet_global)
                    .map(|table| (sheet.label.clone(), table))
            })
            .collect::<Result<Vec<_>>>()?;

        let rows = build_codebook(&config.csv, &config.excel, &config.codebook);
        check_codebook(&rows, &downloadable.columns()).map_err(|v| v.into_error())?;
        let codebook = codebook_table(&rows)?;

        Ok(Outputs {
            merged,
            tiles,
            search,
            downloadable,
            sheets,
            codebook,
        })
    }

    fn write_outputs(&self, outputs: &Outputs) -> Result<ExportManifest> {
        let config = &self.settings.config;
        let paths = &self.settings.paths;

        write_csv_file(&paths.merged_full, &outputs.merged, true)?;
        write_csv_file(&paths.tiles_csv, &outputs.tiles.table, false)?;
        write_json_file(&paths.tile_index, &outputs.tiles.index)?;
        write_records_file(&paths.tract_search, &outputs.search)?;

        write_csv_file(&paths.downloadable_csv, &outputs.downloadable, false)?;
        let sheets: Vec<Sheet<'_>> = outputs
            .sheets
            .iter()
            .map(|(name, table)| Sheet { name, table })
            .collect();
        write_workbook(
            &paths.downloadable_xlsx,
            &sheets,
            WorkbookFormat {
                column_width: config.excel.global_config.excel_config.default_column_width,
            },
        )?;
        write_csv_file(&paths.codebook_csv, &outputs.codebook, false)?;

        write_bundle(
            &paths.csv_bundle,
            &[&paths.downloadable_csv, &paths.codebook_csv, &paths.readme],
        )?;
        write_bundle(
            &paths.xlsx_bundle,
            &[&paths.downloadable_xlsx, &paths.codebook_csv, &paths.readme],
        )?;
        let mut documentation = vec![&paths.downloadable_xlsx, &paths.downloadable_csv];
        documentation.extend(paths.documentation.iter());
        documentation.push(&paths.readme);
        write_bundle(&paths.documentation_bundle, &documentation)?;

        let written = [
            &paths.merged_full,
            &paths.tiles_csv,
            &paths.tile_index,
            &paths.tract_search,
            &paths.downloadable_csv,
            &paths.downloadable_xlsx,
            &paths.codebook_csv,
            &paths.csv_bundle,
            &paths.xlsx_bundle,
            &paths.documentation_bundle,
        ];
        let artifacts = written
            .iter()
            .map(|path| artifact_meta(&paths.score_dir, path))
            .collect::<Result<Vec<_>>>()?;

        let manifest = ExportManifest {
            schema_version: CURRENT_SCHEMA_VERSION,
            run_id: RunId::new(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            created_at: Utc::now(),
            tract_count: outputs.merged.len(),
            artifacts,
        };
        write_manifest(&paths.manifest, &manifest)?;
        Ok(manifest)
    }
}

impl PipelineUnit for PostScoreUnit {
    fn data_sources(&self) -> Vec<DataSource> {
        vec![self.settings.counties.clone()]
    }

    #[instrument(skip(self), fields(stage = "extract"))]
    fn extract(&mut self, use_cache: bool) -> Result<()> {
        self.require_stage(ExportStage::Idle, "extract")?;
        fetch_all_blocking(&self.data_sources(), use_cache, &FetchOptions::default())?;

        let inputs = self.read_inputs()?;
        info!(
            score_rows = inputs.score.len(),
            counties = inputs.counties.len(),
            states = inputs.states.len(),
            centroids = inputs.centroids.len(),
            "inputs read"
        );
        self.inputs = Some(inputs);
        self.stage = ExportStage::Extracted;
        Ok(())
    }

    #[instrument(skip_all, fields(stage = "transform"))]
    fn transform(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Extracted, "transform")?;
        let inputs = self
            .inputs
            .take()
            .ok_or_else(|| TractScoreError::validation("transform called without inputs"))?;

        let outputs = self.build_outputs(&inputs)?;
        info!(
            tracts = outputs.merged.len(),
            tiles = outputs.tiles.table.len(),
            downloadable_columns = outputs.downloadable.width(),
            sheets = outputs.sheets.len(),
            "artifacts built"
        );
        self.outputs = Some(outputs);
        self.stage = ExportStage::Transformed;
        Ok(())
    }

    #[instrument(skip_all, fields(stage = "load"))]
    fn load(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Transformed, "load")?;
        let outputs = self
            .outputs
            .take()
            .ok_or_else(|| TractScoreError::validation("load called without outputs"))?;

        let manifest = self.write_outputs(&outputs)?;
        info!(
            run_id = %manifest.run_id,
            artifacts = manifest.artifacts.len(),
            path = %self.settings.paths.manifest.display(),
            "artifacts written"
        );
        self.stage = ExportStage::Loaded;
        Ok(())
    }

    #[instrument(skip_all, fields(stage = "validate"))]
    fn validate(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Loaded, "validate")?;
        let manifest = read_manifest(&self.settings.paths.manifest)?;
        verify_manifest(&self.settings.paths.score_dir, &manifest)?;
        debug!(artifacts = manifest.artifacts.len(), "artifacts verified");
        self.stage = ExportStage::Validated;
        Ok(())
    }

    #[instrument(skip_all, fields(stage = "cleanup"))]
    fn cleanup(&mut self) -> Result<()> {
        self.require_stage(ExportStage::Validated, "cleanup")?;
        self.inputs = None;
        self.outputs = None;

        let tmp = &self.settings.paths.tmp_dir;
        match std::fs::remove_dir_all(tmp) {
            Ok(()) => debug!(path = %tmp.display(), "removed temporary directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TractScoreError::io(tmp, e)),
        }
        self.stage = ExportStage::CleanedUp;
        Ok(())
    }
}
