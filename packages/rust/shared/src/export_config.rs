//! Typed configuration for the score export.
//!
//! Everything the export engine needs to shape its artifacts is declared in a
//! single `export.toml`: downloadable field lists, rounding precisions, tile
//! columns and experience rules, codebook descriptions and bundle contents.
//! The file is validated once at load time so that a bad `format` tag or a
//! rounding mismatch never reaches the transform stage.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TractScoreError};

/// Longest sheet name a workbook accepts.
const MAX_SHEET_LABEL_LEN: usize = 31;

/// Characters a workbook rejects in sheet names.
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

// ---------------------------------------------------------------------------
// Field formats
// ---------------------------------------------------------------------------

/// Normalization class of a downloadable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldFormat {
    /// Fraction in `[0, 1]`, published as a floored integer percent.
    Percentage,
    /// Fraction published as a percent floored to the loss-rate precision.
    LossRatePercentage,
    /// Floored to the generic float precision.
    Float,
    String,
    Bool,
    #[serde(rename = "int64", alias = "integer")]
    Integer,
}

impl FieldFormat {
    /// Tag as written in the config file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::LossRatePercentage => "loss_rate_percentage",
            Self::Float => "float",
            Self::String => "string",
            Self::Bool => "bool",
            Self::Integer => "int64",
        }
    }
}

impl std::fmt::Display for FieldFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a downloadable artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Column name in the merged score table.
    pub score_name: String,
    /// Published column label.
    pub label: String,
    pub format: FieldFormat,
}

// ---------------------------------------------------------------------------
// Downloadable artifacts
// ---------------------------------------------------------------------------

/// Decimal precisions keyed by format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingConfig {
    pub float: u32,
    pub loss_rate_percentage: u32,
}

/// Settings shared by every downloadable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadGlobalConfig {
    /// Published label to sort rows by.
    #[serde(default)]
    pub sort_by_label: Option<String>,
    pub rounding_num: RoundingConfig,
}

/// `[csv]` section: the primary downloadable table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    pub global_config: DownloadGlobalConfig,
    pub fields: Vec<FieldConfig>,
}

/// Workbook presentation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExcelFormatConfig {
    pub default_column_width: f64,
}

/// `[excel.global_config]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcelGlobalConfig {
    #[serde(default)]
    pub sort_by_label: Option<String>,
    pub rounding_num: RoundingConfig,
    pub excel_config: ExcelFormatConfig,
}

impl ExcelGlobalConfig {
    /// The download settings every sheet is built with.
    pub fn download(&self) -> DownloadGlobalConfig {
        DownloadGlobalConfig {
            sort_by_label: self.sort_by_label.clone(),
            rounding_num: self.rounding_num,
        }
    }
}

/// One worksheet of the spreadsheet download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetConfig {
    pub label: String,
    pub fields: Vec<FieldConfig>,
}

/// `[excel]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcelConfig {
    pub global_config: ExcelGlobalConfig,
    pub sheets: Vec<SheetConfig>,
}

impl ExcelConfig {
    /// Fields of every sheet, in sheet order.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldConfig> {
        self.sheets.iter().flat_map(|s| s.fields.iter())
    }
}

// ---------------------------------------------------------------------------
// Codebook
// ---------------------------------------------------------------------------

/// Free-text description of one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescription {
    pub score_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// `[codebook]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodebookConfig {
    #[serde(default)]
    pub fields: Vec<FieldDescription>,
}

// ---------------------------------------------------------------------------
// Tiles
// ---------------------------------------------------------------------------

/// A score column published in the tile table under a short label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileColumn {
    pub score_name: String,
    pub label: String,
}

/// Map experience assigned to tracts whose state prefix is in `fips_codes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceRule {
    pub label: String,
    pub fips_codes: Vec<String>,
    pub threshold_count: u32,
}

/// Experience of every tract no rule matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultExperience {
    pub label: String,
    pub threshold_count: u32,
}

/// `[tiles]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TilesConfig {
    /// Columns to keep, in output order.
    pub columns: Vec<TileColumn>,
    pub round_num_decimals: u32,
    /// State prefixes left off the map.
    #[serde(default)]
    pub drop_fips_codes: Vec<String>,
    /// Checked in order; the first matching rule wins.
    #[serde(default)]
    pub experiences: Vec<ExperienceRule>,
    pub default_experience: DefaultExperience,
    #[serde(default = "default_experience_field")]
    pub experience_field: String,
    #[serde(default = "default_threshold_count_field")]
    pub threshold_count_field: String,
}

fn default_experience_field() -> String {
    "UI_EXP".into()
}
fn default_threshold_count_field() -> String {
    "THRHLD".into()
}

// ---------------------------------------------------------------------------
// Merge / search / bundle
// ---------------------------------------------------------------------------

/// `[merge]` section: join keys and the labels reference columns get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default = "default_tract_id_column")]
    pub tract_id_column: String,
    #[serde(default = "default_county_key_column")]
    pub county_key_column: String,
    #[serde(default = "default_state_code_column")]
    pub state_code_column: String,
    #[serde(default = "default_county_name_label")]
    pub county_name_label: String,
    #[serde(default = "default_state_name_label")]
    pub state_name_label: String,
    #[serde(default = "default_state_abbreviation_label")]
    pub state_abbreviation_label: String,
    /// County gazetteer archive.
    #[serde(default = "default_counties_url")]
    pub counties_url: String,
    /// Tab-separated county file inside the gazetteer archive.
    #[serde(default = "default_counties_file")]
    pub counties_file: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            tract_id_column: default_tract_id_column(),
            county_key_column: default_county_key_column(),
            state_code_column: default_state_code_column(),
            county_name_label: default_county_name_label(),
            state_name_label: default_state_name_label(),
            state_abbreviation_label: default_state_abbreviation_label(),
            counties_url: default_counties_url(),
            counties_file: default_counties_file(),
        }
    }
}

fn default_tract_id_column() -> String {
    "GEOID10_TRACT".into()
}
fn default_county_key_column() -> String {
    "GEOID".into()
}
fn default_state_code_column() -> String {
    "State Code".into()
}
fn default_county_name_label() -> String {
    "County Name".into()
}
fn default_state_name_label() -> String {
    "State/Territory".into()
}
fn default_state_abbreviation_label() -> String {
    "State Abbreviation".into()
}
fn default_counties_url() -> String {
    "https://www2.census.gov/geo/docs/maps-data/data/gazetteer/Gaz_counties_national.zip".into()
}
fn default_counties_file() -> String {
    "2010_Gaz_counties_national.txt".into()
}

/// `[search]` section: columns of the centroid reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_id")]
    pub id_column: String,
    #[serde(default = "default_search_lat")]
    pub lat_column: String,
    #[serde(default = "default_search_lon")]
    pub lon_column: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            id_column: default_search_id(),
            lat_column: default_search_lat(),
            lon_column: default_search_lon(),
        }
    }
}

fn default_search_id() -> String {
    "GEOID10".into()
}
fn default_search_lat() -> String {
    "INTPTLAT10".into()
}
fn default_search_lon() -> String {
    "INTPTLON10".into()
}

/// `[bundle]` section: static documents shipped in the archives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Relative to the content directory.
    pub readme: PathBuf,
    /// Auxiliary documents of the documentation bundle, relative to the content directory.
    #[serde(default)]
    pub documentation: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Root of `export.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub csv: CsvConfig,
    pub excel: ExcelConfig,
    #[serde(default)]
    pub codebook: CodebookConfig,
    pub tiles: TilesConfig,
    pub bundle: BundleConfig,
}

/// Load and validate an export config file.
pub fn load_export_config(path: &Path) -> Result<ExportConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TractScoreError::io(path, e))?;
    parse_export_config(&content).map_err(|e| match e {
        TractScoreError::Config { message } => {
            TractScoreError::config(format!("{}: {message}", path.display()))
        }
        other => other,
    })
}

/// Parse and validate export config TOML.
pub fn parse_export_config(content: &str) -> Result<ExportConfig> {
    let config: ExportConfig =
        toml::from_str(content).map_err(|e| TractScoreError::config(e.to_string()))?;
    validate_export_config(&config)?;
    Ok(config)
}

/// Check cross-field rules that serde cannot express.
pub fn validate_export_config(config: &ExportConfig) -> Result<()> {
    if config.csv.global_config.rounding_num != config.excel.global_config.rounding_num {
        return Err(TractScoreError::config(
            "csv and excel rounding precisions differ; both downloads must round identically",
        ));
    }

    check_fields("csv", &config.csv.fields)?;
    if let Some(sort) = &config.csv.global_config.sort_by_label {
        require_label("csv", &config.csv.fields, sort)?;
    }

    if config.excel.sheets.is_empty() {
        return Err(TractScoreError::config("excel config declares no sheets"));
    }
    if config.excel.global_config.excel_config.default_column_width <= 0.0 {
        return Err(TractScoreError::config(
            "excel default_column_width must be positive",
        ));
    }
    let mut sheet_labels = HashSet::new();
    for sheet in &config.excel.sheets {
        check_sheet_label(&sheet.label)?;
        if !sheet_labels.insert(sheet.label.as_str()) {
            return Err(TractScoreError::config(format!(
                "excel sheet `{}` is declared more than once",
                sheet.label
            )));
        }
        let scope = format!("excel sheet `{}`", sheet.label);
        check_fields(&scope, &sheet.fields)?;
        if let Some(sort) = &config.excel.global_config.sort_by_label {
            require_label(&scope, &sheet.fields, sort)?;
        }
    }
    check_formats(config)?;

    url::Url::parse(&config.merge.counties_url).map_err(|e| {
        TractScoreError::config(format!(
            "merge counties_url `{}` is not a valid URL: {e}",
            config.merge.counties_url
        ))
    })?;

    check_tiles(&config.tiles, &config.merge.tract_id_column)
}

fn check_fields(scope: &str, fields: &[FieldConfig]) -> Result<()> {
    if fields.is_empty() {
        return Err(TractScoreError::config(format!("{scope} declares no fields")));
    }
    let mut names = HashSet::new();
    let mut labels = HashSet::new();
    for field in fields {
        if !names.insert(field.score_name.as_str()) {
            return Err(TractScoreError::config(format!(
                "{scope}: field `{}` is listed more than once",
                field.score_name
            )));
        }
        if !labels.insert(field.label.as_str()) {
            return Err(TractScoreError::config(format!(
                "{scope}: label `{}` is used more than once",
                field.label
            )));
        }
    }
    Ok(())
}

/// A field published in more than one place uses the same format everywhere,
/// so the csv and every sheet carry the same values for it.
fn check_formats(config: &ExportConfig) -> Result<()> {
    let mut first_seen: HashMap<&str, (String, FieldFormat)> = config
        .csv
        .fields
        .iter()
        .map(|f| (f.score_name.as_str(), ("csv".to_string(), f.format)))
        .collect();
    for sheet in &config.excel.sheets {
        for field in &sheet.fields {
            let scope = format!("excel sheet `{}`", sheet.label);
            match first_seen.get(field.score_name.as_str()) {
                Some((origin, format)) if *format != field.format => {
                    return Err(TractScoreError::config(format!(
                        "field `{}` is `{format}` in {origin} but `{}` in {scope}",
                        field.score_name, field.format
                    )));
                }
                Some(_) => {}
                None => {
                    first_seen.insert(field.score_name.as_str(), (scope, field.format));
                }
            }
        }
    }
    Ok(())
}

fn require_label(scope: &str, fields: &[FieldConfig], label: &str) -> Result<()> {
    if fields.iter().any(|f| f.label == label) {
        Ok(())
    } else {
        Err(TractScoreError::config(format!(
            "{scope}: sort_by_label `{label}` is not one of its labels"
        )))
    }
}

fn check_sheet_label(label: &str) -> Result<()> {
    if label.trim().is_empty() {
        return Err(TractScoreError::config("excel sheet label must not be empty"));
    }
    if label.chars().count() > MAX_SHEET_LABEL_LEN {
        return Err(TractScoreError::config(format!(
            "excel sheet label `{label}` is longer than {MAX_SHEET_LABEL_LEN} characters"
        )));
    }
    if label.contains(FORBIDDEN_SHEET_CHARS) {
        return Err(TractScoreError::config(format!(
            "excel sheet label `{label}` contains a forbidden character"
        )));
    }
    Ok(())
}

fn check_tiles(tiles: &TilesConfig, tract_id_column: &str) -> Result<()> {
    if !tiles.columns.iter().any(|c| c.score_name == tract_id_column) {
        return Err(TractScoreError::config(format!(
            "tiles columns must include the tract id column `{tract_id_column}`"
        )));
    }

    let mut labels = HashSet::new();
    for column in &tiles.columns {
        if !labels.insert(column.label.as_str()) {
            return Err(TractScoreError::config(format!(
                "tiles label `{}` is used more than once",
                column.label
            )));
        }
    }
    for extra in [&tiles.experience_field, &tiles.threshold_count_field] {
        if labels.contains(extra.as_str()) {
            return Err(TractScoreError::config(format!(
                "tiles label `{extra}` collides with a derived tile field"
            )));
        }
    }

    let mut experiences = HashSet::from([tiles.default_experience.label.as_str()]);
    for rule in &tiles.experiences {
        if !experiences.insert(rule.label.as_str()) {
            return Err(TractScoreError::config(format!(
                "experience `{}` is declared more than once",
                rule.label
            )));
        }
        if let Some(code) = rule.fips_codes.iter().find(|c| c.len() != 2) {
            return Err(TractScoreError::config(format!(
                "experience `{}`: fips code `{code}` is not a 2-character state prefix",
                rule.label
            )));
        }
    }
    Ok(())
}
