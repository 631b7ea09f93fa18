//! Shared types, error model, and configuration for tractscore.
//!
//! This crate is the foundation depended on by all other tractscore crates.
//! It provides:
//! - [`TractScoreError`], the unified error type
//! - Domain types ([`RunId`], [`ExportManifest`], tract id prefixes)
//! - Configuration ([`AppConfig`], [`ExportConfig`], config loading)

pub mod config;
pub mod error;
pub mod export_config;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatasetConfig, FailurePolicy, PathsConfig, SchedulerConfig, SourceConfig,
    SourceKind, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_app_config,
};
pub use error::{Result, TractScoreError};
pub use export_config::{
    BundleConfig, CodebookConfig, CsvConfig, DefaultExperience, DownloadGlobalConfig,
    ExcelConfig, ExcelFormatConfig, ExcelGlobalConfig, ExperienceRule, ExportConfig,
    FieldConfig, FieldDescription, FieldFormat, MergeConfig, RoundingConfig, SearchConfig,
    SheetConfig, TileColumn, TilesConfig, load_export_config, parse_export_config,
    validate_export_config,
};
pub use types::{
    ArtifactMeta, COUNTY_PREFIX_LEN, CURRENT_SCHEMA_VERSION, ExportManifest, RunId,
    STATE_PREFIX_LEN, county_prefix, fips_prefix, is_well_formed_tract_id, state_prefix,
};
