//! The registry a configured installation runs with.

use std::sync::Arc;

use tracing::debug;

use tractscore_shared::{AppConfig, ExportConfig, Result, load_export_config};

use crate::export::{EXPORT_DATASET_NAME, ExportSettings, PostScoreUnit};
use crate::mirror::SourceMirrorUnit;
use crate::registry::DatasetRegistry;
use crate::unit::PipelineUnit;

/// Register every `[[datasets]]` entry plus the export unit.
///
/// The export unit is standalone and memory-intensive: it only runs when
/// selected by name and never shares the pool with other jobs.
pub fn build_registry(app: &AppConfig, export: ExportConfig) -> Result<DatasetRegistry> {
    let mut registry = DatasetRegistry::new();

    for dataset in &app.datasets {
        let unit = SourceMirrorUnit::from_config(dataset, &app.paths.data_dir);
        let factory = move || Box::new(unit.clone()) as Box<dyn PipelineUnit>;
        if dataset.standalone {
            registry.register_standalone(&dataset.name, dataset.memory_intensive, factory)?;
        } else {
            registry.register(&dataset.name, dataset.memory_intensive, factory)?;
        }
    }

    let settings = ExportSettings::new(
        Arc::new(export),
        &app.paths.data_dir,
        &app.paths.content_dir,
    )?;
    registry.register_standalone(EXPORT_DATASET_NAME, true, move || {
        Box::new(PostScoreUnit::new(settings.clone())) as Box<dyn PipelineUnit>
    })?;

    debug!(datasets = registry.descriptors().len(), "registry built");
    Ok(registry)
}

/// [`build_registry`] with the export config read from `paths.export_config`.
pub fn default_registry(app: &AppConfig) -> Result<DatasetRegistry> {
    let export = load_export_config(&app.paths.export_config)?;
    build_registry(app, export)
}
