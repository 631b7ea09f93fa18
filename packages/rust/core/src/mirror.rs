//! Datasets that only mirror remote sources into the data directory.

use std::path::Path;

use tracing::debug;

use tractscore_shared::{DatasetConfig, Result, TractScoreError};
use tractscore_sources::DataSource;

use crate::unit::PipelineUnit;

/// A unit whose whole job is downloading its sources.
#[derive(Debug, Clone)]
pub struct SourceMirrorUnit {
    sources: Vec<DataSource>,
}

impl SourceMirrorUnit {
    pub fn new(sources: Vec<DataSource>) -> Self {
        Self { sources }
    }

    /// Build from a `[[datasets]]` entry.
    pub fn from_config(config: &DatasetConfig, data_dir: &Path) -> Self {
        Self::new(
            config
                .sources
                .iter()
                .map(|s| DataSource::from_config(s, data_dir))
                .collect(),
        )
    }
}

impl PipelineUnit for SourceMirrorUnit {
    fn data_sources(&self) -> Vec<DataSource> {
        self.sources.clone()
    }

    fn transform(&mut self) -> Result<()> {
        Ok(())
    }

    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Every source must be on disk after extract.
    fn validate(&mut self) -> Result<()> {
        for source in &self.sources {
            if !source.is_cached() {
                return Err(TractScoreError::validation(format!(
                    "source missing after extract: {}",
                    source.destination().display()
                )));
            }
            debug!(destination = %source.destination().display(), "source present");
        }
        Ok(())
    }
}
