//! Startup-time table of datasets and their unit constructors.

use std::sync::Arc;

use tractscore_shared::{Result, TractScoreError};

use crate::unit::PipelineUnit;

/// Constructor of a fresh unit instance for one run.
pub type UnitFactory = Arc<dyn Fn() -> Box<dyn PipelineUnit> + Send + Sync>;

/// One registered dataset.
#[derive(Clone)]
pub struct DatasetDescriptor {
    pub name: String,
    /// Run one at a time, after the concurrent set.
    pub memory_intensive: bool,
    /// Only runs when selected by name.
    pub standalone: bool,
    pub factory: UnitFactory,
}

impl DatasetDescriptor {
    /// Build a fresh unit.
    pub fn create(&self) -> Box<dyn PipelineUnit> {
        (self.factory)()
    }
}

impl std::fmt::Debug for DatasetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetDescriptor")
            .field("name", &self.name)
            .field("memory_intensive", &self.memory_intensive)
            .field("standalone", &self.standalone)
            .finish_non_exhaustive()
    }
}

/// Ordered registry of datasets. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    descriptors: Vec<DatasetDescriptor>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dataset that is part of "run all".
    pub fn register<F>(&mut self, name: impl Into<String>, memory_intensive: bool, factory: F) -> Result<()>
    where
        F: Fn() -> Box<dyn PipelineUnit> + Send + Sync + 'static,
    {
        self.insert(DatasetDescriptor {
            name: name.into(),
            memory_intensive,
            standalone: false,
            factory: Arc::new(factory),
        })
    }

    /// Register a dataset that only runs when selected by name.
    pub fn register_standalone<F>(
        &mut self,
        name: impl Into<String>,
        memory_intensive: bool,
        factory: F,
    ) -> Result<()>
    where
        F: Fn() -> Box<dyn PipelineUnit> + Send + Sync + 'static,
    {
        self.insert(DatasetDescriptor {
            name: name.into(),
            memory_intensive,
            standalone: true,
            factory: Arc::new(factory),
        })
    }

    fn insert(&mut self, descriptor: DatasetDescriptor) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(TractScoreError::config("dataset name must not be empty"));
        }
        if self.get(&descriptor.name).is_some() {
            return Err(TractScoreError::config(format!(
                "dataset `{}` is registered twice",
                descriptor.name
            )));
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DatasetDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn descriptors(&self) -> &[DatasetDescriptor] {
        &self.descriptors
    }

    /// The working set for a run: every non-standalone dataset in
    /// registration order, or exactly the one named by `selector`.
    pub fn resolve(&self, selector: Option<&str>) -> Result<Vec<DatasetDescriptor>> {
        match selector {
            None => Ok(self
                .descriptors
                .iter()
                .filter(|d| !d.standalone)
                .cloned()
                .collect()),
            Some(name) => self
                .get(name)
                .cloned()
                .map(|d| vec![d])
                .ok_or_else(|| TractScoreError::UnknownDataset {
                    name: name.to_string(),
                }),
        }
    }
}

/// Split a working set into `(concurrent, sequential)` by memory class,
/// keeping the input order within each side.
pub fn partition(descriptors: Vec<DatasetDescriptor>) -> (Vec<DatasetDescriptor>, Vec<DatasetDescriptor>) {
    descriptors.into_iter().partition(|d| !d.memory_intensive)
}
