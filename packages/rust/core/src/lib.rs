//! Dataset scheduling and the score export engine for tractscore.
//!
//! Datasets are registered as [`PipelineUnit`] factories in a
//! [`DatasetRegistry`]; [`scheduler::run`] executes a selection of them under
//! a bounded pool, with memory-intensive datasets run one at a time
//! afterwards. The [`export`] module holds the post-score unit that turns the
//! scored tract table into every published artifact.

pub mod datasets;
pub mod export;
pub mod invariants;
pub mod mirror;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod unit;

pub use datasets::{build_registry, default_registry};
pub use progress::{ProgressReporter, SilentProgress};
pub use registry::{DatasetDescriptor, DatasetRegistry, UnitFactory};
pub use scheduler::{RunReport, RunRequest, SchedulerOptions};
pub use unit::{PipelineUnit, Stage, run_unit};
