//! The pipeline unit lifecycle contract.

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, info_span};

use tractscore_shared::{Result, TractScoreError};
use tractscore_sources::{DataSource, FetchOptions, fetch_all_blocking};

/// One dataset's pipeline.
///
/// The scheduler drives a unit through
/// `extract → transform → load → validate → cleanup` and stops at the first
/// failing stage. Units are synchronous and run on a blocking thread; each
/// instance owns its working data and is dropped after its run.
pub trait PipelineUnit: Send {
    /// Remote inputs this unit downloads during `extract`.
    fn data_sources(&self) -> Vec<DataSource>;

    /// Fetch inputs. The default downloads [`data_sources`](Self::data_sources),
    /// reusing files already on disk when `use_cache` is set.
    fn extract(&mut self, use_cache: bool) -> Result<()> {
        fetch_all_blocking(&self.data_sources(), use_cache, &FetchOptions::default())?;
        Ok(())
    }

    fn transform(&mut self) -> Result<()>;

    fn load(&mut self) -> Result<()>;

    fn validate(&mut self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Remove every downloaded source from disk.
    fn clear_data_source_cache(&self) -> Result<()> {
        for source in self.data_sources() {
            source.clear_cache()?;
        }
        Ok(())
    }
}

/// A lifecycle stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Construct,
    Extract,
    Transform,
    Load,
    Validate,
    Cleanup,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Construct => "construct",
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::Load => "load",
            Self::Validate => "validate",
            Self::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drive `unit` through every stage in order.
///
/// A stage error or panic ends the run and comes back as
/// [`TractScoreError::Job`] naming the dataset and stage.
pub fn run_unit(dataset: &str, unit: &mut dyn PipelineUnit, use_cache: bool) -> Result<()> {
    let span = info_span!("unit", dataset);
    let _entered = span.enter();

    run_stage(dataset, Stage::Extract, || unit.extract(use_cache))?;
    run_stage(dataset, Stage::Transform, || unit.transform())?;
    run_stage(dataset, Stage::Load, || unit.load())?;
    run_stage(dataset, Stage::Validate, || unit.validate())?;
    run_stage(dataset, Stage::Cleanup, || unit.cleanup())?;
    Ok(())
}

/// Run one stage, converting its error or panic into a job error.
pub(crate) fn run_stage<T>(
    dataset: &str,
    stage: Stage,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(TractScoreError::validation(format!(
            "panicked: {}",
            panic_message(payload.as_ref())
        )))
    });
    match outcome {
        Ok(value) => {
            debug!(
                dataset,
                stage = %stage,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "stage complete"
            );
            Ok(value)
        }
        Err(e) => Err(TractScoreError::job(dataset, stage.as_str(), e)),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Shared, ordered record of lifecycle calls across units.
    pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

    /// A unit that records its stages and can fail or panic at one of them.
    pub(crate) struct RecordingUnit {
        pub name: String,
        pub log: EventLog,
        pub fail_at: Option<Stage>,
        pub panic_at: Option<Stage>,
        pub delay: std::time::Duration,
    }

    impl RecordingUnit {
        pub(crate) fn new(name: &str, log: &EventLog) -> Self {
            Self {
                name: name.to_string(),
                log: log.clone(),
                fail_at: None,
                panic_at: None,
                delay: std::time::Duration::ZERO,
            }
        }

        fn step(&self, stage: Stage) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, stage));
            if stage == Stage::Extract && !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.panic_at == Some(stage) {
                panic!("{} exploded", self.name);
            }
            if self.fail_at == Some(stage) {
                return Err(TractScoreError::validation(format!("{} failed", self.name)));
            }
            Ok(())
        }
    }

    impl PipelineUnit for RecordingUnit {
        fn data_sources(&self) -> Vec<DataSource> {
            Vec::new()
        }
        fn extract(&mut self, _use_cache: bool) -> Result<()> {
            self.step(Stage::Extract)
        }
        fn transform(&mut self) -> Result<()> {
            self.step(Stage::Transform)
        }
        fn load(&mut self) -> Result<()> {
            self.step(Stage::Load)
        }
        fn validate(&mut self) -> Result<()> {
            self.step(Stage::Validate)
        }
        fn cleanup(&mut self) -> Result<()> {
            self.step(Stage::Cleanup)
        }
    }

    #[test]
    fn stages_run_in_order() {
        let log = EventLog::default();
        let mut unit = RecordingUnit::new("census", &log);
        run_unit("census", &mut unit, false).unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            [
                "census:extract",
                "census:transform",
                "census:load",
                "census:validate",
                "census:cleanup"
            ]
        );
    }

    #[test]
    fn failure_stops_later_stages() {
        let log = EventLog::default();
        let mut unit = RecordingUnit::new("tree_equity", &log);
        unit.fail_at = Some(Stage::Transform);

        let err = run_unit("tree_equity", &mut unit, false).unwrap_err();
        match err {
            TractScoreError::Job { dataset, stage, .. } => {
                assert_eq!(dataset, "tree_equity");
                assert_eq!(stage, "transform");
            }
            other => panic!("expected job error, got {other:?}"),
        }
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn panic_becomes_job_error() {
        let log = EventLog::default();
        let mut unit = RecordingUnit::new("hud", &log);
        unit.panic_at = Some(Stage::Load);

        let err = run_unit("hud", &mut unit, false).unwrap_err();
        assert!(err.to_string().contains("during load"));
        assert!(err.to_string().contains("hud exploded"));
    }

    #[test]
    fn default_cache_clearing_removes_sources() {
        struct Mirror(DataSource);
        impl PipelineUnit for Mirror {
            fn data_sources(&self) -> Vec<DataSource> {
                vec![self.0.clone()]
            }
            fn transform(&mut self) -> Result<()> {
                Ok(())
            }
            fn load(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let dir = std::env::temp_dir().join(format!("ts-unit-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("states.csv");
        std::fs::write(&path, "fips\n01\n").unwrap();

        let unit = Mirror(DataSource::file(
            url::Url::parse("http://127.0.0.1:9/states.csv").unwrap(),
            &path,
        ));
        unit.clear_data_source_cache().unwrap();
        assert!(!path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
