//! Dataset scheduler: a bounded pool for the concurrent set, then the
//! memory-intensive set one at a time.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{error, info, instrument, warn};

use tractscore_shared::{FailurePolicy, Result, RunId, SchedulerConfig, TractScoreError};

use crate::progress::ProgressReporter;
use crate::registry::{DatasetDescriptor, DatasetRegistry, partition};
use crate::unit::{Stage, run_stage, run_unit};

/// Pool and failure policy of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Worker count for the concurrent set.
    pub parallelism: usize,
    pub failure_policy: FailurePolicy,
    /// Run the memory-intensive set even after a concurrent-set failure.
    pub sequential_after_failure: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            parallelism: config.resolved_parallelism(),
            failure_policy: config.failure_policy,
            sequential_after_failure: config.sequential_after_failure,
        }
    }
}

/// What to run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunRequest<'a> {
    /// One dataset by name, or every non-standalone dataset.
    pub selector: Option<&'a str>,
    pub use_cache: bool,
    /// Shrink the pool to a single worker.
    pub concurrency_disabled: bool,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: RunId,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct PhaseOutcome {
    completed: Vec<String>,
    failed: Vec<String>,
    skipped: Vec<String>,
    first_error: Option<TractScoreError>,
}

impl PhaseOutcome {
    /// Record a finished pool task, looking its dataset up by task id.
    fn record_joined(
        &mut self,
        joined: std::result::Result<(Id, Result<()>), JoinError>,
        running: &mut HashMap<Id, String>,
        progress: &dyn ProgressReporter,
    ) {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(join_err) => {
                let err = TractScoreError::validation(format!("job task failed: {join_err}"));
                (join_err.id(), Err(err))
            }
        };
        let dataset = running
            .remove(&id)
            .unwrap_or_else(|| format!("task {id}"));
        match result {
            Ok(()) => {
                progress.job_finished(&dataset, true);
                self.completed.push(dataset);
            }
            Err(err) => {
                progress.job_finished(&dataset, false);
                self.record_failure(dataset, err);
            }
        }
    }

    fn record_failure(&mut self, dataset: String, err: TractScoreError) {
        error!(dataset = %dataset, error = %err, "dataset failed");
        self.failed.push(dataset);
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }
}

/// Run the selected datasets.
///
/// An unknown selector fails before any unit is constructed. The concurrent
/// set runs on a pool of `parallelism` workers (one when concurrency is
/// disabled) and every started job runs to completion. After that phase the
/// first failure in completion order is the run's error; unless
/// `sequential_after_failure` is set, the memory-intensive set is then
/// skipped. The memory-intensive set runs in registration order and stops at
/// its first failure.
#[instrument(skip_all, fields(selector = request.selector.unwrap_or("all")))]
pub async fn run(
    registry: &DatasetRegistry,
    request: &RunRequest<'_>,
    options: &SchedulerOptions,
    progress: &dyn ProgressReporter,
) -> Result<RunReport> {
    let start = Instant::now();
    let run_id = RunId::new();

    let working_set = registry.resolve(request.selector)?;
    let (concurrent, sequential) = partition(working_set);
    let workers = if request.concurrency_disabled {
        1
    } else {
        options.parallelism.max(1)
    };

    info!(
        %run_id,
        concurrent = concurrent.len(),
        sequential = sequential.len(),
        workers,
        policy = ?options.failure_policy,
        "starting run"
    );

    let mut outcome = if concurrent.is_empty() {
        PhaseOutcome::default()
    } else {
        progress.phase("Running datasets");
        run_concurrent(concurrent, workers, options.failure_policy, request.use_cache, progress).await
    };

    if outcome.first_error.is_some() && !options.sequential_after_failure {
        if !sequential.is_empty() {
            warn!(
                skipped = sequential.len(),
                "skipping memory-intensive datasets after a failure"
            );
        }
        outcome
            .skipped
            .extend(sequential.into_iter().map(|d| d.name));
    } else if !sequential.is_empty() {
        progress.phase("Running memory-intensive datasets");
        run_sequential(sequential, request.use_cache, progress, &mut outcome).await;
    }

    let report = RunReport {
        run_id,
        completed: outcome.completed,
        failed: outcome.failed,
        skipped: outcome.skipped,
        elapsed: start.elapsed(),
    };

    info!(
        run_id = %report.run_id,
        completed = report.completed.len(),
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "run finished"
    );

    if let Some(err) = outcome.first_error {
        return Err(err);
    }
    progress.done(&report);
    Ok(report)
}

/// Construct and drive one dataset's unit.
pub(crate) fn run_job(descriptor: &DatasetDescriptor, use_cache: bool) -> Result<()> {
    let start = Instant::now();
    let mut unit = run_stage(&descriptor.name, Stage::Construct, || Ok(descriptor.create()))?;
    run_unit(&descriptor.name, unit.as_mut(), use_cache)?;
    info!(
        dataset = %descriptor.name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "dataset complete"
    );
    Ok(())
}

async fn run_concurrent(
    jobs: Vec<DatasetDescriptor>,
    workers: usize,
    policy: FailurePolicy,
    use_cache: bool,
    progress: &dyn ProgressReporter,
) -> PhaseOutcome {
    let semaphore = Arc::new(Semaphore::new(workers));
    let failed_fast = Arc::new(AtomicBool::new(false));
    let mut queue: VecDeque<DatasetDescriptor> = jobs.into();
    let mut join_set: JoinSet<Result<()>> = JoinSet::new();
    let mut running: HashMap<Id, String> = HashMap::new();
    let mut outcome = PhaseOutcome::default();

    loop {
        let can_launch = !queue.is_empty() && !failed_fast.load(Ordering::SeqCst);
        tokio::select! {
            permit = semaphore.clone().acquire_owned(), if can_launch => {
                let Some(descriptor) = queue.pop_front() else { continue };
                let permit = match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        outcome.record_failure(
                            descriptor.name,
                            TractScoreError::validation(format!("worker pool closed: {e}")),
                        );
                        continue;
                    }
                };
                // A job that failed under fail-fast sets the flag before
                // releasing its permit, so it is visible here.
                if failed_fast.load(Ordering::SeqCst) {
                    outcome.skipped.push(descriptor.name);
                    continue;
                }

                progress.job_started(&descriptor.name);
                let dataset = descriptor.name.clone();
                let flag = failed_fast.clone();
                let handle = join_set.spawn_blocking(move || {
                    let result = run_job(&descriptor, use_cache);
                    if result.is_err() && policy == FailurePolicy::FailFast {
                        flag.store(true, Ordering::SeqCst);
                    }
                    drop(permit);
                    result
                });
                running.insert(handle.id(), dataset);
            }
            joined = join_set.join_next_with_id(), if !join_set.is_empty() => {
                if let Some(joined) = joined {
                    outcome.record_joined(joined, &mut running, progress);
                }
            }
            else => break,
        }
    }

    outcome.skipped.extend(queue.into_iter().map(|d| d.name));
    outcome
}

async fn run_sequential(
    jobs: Vec<DatasetDescriptor>,
    use_cache: bool,
    progress: &dyn ProgressReporter,
    outcome: &mut PhaseOutcome,
) {
    let mut remaining = jobs.into_iter();
    while let Some(descriptor) = remaining.next() {
        let dataset = descriptor.name.clone();
        progress.job_started(&dataset);
        let result = tokio::task::spawn_blocking(move || run_job(&descriptor, use_cache))
            .await
            .unwrap_or_else(|e| Err(TractScoreError::validation(format!("job task failed: {e}"))));

        match result {
            Ok(()) => {
                progress.job_finished(&dataset, true);
                outcome.completed.push(dataset);
            }
            Err(err) => {
                progress.job_finished(&dataset, false);
                outcome.record_failure(dataset, err);
                outcome.skipped.extend(remaining.map(|d| d.name));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use crate::unit::PipelineUnit;
    use crate::unit::tests::{EventLog, RecordingUnit};

    struct Plan {
        name: &'static str,
        memory_intensive: bool,
        delay_ms: u64,
        fail_at: Option<Stage>,
        panic_at: Option<Stage>,
    }

    fn plan(name: &'static str, memory_intensive: bool) -> Plan {
        Plan {
            name,
            memory_intensive,
            delay_ms: 0,
            fail_at: None,
            panic_at: None,
        }
    }

    fn registry(plans: Vec<Plan>, log: &EventLog) -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        for s in plans {
            let log = log.clone();
            let Plan {
                name,
                memory_intensive,
                delay_ms,
                fail_at,
                panic_at,
            } = s;
            registry
                .register(name, memory_intensive, move || {
                    let mut unit = RecordingUnit::new(name, &log);
                    unit.delay = Duration::from_millis(delay_ms);
                    unit.fail_at = fail_at;
                    unit.panic_at = panic_at;
                    Box::new(unit) as Box<dyn PipelineUnit>
                })
                .unwrap();
        }
        registry
    }

    fn options(parallelism: usize) -> SchedulerOptions {
        SchedulerOptions {
            parallelism,
            failure_policy: FailurePolicy::CollectAll,
            sequential_after_failure: false,
        }
    }

    fn position(log: &EventLog, event: &str) -> Option<usize> {
        log.lock().unwrap().iter().position(|e| e == event)
    }

    #[tokio::test]
    async fn memory_intensive_job_runs_after_concurrent_jobs() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                plan("geo", true),
                Plan { delay_ms: 60, ..plan("census", false) },
                Plan { delay_ms: 20, ..plan("hud", false) },
            ],
            &log,
        );

        let report = run(&registry, &RunRequest::default(), &options(4), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completed.len(), 3);
        assert_eq!(report.completed.last().map(String::as_str), Some("geo"));
        let geo_start = position(&log, "geo:extract").unwrap();
        assert!(position(&log, "census:cleanup").unwrap() < geo_start);
        assert!(position(&log, "hud:cleanup").unwrap() < geo_start);
    }

    #[tokio::test]
    async fn unknown_selector_runs_nothing() {
        let log = EventLog::default();
        let registry = registry(vec![plan("census", false), plan("geo", true)], &log);

        let request = RunRequest {
            selector: Some("nope"),
            ..RunRequest::default()
        };
        let err = run(&registry, &request, &options(2), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, TractScoreError::UnknownDataset { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_failure_lets_siblings_finish_and_skips_sequential() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { fail_at: Some(Stage::Extract), ..plan("broken", false) },
                Plan { delay_ms: 50, ..plan("slow", false) },
                plan("geo", true),
            ],
            &log,
        );

        let err = run(&registry, &RunRequest::default(), &options(2), &SilentProgress)
            .await
            .unwrap_err();

        match &err {
            TractScoreError::Job { dataset, stage, .. } => {
                assert_eq!(dataset, "broken");
                assert_eq!(stage, "extract");
            }
            other => panic!("expected job error, got {other:?}"),
        }
        assert!(position(&log, "slow:cleanup").is_some());
        assert!(position(&log, "geo:extract").is_none());
    }

    #[tokio::test]
    async fn sequential_after_failure_runs_memory_intensive_set() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { fail_at: Some(Stage::Load), ..plan("broken", false) },
                plan("geo", true),
            ],
            &log,
        );
        let options = SchedulerOptions {
            sequential_after_failure: true,
            ..options(2)
        };

        let err = run(&registry, &RunRequest::default(), &options, &SilentProgress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broken"));
        assert!(position(&log, "geo:cleanup").is_some());
    }

    #[tokio::test]
    async fn fail_fast_skips_jobs_not_yet_started() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { fail_at: Some(Stage::Transform), ..plan("first", false) },
                plan("second", false),
                plan("third", false),
            ],
            &log,
        );
        let options = SchedulerOptions {
            failure_policy: FailurePolicy::FailFast,
            ..options(1)
        };

        let err = run(&registry, &RunRequest::default(), &options, &SilentProgress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("first"));
        assert!(position(&log, "second:extract").is_none());
        assert!(position(&log, "third:extract").is_none());
    }

    #[tokio::test]
    async fn collect_all_runs_every_job_after_a_failure() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { fail_at: Some(Stage::Transform), ..plan("first", false) },
                plan("second", false),
                plan("third", false),
            ],
            &log,
        );

        let err = run(&registry, &RunRequest::default(), &options(1), &SilentProgress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("first"));
        assert!(position(&log, "second:cleanup").is_some());
        assert!(position(&log, "third:cleanup").is_some());
    }

    #[tokio::test]
    async fn sequential_failure_stops_remaining_sequential_jobs() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                plan("done", true),
                Plan { fail_at: Some(Stage::Validate), ..plan("broken", true) },
                plan("never", true),
            ],
            &log,
        );

        let err = run(&registry, &RunRequest::default(), &options(2), &SilentProgress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("during validate"));
        assert!(position(&log, "done:cleanup").is_some());
        assert!(position(&log, "never:extract").is_none());
    }

    #[tokio::test]
    async fn panicking_unit_is_a_job_failure() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { panic_at: Some(Stage::Extract), ..plan("panics", false) },
                plan("fine", false),
            ],
            &log,
        );

        let err = run(&registry, &RunRequest::default(), &options(2), &SilentProgress)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("panics exploded"));
        assert!(position(&log, "fine:cleanup").is_some());
    }

    #[tokio::test]
    async fn disabled_concurrency_runs_jobs_one_at_a_time() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { delay_ms: 20, ..plan("a", false) },
                Plan { delay_ms: 20, ..plan("b", false) },
                Plan { delay_ms: 20, ..plan("c", false) },
            ],
            &log,
        );
        let request = RunRequest {
            concurrency_disabled: true,
            ..RunRequest::default()
        };

        run(&registry, &request, &options(8), &SilentProgress)
            .await
            .unwrap();

        // With one worker, each job's five stages are contiguous in the log.
        let events = log.lock().unwrap().clone();
        for chunk in events.chunks(5) {
            let owner = chunk[0].split(':').next().unwrap();
            assert!(chunk.iter().all(|e| e.starts_with(&format!("{owner}:"))));
        }
    }

    #[derive(Default)]
    struct FinishedLog(std::sync::Mutex<Vec<(String, bool)>>);

    impl ProgressReporter for FinishedLog {
        fn phase(&self, _name: &str) {}
        fn job_started(&self, _dataset: &str) {}
        fn job_finished(&self, dataset: &str, ok: bool) {
            self.0.lock().unwrap().push((dataset.to_string(), ok));
        }
        fn done(&self, _report: &RunReport) {}
    }

    #[tokio::test]
    async fn lost_pool_task_is_reported_under_its_dataset() {
        let mut join_set: JoinSet<Result<()>> = JoinSet::new();
        let mut running = HashMap::new();
        let handle = join_set.spawn_blocking(|| -> Result<()> { panic!("worker lost") });
        running.insert(handle.id(), "census".to_string());

        let progress = FinishedLog::default();
        let mut outcome = PhaseOutcome::default();
        let joined = join_set.join_next_with_id().await.unwrap();
        assert!(joined.is_err());
        outcome.record_joined(joined, &mut running, &progress);

        assert_eq!(outcome.failed, ["census"]);
        assert!(running.is_empty());
        assert_eq!(*progress.0.lock().unwrap(), [("census".to_string(), false)]);
        let err = outcome.first_error.unwrap();
        assert!(err.to_string().contains("job task failed"), "{err}");
    }

    #[tokio::test]
    async fn finished_jobs_reach_the_progress_reporter() {
        let log = EventLog::default();
        let registry = registry(
            vec![
                Plan { fail_at: Some(Stage::Extract), ..plan("broken", false) },
                plan("fine", false),
            ],
            &log,
        );
        let progress = FinishedLog::default();

        run(&registry, &RunRequest::default(), &options(2), &progress)
            .await
            .unwrap_err();

        let mut finished = progress.0.lock().unwrap().clone();
        finished.sort();
        assert_eq!(
            finished,
            [("broken".to_string(), false), ("fine".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn selecting_one_dataset_runs_only_it() {
        let log = EventLog::default();
        let registry = registry(vec![plan("census", false), plan("geo", true)], &log);
        let request = RunRequest {
            selector: Some("geo"),
            ..RunRequest::default()
        };

        let report = run(&registry, &request, &options(2), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.completed, ["geo"]);
        assert!(position(&log, "census:extract").is_none());
    }
}
