//! The partitioning orchestrator.
//!
//! An [`AggregateTestDriver`] splits a package into [`Partition`]s with a
//! [`PartitionStrategy`], then drives each partition's own driver to completion
//! one after another. Execution events of all partitions are funnelled through
//! a single [`MergingListener`], so the caller sees one root step per run.
//!
//! Partition drivers are always disposed, and a disposal failure never stops
//! the remaining partitions. Partitioning failures abort the run before any
//! partition driver is created.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tessera_model::{
    ExecutionListener, ExplorationListener, Logger, ProgressMonitor, TestExecutionOptions,
    TestExplorationOptions, TestPackageConfig,
};
use tracing::{info, Instrument};

use crate::driver::{BaseDriver, DriverCore, DriverEnv, TestDriver};
use crate::error::{DriverError, Result};
use crate::merge::MergingListener;
use crate::obs;

/// Creates the driver that runs one partition.
#[async_trait]
pub trait TestDriverFactory: Send + Sync {
    async fn create_driver(&self, progress: &ProgressMonitor) -> Result<Box<dyn TestDriver>>;

    /// Release resources shared by every driver this factory created. Called
    /// once per run after the last partition, even if a partition failed.
    async fn release(&self, _progress: &ProgressMonitor) -> Result<()> {
        Ok(())
    }
}

/// One unit of dispatch: a driver factory and its slice of the package.
#[derive(Clone)]
pub struct Partition {
    factory: Arc<dyn TestDriverFactory>,
    package: TestPackageConfig,
}

impl Partition {
    pub fn new(factory: Arc<dyn TestDriverFactory>, package: TestPackageConfig) -> Self {
        Self { factory, package }
    }

    pub fn factory(&self) -> &Arc<dyn TestDriverFactory> {
        &self.factory
    }

    pub fn package(&self) -> &TestPackageConfig {
        &self.package
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("package", &self.package)
            .finish_non_exhaustive()
    }
}

/// Decides how a package is split into partitions.
pub trait PartitionStrategy: Send + Sync {
    /// Pure function of the package and runner options. An error here is
    /// fatal for the whole run.
    fn compute_partitions(&self, package: &TestPackageConfig, env: &DriverEnv) -> Result<Vec<Partition>>;
}

pub struct AggregateDriverCore<S> {
    strategy: S,
}

pub type AggregateTestDriver<S> = BaseDriver<AggregateDriverCore<S>>;

impl<S: PartitionStrategy> BaseDriver<AggregateDriverCore<S>> {
    pub fn aggregate(strategy: S) -> Self {
        BaseDriver::new(AggregateDriverCore { strategy })
    }

    pub fn strategy(&self) -> &S {
        &self.core().strategy
    }
}

/// What each partition is asked to do.
#[derive(Clone, Copy)]
enum Operation<'a> {
    Explore,
    Run {
        execution: &'a TestExecutionOptions,
        listener: &'a dyn ExecutionListener,
    },
}

impl Operation<'_> {
    fn name(&self) -> &'static str {
        match self {
            Operation::Explore => "explore",
            Operation::Run { .. } => "run",
        }
    }
}

/// Outcome of driving a single partition.
struct PartitionOutcome {
    result: Result<()>,
    teardown: Result<()>,
}

impl<S: PartitionStrategy> AggregateDriverCore<S> {
    async fn orchestrate(
        &self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        operation: Operation<'_>,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, operation.name());
        self.orchestrate_in_span(
            &run_id,
            env,
            package,
            exploration,
            exploration_listener,
            operation,
            progress,
        )
        .instrument(span)
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn orchestrate_in_span(
        &self,
        run_id: &str,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        operation: Operation<'_>,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let started = Instant::now();
        progress.set_status("Partitioning tests.");
        let partitions = self.strategy.compute_partitions(package, env)?;
        obs::emit_partitioning_finished(run_id, package.assembly_files.len(), partitions.len());
        if partitions.is_empty() {
            return Ok(());
        }

        let merging = match operation {
            Operation::Run { listener, .. } => Some(MergingListener::new(listener)),
            Operation::Explore => None,
        };
        progress.begin_task("Running test partitions.", partitions.len() as f64);

        let mut outcome = Ok(());
        let mut partitions_run = 0;
        let mut teardown_failures = 0;
        for (index, partition) in partitions.iter().enumerate() {
            if progress.is_canceled() {
                info!(run_id = %run_id, remaining = partitions.len() - index, "run canceled; skipping remaining partitions");
                break;
            }

            obs::emit_partition_started(
                run_id,
                index,
                partitions.len(),
                partition.package.assembly_files.len(),
            );
            let sub_progress = progress.sub_monitor(1.0);
            let partition_op = match (operation, &merging) {
                (Operation::Run { execution, .. }, Some(merging)) => Operation::Run {
                    execution,
                    listener: merging as &dyn ExecutionListener,
                },
                (op, _) => op,
            };
            let PartitionOutcome { result, teardown } = drive_partition(
                env,
                partition,
                exploration,
                exploration_listener,
                partition_op,
                &sub_progress,
            )
            .await;
            sub_progress.done();
            partitions_run += 1;
            obs::emit_partition_finished(run_id, index, result.is_ok());

            if let Err(err) = teardown {
                teardown_failures += 1;
                let first = teardown_failures == 1;
                obs::emit_teardown_failed(run_id, index, first, &err);
                if first {
                    env.logger.warning(
                        &format!("Failed to dispose the test driver of partition {index}; this is the first teardown failure of the run."),
                        Some(&format!("{err:?}")),
                    );
                } else {
                    env.logger.warning(
                        &format!("Failed to dispose the test driver of partition {index}."),
                        Some(&err.to_string()),
                    );
                }
            }

            if let Err(err) = result {
                outcome = Err(err);
                break;
            }
        }

        release_factories(env, &partitions, progress).await;
        if let Some(merging) = &merging {
            merging.finish();
        }
        progress.done();

        obs::emit_orchestration_finished(
            run_id,
            started.elapsed().as_millis() as u64,
            partitions_run,
            teardown_failures,
            outcome.is_ok(),
        );
        outcome
    }
}

/// Create, initialize, use, and always dispose one partition's driver.
async fn drive_partition(
    env: &DriverEnv,
    partition: &Partition,
    exploration: &TestExplorationOptions,
    exploration_listener: &dyn ExplorationListener,
    operation: Operation<'_>,
    progress: &ProgressMonitor,
) -> PartitionOutcome {
    let mut driver = match partition.factory.create_driver(progress).await {
        Ok(driver) => driver,
        Err(err) => return err.into(),
    };

    let result = match driver.initialize(&env.options, env.logger.clone()).await {
        Err(err) => Err(err),
        Ok(()) => match operation {
            Operation::Explore => {
                driver
                    .explore(&partition.package, exploration, exploration_listener, progress)
                    .await
            }
            Operation::Run {
                execution,
                listener,
            } => {
                driver
                    .run(
                        &partition.package,
                        exploration,
                        exploration_listener,
                        execution,
                        listener,
                        progress,
                    )
                    .await
            }
        },
    };

    let teardown = driver.dispose().await;
    PartitionOutcome { result, teardown }
}

/// Release every distinct factory once. Failures are logged, not returned.
async fn release_factories(env: &DriverEnv, partitions: &[Partition], progress: &ProgressMonitor) {
    let mut released: Vec<&Arc<dyn TestDriverFactory>> = Vec::new();
    for partition in partitions {
        if released.iter().any(|f| Arc::ptr_eq(f, &partition.factory)) {
            continue;
        }
        released.push(&partition.factory);
        if let Err(err) = partition.factory.release(progress).await {
            env.logger
                .warning("Failed to release partition resources.", Some(&err.to_string()));
        }
    }
}

#[async_trait]
impl<S: PartitionStrategy> DriverCore for AggregateDriverCore<S> {
    async fn explore_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        self.orchestrate(
            env,
            package,
            exploration,
            exploration_listener,
            Operation::Explore,
            progress,
        )
        .await
    }

    async fn run_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: &TestExecutionOptions,
        execution_listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        self.orchestrate(
            env,
            package,
            exploration,
            exploration_listener,
            Operation::Run {
                execution,
                listener: execution_listener,
            },
            progress,
        )
        .await
    }
}

/// Splits a package into one partition per assembly, all sharing `factory`.
pub struct PerAssemblyStrategy {
    factory: Arc<dyn TestDriverFactory>,
}

impl PerAssemblyStrategy {
    pub fn new(factory: Arc<dyn TestDriverFactory>) -> Self {
        Self { factory }
    }
}

impl PartitionStrategy for PerAssemblyStrategy {
    fn compute_partitions(&self, package: &TestPackageConfig, _env: &DriverEnv) -> Result<Vec<Partition>> {
        Ok(package
            .assembly_files
            .iter()
            .map(|assembly| {
                let mut slice = package.clone();
                slice.assembly_files = vec![assembly.clone()];
                Partition::new(self.factory.clone(), slice)
            })
            .collect())
    }
}

impl From<DriverError> for PartitionOutcome {
    fn from(err: DriverError) -> Self {
        PartitionOutcome {
            result: Err(err),
            teardown: Ok(()),
        }
    }
}
