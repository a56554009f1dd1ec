//! The harness seam: framework-specific test loading, discovery, and execution.
//!
//! A harness is supplied from outside the orchestrator. It is driven strictly
//! as `load → explore → [run] → unload` by the local driver, which guarantees
//! `unload` even when an earlier step fails.

use async_trait::async_trait;
use tessera_model::{
    ExecutionListener, ExplorationListener, ProgressMonitor, TestExecutionOptions,
    TestExplorationOptions, TestPackageConfig,
};

use crate::local::HarnessContext;

/// Framework-specific test loading and execution.
#[async_trait]
pub trait TestHarness: Send {
    /// Load the package's assemblies into the harness.
    async fn load(
        &mut self,
        package: &TestPackageConfig,
        context: &HarnessContext,
        progress: &ProgressMonitor,
    ) -> anyhow::Result<()>;

    /// Discover tests in the loaded assemblies.
    async fn explore(
        &mut self,
        options: &TestExplorationOptions,
        listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> anyhow::Result<()>;

    /// Execute the explored tests.
    async fn run(
        &mut self,
        options: &TestExecutionOptions,
        listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> anyhow::Result<()>;

    async fn unload(&mut self, progress: &ProgressMonitor) -> anyhow::Result<()>;
}

/// Produces a fresh harness for each driver operation.
pub trait TestHarnessFactory: Send + Sync {
    fn create_harness(&self) -> Box<dyn TestHarness>;
}

impl<F> TestHarnessFactory for F
where
    F: Fn() -> Box<dyn TestHarness> + Send + Sync,
{
    fn create_harness(&self) -> Box<dyn TestHarness> {
        self()
    }
}
