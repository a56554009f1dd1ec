//! The driver contract and the base lifecycle wrapper shared by every driver.
//!
//! [`TestDriver`] is the only surface callers see. Concrete drivers implement
//! [`DriverCore`] (the unchecked hooks) and are wrapped in [`BaseDriver`],
//! which validates arguments, tracks the initialize → dispose lifecycle, and
//! owns the logger and options for that lifetime.

use async_trait::async_trait;
use std::sync::Arc;
use tessera_model::{
    ExecutionListener, ExplorationListener, Logger, ProgressMonitor, TestExecutionOptions,
    TestExplorationOptions, TestPackageConfig, TestRunnerOptions,
};

use crate::error::{DriverError, Result};

/// Uniform capability exposed by every execution unit.
///
/// `explore` and `run` require a prior `initialize`; every call after
/// `dispose` fails with [`DriverError::Disposed`]. All observable effects go
/// through the listeners and the progress monitor.
#[async_trait]
pub trait TestDriver: Send {
    async fn initialize(&mut self, options: &TestRunnerOptions, logger: Arc<dyn Logger>) -> Result<()>;

    /// Discover tests without executing them.
    async fn explore(
        &mut self,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()>;

    /// Discover and execute tests.
    async fn run(
        &mut self,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: &TestExecutionOptions,
        execution_listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> Result<()>;

    async fn dispose(&mut self) -> Result<()>;
}

/// Resources owned by a driver between `initialize` and `dispose`.
#[derive(Clone)]
pub struct DriverEnv {
    pub options: TestRunnerOptions,
    pub logger: Arc<dyn Logger>,
}

impl std::fmt::Debug for DriverEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverEnv")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Unchecked implementation hooks behind [`BaseDriver`].
///
/// Hooks are only invoked once arguments are validated and the lifecycle
/// state allows the call.
#[async_trait]
pub trait DriverCore: Send {
    async fn initialize_core(&mut self, _env: &DriverEnv) -> Result<()> {
        Ok(())
    }

    async fn explore_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn run_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: &TestExecutionOptions,
        execution_listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> Result<()>;

    /// Release the core's resources. `env` is `None` if the driver was never
    /// initialized.
    async fn dispose_core(&mut self, _env: Option<&DriverEnv>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum Lifecycle {
    Created,
    Initialized(DriverEnv),
    Disposed,
}

/// Validating lifecycle wrapper around a [`DriverCore`].
pub struct BaseDriver<C> {
    core: C,
    lifecycle: Lifecycle,
}

impl<C: DriverCore> BaseDriver<C> {
    pub fn new(core: C) -> Self {
        Self {
            core,
            lifecycle: Lifecycle::Created,
        }
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub(crate) fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Initialized(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Disposed)
    }

    /// The logger supplied to `initialize`, if the driver is live.
    pub fn logger(&self) -> Option<Arc<dyn Logger>> {
        match &self.lifecycle {
            Lifecycle::Initialized(env) => Some(env.logger.clone()),
            _ => None,
        }
    }
}

fn live_env(lifecycle: &Lifecycle) -> Result<&DriverEnv> {
    match lifecycle {
        Lifecycle::Initialized(env) => Ok(env),
        Lifecycle::Created => Err(DriverError::NotInitialized),
        Lifecycle::Disposed => Err(DriverError::Disposed),
    }
}

fn validate_package(package: &TestPackageConfig) -> Result<()> {
    package
        .validate()
        .map_err(|e| DriverError::InvalidArgument(e.to_string()))
}

#[async_trait]
impl<C: DriverCore> TestDriver for BaseDriver<C> {
    async fn initialize(&mut self, options: &TestRunnerOptions, logger: Arc<dyn Logger>) -> Result<()> {
        if self.is_disposed() {
            return Err(DriverError::Disposed);
        }
        let env = DriverEnv {
            options: options.clone(),
            logger,
        };
        self.core.initialize_core(&env).await?;
        self.lifecycle = Lifecycle::Initialized(env);
        Ok(())
    }

    async fn explore(
        &mut self,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let env = live_env(&self.lifecycle)?;
        validate_package(package)?;
        self.core
            .explore_core(env, package, exploration, exploration_listener, progress)
            .await
    }

    async fn run(
        &mut self,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        execution: &TestExecutionOptions,
        execution_listener: &dyn ExecutionListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let env = live_env(&self.lifecycle)?;
        validate_package(package)?;
        self.core
            .run_core(
                env,
                package,
                exploration,
                exploration_listener,
                execution,
                execution_listener,
                progress,
            )
            .await
    }

    async fn dispose(&mut self) -> Result<()> {
        let env = match std::mem::replace(&mut self.lifecycle, Lifecycle::Disposed) {
            Lifecycle::Disposed => return Ok(()),
            Lifecycle::Created => None,
            Lifecycle::Initialized(env) => Some(env),
        };
        self.core.dispose_core(env.as_ref()).await
    }
}
