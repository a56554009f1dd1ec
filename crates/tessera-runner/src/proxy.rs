//! The proxy driver: forwards the driver contract across a host boundary.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use tessera_model::{
    ExecutionListener, ExplorationListener, Logger, ProgressMonitor, TestExecutionOptions,
    TestExplorationOptions, TestPackageConfig, TracingLogger,
};

use crate::boundary::{CallSinks, DriverClient, DriverRequest};
use crate::driver::{BaseDriver, DriverCore, DriverEnv};
use crate::error::{DriverError, HostError, Result};

/// Runs once the remote driver has been disposed, typically to release the
/// host it lived in.
pub type DisposedHook = Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), HostError>> + Send>;

pub struct ProxyDriverCore {
    client: DriverClient,
    on_disposed: Vec<DisposedHook>,
}

pub type ProxyTestDriver = BaseDriver<ProxyDriverCore>;

impl BaseDriver<ProxyDriverCore> {
    pub fn proxy(client: DriverClient) -> Self {
        BaseDriver::new(ProxyDriverCore {
            client,
            on_disposed: Vec::new(),
        })
    }

    /// Register a hook run after the remote driver is disposed.
    pub fn on_disposed<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), HostError>> + Send + 'static,
    {
        let hook: DisposedHook =
            Box::new(move || -> BoxFuture<'static, std::result::Result<(), HostError>> {
                Box::pin(hook())
            });
        self.core_mut().on_disposed.push(hook);
        self
    }
}

#[async_trait]
impl DriverCore for ProxyDriverCore {
    async fn initialize_core(&mut self, env: &DriverEnv) -> Result<()> {
        self.client
            .call(
                DriverRequest::Initialize {
                    options: env.options.clone(),
                },
                CallSinks::logging(env.logger.as_ref()),
            )
            .await
    }

    async fn explore_core(
        &mut self,
        env: &DriverEnv,
        package: &TestPackageConfig,
        exploration: &TestExplorationOptions,
        exploration_listener: &dyn ExplorationListener,
        progress: &ProgressMonitor,
    ) -> Result<()> {
        let request = DriverRequest::Explore {
            package: package.clone(),
            exploration: exploration.clone(),
        };
        let sinks = CallSinks {
            logger: env.logger.as_ref(),
            exploration: Some(exploration_listener),
            execution: None,
            progress: Some(progress),
        };
        self.client.call(request, sinks).await
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
        let request = DriverRequest::Run {
            package: package.clone(),
            exploration: exploration.clone(),
            execution: execution.clone(),
        };
        let sinks = CallSinks {
            logger: env.logger.as_ref(),
            exploration: Some(exploration_listener),
            execution: Some(execution_listener),
            progress: Some(progress),
        };
        self.client.call(request, sinks).await
    }

    /// Dispose the remote driver, then run the disposed hooks even if that
    /// failed.
    async fn dispose_core(&mut self, env: Option<&DriverEnv>) -> Result<()> {
        let fallback = TracingLogger;
        let logger = env.map_or(&fallback as &dyn Logger, |e| e.logger.as_ref());

        let mut outcome = self
            .client
            .call(DriverRequest::Dispose, CallSinks::logging(logger))
            .await;

        for hook in self.on_disposed.drain(..) {
            if let Err(err) = hook().await {
                if outcome.is_ok() {
                    outcome = Err(DriverError::Host(err));
                } else {
                    logger.warning("failed to release host after dispose", Some(&err.to_string()));
                }
            }
        }
        outcome
    }
}
