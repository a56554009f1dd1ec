//! In-process hosts: drivers run as tokio tasks behind a channel boundary.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tessera_model::HostSetup;
use tokio::task::JoinHandle;

use super::{Host, HostFactory};
use crate::boundary::{channel_pair, serve_driver, DriverClient};
use crate::error::HostError;
use crate::harness::TestHarnessFactory;
use crate::local::{EnvironmentFactory, LocalTestDriver};
use crate::obs;

#[derive(Default)]
struct TaskHostState {
    shut_down: bool,
    tasks: Vec<JoinHandle<()>>,
    contexts: Vec<Arc<TaskHost>>,
}

/// A host whose drivers are served on tasks of the current runtime.
pub struct TaskHost {
    id: String,
    setup: HostSetup,
    harness_factory: Arc<dyn TestHarnessFactory>,
    environment: Arc<dyn EnvironmentFactory>,
    state: Mutex<TaskHostState>,
}

impl TaskHost {
    pub fn new(
        setup: HostSetup,
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> Self {
        Self::with_id(
            format!("task-{}", uuid::Uuid::new_v4()),
            setup,
            harness_factory,
            environment,
        )
    }

    fn with_id(
        id: String,
        setup: HostSetup,
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> Self {
        Self {
            id,
            setup,
            harness_factory,
            environment,
            state: Mutex::new(TaskHostState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TaskHostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of nested contexts created so far.
    pub fn context_count(&self) -> usize {
        self.state().contexts.len()
    }
}

#[async_trait]
impl Host for TaskHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn setup(&self) -> &HostSetup {
        &self.setup
    }

    async fn create_driver(&self) -> Result<DriverClient, HostError> {
        let mut state = self.state();
        if state.shut_down {
            return Err(HostError::ShutDown(self.id.clone()));
        }
        let (client, server) = channel_pair();
        let driver = LocalTestDriver::local_in_host(
            self.harness_factory.clone(),
            self.environment.clone(),
            self.setup.clone(),
        );
        state
            .tasks
            .push(tokio::spawn(serve_driver(Box::new(driver), server)));
        Ok(client)
    }

    async fn create_isolated_context(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError> {
        let mut state = self.state();
        if state.shut_down {
            return Err(HostError::ShutDown(self.id.clone()));
        }
        let context = Arc::new(TaskHost::with_id(
            format!("{}/ctx-{}", self.id, state.contexts.len() + 1),
            setup.clone(),
            self.harness_factory.clone(),
            self.environment.clone(),
        ));
        obs::emit_host_created(&context.id, &setup.short_digest(), "context");
        state.contexts.push(context.clone());
        Ok(context)
    }

    async fn shutdown(&self) -> Result<(), HostError> {
        let (tasks, contexts) = {
            let mut state = self.state();
            if state.shut_down {
                return Ok(());
            }
            state.shut_down = true;
            (std::mem::take(&mut state.tasks), state.contexts.clone())
        };
        for context in contexts {
            context.shutdown().await?;
        }
        for task in tasks {
            task.abort();
        }
        obs::emit_host_shutdown(&self.id);
        Ok(())
    }

    fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }
}

/// Creates [`TaskHost`]s that build local drivers from a harness factory.
#[derive(Clone)]
pub struct TaskHostFactory {
    harness_factory: Arc<dyn TestHarnessFactory>,
    environment: Arc<dyn EnvironmentFactory>,
}

impl TaskHostFactory {
    pub fn new(
        harness_factory: Arc<dyn TestHarnessFactory>,
        environment: Arc<dyn EnvironmentFactory>,
    ) -> Self {
        Self {
            harness_factory,
            environment,
        }
    }
}

#[async_trait]
impl HostFactory for TaskHostFactory {
    async fn create_host(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError> {
        let host = TaskHost::new(
            setup.clone(),
            self.harness_factory.clone(),
            self.environment.clone(),
        );
        obs::emit_host_created(&host.id, &setup.short_digest(), "task");
        Ok(Arc::new(host))
    }
}
