//! Child-process hosts reached over a JSON-lines wire on stdin/stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tessera_model::HostSetup;
use tokio::process::{Child, Command};
use tracing::warn;
use uuid::Uuid;

use super::{Host, HostFactory};
use crate::boundary::DriverClient;
use crate::error::HostError;
use crate::obs;
use crate::wire::Connection;

/// Environment variable carrying the host setup (JSON) into a child host.
pub const HOST_SETUP_ENV: &str = "TESSERA_HOST_SETUP";

const EXIT_GRACE: Duration = Duration::from_secs(5);

/// A host reached through a wire [`Connection`].
///
/// The root host of a child process owns the process; nested contexts share
/// the connection and leave the process alone on shutdown. Every channel is
/// opened with the setup of the host or context that created it, and is
/// closed when that host or context shuts down.
pub struct ConnectionHost {
    id: String,
    setup: HostSetup,
    connection: Arc<Connection>,
    child: Option<tokio::sync::Mutex<Child>>,
    channels: Mutex<Vec<Uuid>>,
    shut_down: AtomicBool,
    context_count: AtomicUsize,
}

impl ConnectionHost {
    /// A host over an existing connection that owns no process.
    pub fn new(setup: HostSetup, connection: Arc<Connection>) -> Self {
        Self::build(format!("wire-{}", Uuid::new_v4()), setup, connection, None)
    }

    fn build(id: String, setup: HostSetup, connection: Arc<Connection>, child: Option<Child>) -> Self {
        Self {
            id,
            setup,
            connection,
            child: child.map(tokio::sync::Mutex::new),
            channels: Mutex::default(),
            shut_down: AtomicBool::new(false),
            context_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Host for ConnectionHost {
    fn id(&self) -> &str {
        &self.id
    }

    fn setup(&self) -> &HostSetup {
        &self.setup
    }

    async fn create_driver(&self) -> Result<DriverClient, HostError> {
        if self.is_shut_down() {
            return Err(HostError::ShutDown(self.id.clone()));
        }
        let (channel, client) = self.connection.open_channel(Some(self.setup.clone()))?;
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(channel);
        Ok(client)
    }

    async fn create_isolated_context(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError> {
        if self.is_shut_down() {
            return Err(HostError::ShutDown(self.id.clone()));
        }
        let ordinal = self.context_count.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}/ctx-{}", self.id, ordinal);
        obs::emit_host_created(&id, &setup.short_digest(), "context");
        Ok(Arc::new(ConnectionHost::build(
            id,
            setup.clone(),
            self.connection.clone(),
            None,
        )))
    }

    async fn shutdown(&self) -> Result<(), HostError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let channels = std::mem::take(
            &mut *self.channels.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for channel in channels {
            self.connection.close_channel(channel);
        }
        if let Some(child) = &self.child {
            self.connection.close();
            let mut child = child.lock().await;
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    if !status.success() {
                        warn!(host_id = %self.id, status = %status, "host process exited with failure");
                    }
                }
                Err(_) => {
                    warn!(host_id = %self.id, "host process did not exit; killing it");
                    child.kill().await?;
                }
            }
        }
        obs::emit_host_shutdown(&self.id);
        Ok(())
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

/// Launches a host program per host and talks to it over stdin/stdout.
///
/// The child runs in the setup's working directory with the setup's
/// properties as environment variables and the whole setup as JSON in
/// [`HOST_SETUP_ENV`]. It is expected to call
/// [`serve_stdio`](crate::wire::serve_stdio).
#[derive(Debug, Clone)]
pub struct ProcessHostFactory {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessHostFactory {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl HostFactory for ProcessHostFactory {
    async fn create_host(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&setup.properties)
            .env(HOST_SETUP_ENV, serde_json::to_string(setup)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &setup.working_directory {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            HostError::Creation(format!("failed to launch {}: {err}", self.program.display()))
        })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(HostError::Creation("host process has no stdio pipes".to_string()));
        };

        let connection = Arc::new(Connection::new(stdout, stdin));
        let id = format!("process-{}", child.id().unwrap_or_default());
        obs::emit_host_created(&id, &setup.short_digest(), "process");
        Ok(Arc::new(ConnectionHost::build(
            id,
            setup.clone(),
            connection,
            Some(child),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_program_is_creation_error() {
        let factory = ProcessHostFactory::new("/definitely/not/a/host/program");
        let err = match factory.create_host(&HostSetup::new()).await {
            Err(err) => err,
            Ok(_) => panic!("expected host creation to fail"),
        };
        assert!(matches!(err, HostError::Creation(_)));
    }
}
