//! Isolated execution hosts.
//!
//! A [`Host`] is an execution context built from a [`HostSetup`]: either an
//! in-process task host ([`task`]) or a child process spoken to over a JSON
//! lines wire ([`process`]). Hosts hand out [`DriverClient`]s bound to fresh
//! drivers living inside them, and can nest lightweight isolated contexts.

pub mod process;
pub mod task;

use async_trait::async_trait;
use std::sync::Arc;
use tessera_model::HostSetup;

use crate::boundary::DriverClient;
use crate::error::HostError;

pub use process::{ConnectionHost, ProcessHostFactory};
pub use task::{TaskHost, TaskHostFactory};

/// A live isolated execution context.
#[async_trait]
pub trait Host: Send + Sync {
    fn id(&self) -> &str;

    fn setup(&self) -> &HostSetup;

    /// Create a driver inside this host and connect a client to it.
    async fn create_driver(&self) -> Result<DriverClient, HostError>;

    /// Create a nested lightweight context that shares this host's process.
    async fn create_isolated_context(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError>;

    /// Tear the host down, including nested contexts. Idempotent.
    async fn shutdown(&self) -> Result<(), HostError>;

    fn is_shut_down(&self) -> bool;
}

/// Creates hosts from host setups.
#[async_trait]
pub trait HostFactory: Send + Sync {
    async fn create_host(&self, setup: &HostSetup) -> Result<Arc<dyn Host>, HostError>;
}
