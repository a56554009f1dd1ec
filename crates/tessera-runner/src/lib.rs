//! Tessera Runner
//!
//! The driver hierarchy that turns a test package into a test run:
//! - BaseDriver: lifecycle and argument checks shared by every driver
//! - LocalTestDriver: loads a harness in the current process
//! - ProxyTestDriver: forwards calls to a driver behind a host boundary
//! - AggregateTestDriver: runs partitions sequentially and merges their results
//! - HostedTestDriver: partitions by test domain and places drivers in hosts

pub mod aggregate;
pub mod boundary;
pub mod driver;
pub mod error;
pub mod harness;
pub mod host;
pub mod hosted;
pub mod inspect;
pub mod local;
pub mod merge;
pub mod obs;
pub mod proxy;
pub mod settings;
pub mod telemetry;
pub mod wire;

pub use aggregate::{
    AggregateDriverCore, AggregateTestDriver, Partition, PartitionStrategy, PerAssemblyStrategy,
    TestDriverFactory,
};
pub use boundary::{channel_pair, serve_driver, DriverClient, DriverRequest, HostMessage};
pub use driver::{BaseDriver, DriverCore, DriverEnv, TestDriver};
pub use error::{DriverError, HostError, RemoteError, RemoteErrorKind, Result};
pub use harness::{TestHarness, TestHarnessFactory};
pub use host::{Host, HostFactory, ProcessHostFactory, TaskHost, TaskHostFactory};
pub use hosted::{
    reconcile_architecture, reconcile_runtime_versions, HostConfigurer, HostedPartitioner,
    HostedTestDriver,
};
pub use inspect::{AssemblyInspector, AssemblyTraits, FileSystem, MapAssemblyInspector};
pub use local::{EnvironmentFactory, HarnessContext, LocalEnvironmentFactory, LocalTestDriver};
pub use merge::MergingListener;
pub use proxy::ProxyTestDriver;
pub use settings::RunnerSettings;
pub use telemetry::init_tracing;
pub use wire::{serve_connection, serve_stdio, Connection};

/// Tessera runner version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
