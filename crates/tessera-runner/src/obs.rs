//! Structured observability hooks for orchestration lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for key lifecycle events: partitioning, partition
//!   start/finish, teardown failures, host creation/shutdown, run finish
//!
//! Events are emitted at `info!` level (teardown failures at `warn!`).
//! For JSON output, set `TESSERA_LOG_FORMAT=json`.

use tracing::{info, warn};

/// Span tagging every event of one orchestrated run with its `run_id`.
///
/// Attach it with `tracing::Instrument` so it follows the run across awaits.
pub fn run_span(run_id: &str, operation: &str) -> tracing::Span {
    tracing::info_span!("tessera.run", run_id = %run_id, operation = %operation)
}

/// Emit event: the package was split into partitions.
pub fn emit_partitioning_finished(run_id: &str, assemblies: usize, partitions: usize) {
    info!(
        event = "run.partitioned",
        run_id = %run_id,
        assemblies = assemblies,
        partitions = partitions,
    );
}

pub fn emit_partition_started(run_id: &str, index: usize, total: usize, assemblies: usize) {
    info!(
        event = "partition.started",
        run_id = %run_id,
        index = index,
        total = total,
        assemblies = assemblies,
    );
}

pub fn emit_partition_finished(run_id: &str, index: usize, success: bool) {
    info!(event = "partition.finished", run_id = %run_id, index = index, success = success);
}

/// Emit event: disposing a partition's driver failed (warning level).
pub fn emit_teardown_failed(run_id: &str, index: usize, first: bool, error: &dyn std::fmt::Display) {
    warn!(
        event = "partition.teardown_failed",
        run_id = %run_id,
        index = index,
        first = first,
        error = %error,
    );
}

pub fn emit_host_created(host_id: &str, setup_digest: &str, kind: &str) {
    info!(event = "host.created", host_id = %host_id, setup = %setup_digest, kind = %kind);
}

pub fn emit_host_shutdown(host_id: &str) {
    info!(event = "host.shutdown", host_id = %host_id);
}

/// Emit event: orchestration finished with duration, partition counts, and success.
pub fn emit_orchestration_finished(
    run_id: &str,
    duration_ms: u64,
    partitions_run: usize,
    teardown_failures: usize,
    success: bool,
) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        partitions_run = partitions_run,
        teardown_failures = teardown_failures,
        success = success,
    );
}
