//! Demonstration driver loops.
//!
//! One loop per launcher role: the initializer idles and logs the
//! current value, the reader loops token-guarded reads, the writer
//! loops incrementing writes. All loops stop on shutdown.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use replicell_common::CellValue;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::replica::ReplicaNode;

/// Launcher role, second positional CLI argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Creates the object with integer 0 and idles.
    Initializer,
    /// Joins and loops reading.
    Reader,
    /// Joins and loops incrementing writes.
    Writer,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializer" => Ok(Self::Initializer),
            "reader" => Ok(Self::Reader),
            "writer" => Ok(Self::Writer),
            other => Err(format!(
                "unknown role '{other}', expected initializer, reader or writer"
            )),
        }
    }
}

/// Idle and periodically log the current value.
pub async fn run_initializer(
    node: Arc<ReplicaNode>,
    config: &DriverConfig,
    shutdown: CancellationToken,
) {
    let interval = Duration::from_secs(config.status_interval_secs);
    loop {
        info!(node_id = %node.id(), value = %node.current_value(), "current value");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Loop token-guarded reads with a fixed delay.
pub async fn run_reader(
    node: Arc<ReplicaNode>,
    config: &DriverConfig,
    shutdown: CancellationToken,
) {
    let interval = Duration::from_secs(config.read_interval_secs);
    loop {
        match node.read().await {
            Ok(value) => info!(node_id = %node.id(), value = %value, "read value"),
            Err(e) => warn!(node_id = %node.id(), error = %e, "read failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}

/// Loop incrementing-by-N writes with a fixed delay. The written value
/// is a local counter, not a read-modify-write of the cell.
pub async fn run_writer(
    node: Arc<ReplicaNode>,
    config: &DriverConfig,
    shutdown: CancellationToken,
) {
    let interval = Duration::from_secs(config.write_interval_secs);
    let mut counter: i64 = 0;
    loop {
        counter += config.write_increment;
        let value: CellValue = json!(counter);
        info!(node_id = %node.id(), value = %value, "attempting write");
        match node.write(value).await {
            Ok(()) => info!(node_id = %node.id(), value = counter, "write committed"),
            Err(e) => warn!(node_id = %node.id(), error = %e, "write failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }
    }
}
