//! Output module for everything a run hands to the outside world
//!
//! This module handles:
//! - Writing per-run JSON snapshots of raw fetch results
//! - Notifying operators of stage outcomes
//! - Recording per-request bookkeeping rows
//! - Run and registry statistics

mod notifier;
mod snapshot;
pub mod stats;
mod traits;

pub use notifier::{LogNotifier, MemoryNotifier};
pub use snapshot::{directory_snapshot_filename, snapshot_filename, JsonSnapshotWriter};
pub use stats::{
    log_run_statistics, print_registry_statistics, RegistryStatistics, RunStatistics,
};
pub use traits::{
    ApiResponseRecord, Notifier, OutputError, OutputResult, ResponseRecorder, RunOutcome,
    SnapshotWriter, Stage,
};
