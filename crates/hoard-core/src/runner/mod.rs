//! Backup runs: traversal, deduplication and the run state machine.

pub mod dedup;
pub mod snapshot;
pub mod walk;

pub use dedup::{ContentResolver, Resolution};
pub use snapshot::{write_catalog_snapshot, RunReport, RunStats, SnapshotRunner};
pub use walk::{Estimate, IgnoreSet};
