pub mod catalog;
pub mod compression;
pub mod config;
pub mod content_store;
pub mod context;
pub mod control;
pub mod engine;
pub mod error;
pub mod events;
pub mod hasher;
pub mod integrity;
pub mod interceptor;
pub mod location;
pub mod platform;
pub mod restore;
pub mod retention;
pub mod runner;
pub mod space;
pub mod stream;

pub use catalog::Catalog;
pub use compression::Compression;
pub use config::{load_configuration, DedupMode, EngineConfig, LocationConfig};
pub use context::EngineContext;
pub use control::{CancelToken, RunControl};
pub use engine::{BackupEngine, RunHandle};
pub use error::{Error, Result};
pub use events::{EventBus, Issue, RunEvent, RunOutcome, RunState, Severity};
pub use integrity::{IntegrityChecker, IntegrityReport};
pub use restore::{RestoreOptions, RestoreReport, Restorer};
pub use retention::{RetentionManager, RetentionReport};
pub use runner::{RunReport, SnapshotRunner};
