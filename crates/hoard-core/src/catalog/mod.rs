pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{Backup, CatalogStats, Entry, EntryKind, FileContent, NewEntry};
pub use sqlite::{Catalog, SCHEMA_VERSION};
