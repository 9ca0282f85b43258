use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage interceptor '{name}' failed: {reason}")]
    Interceptor { name: String, reason: String },

    #[error("Insufficient disk space: {available_percent:.1}% free, {required_percent:.1}% required")]
    InsufficientSpace {
        available_percent: f64,
        required_percent: f64,
    },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Invalid target {}: {reason}", path.display())]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Catalog failures end a run; everything else is handled at the node that raised it.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Interceptor { .. } | Error::InsufficientSpace { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
