use crate::compression::Compression;
use chrono::Weekday;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the runner decides that a file's content is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMode {
    /// Hash every file and look the digest up across all backups.
    #[default]
    Checksum,
    /// Reuse the previous backup's content when modification time and length match.
    /// Cheaper, but a rewrite that preserves both goes unnoticed.
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// A bare path or a `scheme://` URI understood by the location registry.
    pub uri: String,
    /// Overrides the name recorded for the location's root entry.
    #[serde(default)]
    pub name: Option<String>,
}

impl LocationConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: None,
        }
    }

    pub fn named(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: Some(name.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default = "default_keep_hourlies_days")]
    pub keep_hourlies_days: u32,
    #[serde(default = "default_keep_dailies_days")]
    pub keep_dailies_days: u32,
    #[serde(default = "default_week_start")]
    pub week_start: Weekday,
    /// Eviction starts once used space exceeds this share of the volume.
    #[serde(default)]
    pub max_disk_fill_rate_percent: Option<u8>,
    #[serde(default = "default_database_backups_to_keep")]
    pub database_backups_to_keep: usize,
    #[serde(default = "default_consolidation_batch_size")]
    pub consolidation_batch_size: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: None,
            keep_hourlies_days: default_keep_hourlies_days(),
            keep_dailies_days: default_keep_dailies_days(),
            week_start: default_week_start(),
            max_disk_fill_rate_percent: None,
            database_backups_to_keep: default_database_backups_to_keep(),
            consolidation_batch_size: default_consolidation_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityConfig {
    #[serde(default = "default_true")]
    pub stop_at_first_mismatch: bool,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self {
            stop_at_first_mismatch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default)]
    pub dedup_mode: DedupMode,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub compression_level: Option<i32>,
    #[serde(default = "default_disk_check_interval")]
    pub disk_check_interval: usize,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub integrity: IntegrityConfig,
}

impl EngineConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            locations: Vec::new(),
            ignore_patterns: Vec::new(),
            dedup_mode: DedupMode::default(),
            compression: Compression::default(),
            compression_level: None,
            disk_check_interval: default_disk_check_interval(),
            retention: RetentionConfig::default(),
            integrity: IntegrityConfig::default(),
        }
    }

    pub fn with_location(mut self, location: LocationConfig) -> Self {
        self.locations.push(location);
        self
    }
}

fn default_keep_hourlies_days() -> u32 {
    7
}

fn default_keep_dailies_days() -> u32 {
    30
}

fn default_week_start() -> Weekday {
    Weekday::Mon
}

fn default_database_backups_to_keep() -> usize {
    20
}

fn default_consolidation_batch_size() -> usize {
    500
}

fn default_disk_check_interval() -> usize {
    50
}

fn default_true() -> bool {
    true
}

/// Load `Hoard.toml` (or the given file) and overlay `HOARD__*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let file_source = match path {
        Some(path) => ConfigFile::from(path).required(true),
        None => ConfigFile::with_name("Hoard").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix("HOARD").separator("__"))
        .build()?;
    builder.try_deserialize::<EngineConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_match_retention_windows() {
        let config = EngineConfig::new("/backups");
        assert_eq!(config.retention.keep_hourlies_days, 7);
        assert_eq!(config.retention.keep_dailies_days, 30);
        assert_eq!(config.retention.database_backups_to_keep, 20);
        assert_eq!(config.retention.week_start, Weekday::Mon);
        assert_eq!(config.disk_check_interval, 50);
        assert_eq!(config.dedup_mode, DedupMode::Checksum);
        assert!(config.integrity.stop_at_first_mismatch);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Hoard.toml");
        fs::write(
            &path,
            r#"
output_dir = "/mnt/backup"
ignore_patterns = ["*.tmp"]
dedup_mode = "timestamp"
compression = "gzip"

[[locations]]
uri = "/home/user/docs"
name = "docs"

[retention]
max_age_days = 365
week_start = "sun"
max_disk_fill_rate_percent = 90
"#,
        )
        .unwrap();

        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/mnt/backup"));
        assert_eq!(config.dedup_mode, DedupMode::Timestamp);
        assert_eq!(config.compression, Compression::Gzip);
        assert_eq!(config.locations.len(), 1);
        assert_eq!(config.locations[0].name.as_deref(), Some("docs"));
        assert_eq!(config.retention.max_age_days, Some(365));
        assert_eq!(config.retention.week_start, Weekday::Sun);
        assert_eq!(config.retention.max_disk_fill_rate_percent, Some(90));
        // Unset keys fall back to defaults
        assert_eq!(config.retention.keep_dailies_days, 30);
    }
}
