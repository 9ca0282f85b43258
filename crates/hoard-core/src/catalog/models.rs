use crate::compression::Compression;
use crate::hasher::Checksum;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// One snapshot attempt. `entry_count` stays NULL until the run finalizes,
/// so a NULL count marks a run that never completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub entry_count: Option<i64>,
}

impl Backup {
    pub fn is_completed(&self) -> bool {
        self.entry_count.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Folder,
    File,
    /// A file that could not be read during the run; it has no content.
    FailedFile,
}

impl EntryKind {
    fn code(self) -> i64 {
        match self {
            EntryKind::Folder => 0,
            EntryKind::File => 1,
            EntryKind::FailedFile => 2,
        }
    }
}

impl ToSql for EntryKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.code()))
    }
}

impl FromSql for EntryKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_i64()? {
            0 => Ok(EntryKind::Folder),
            1 => Ok(EntryKind::File),
            2 => Ok(EntryKind::FailedFile),
            other => Err(FromSqlError::OutOfRange(other)),
        }
    }
}

impl ToSql for Compression {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_tag()))
    }
}

impl FromSql for Compression {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Checksum {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Checksum {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(Checksum::new(value.as_str()?))
    }
}

/// A node of a backup's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    /// `None` for the root folder of a location.
    pub parent_id: Option<i64>,
    pub backup_id: i64,
    pub kind: EntryKind,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub hidden: bool,
    pub name: String,
    /// Only set for `EntryKind::File`.
    pub file_content_id: Option<i64>,
}

/// Insert form of [`Entry`].
#[derive(Debug, Clone)]
pub struct NewEntry<'a> {
    pub parent_id: Option<i64>,
    pub backup_id: i64,
    pub kind: EntryKind,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub hidden: bool,
    pub name: &'a str,
    pub file_content_id: Option<i64>,
}

/// A stored blob. Checksum and length always describe the plain bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub id: i64,
    /// Blob location relative to the output root.
    pub path: String,
    pub checksum: Checksum,
    pub length: u64,
    pub compression: Compression,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogStats {
    pub backups: i64,
    pub completed_backups: i64,
    pub entries: i64,
    pub file_contents: i64,
    pub stored_bytes: i64,
}
