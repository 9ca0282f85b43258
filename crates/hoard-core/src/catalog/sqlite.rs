use rusqlite::backup::Backup as OnlineBackup;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Schema version written to `PRAGMA user_version`.
///
/// 1: original layout (no `name_lower`, no `compression`)
/// 2: `entry.name_lower` for case-insensitive search
/// 3: `file_content.compression` and the `(checksum, length)` index
pub const SCHEMA_VERSION: i64 = 3;

pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let catalog = Catalog { conn };
        catalog.configure_pragmas()?;
        catalog.migrate_schema()?;
        Ok(catalog)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let catalog = Catalog { conn };
        catalog.configure_pragmas()?;
        catalog.migrate_schema()?;
        Ok(catalog)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA busy_timeout = 5000;",
        )?;
        debug!("SQLite pragmas configured (WAL mode, 64MB cache)");
        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Bring an existing catalog up to [`SCHEMA_VERSION`] in place. Catalog
    /// rows are the only record of what the blobs are, so nothing is dropped.
    fn migrate_schema(&self) -> Result<()> {
        let mut version = self.schema_version()?;

        if version == 0 && !self.table_exists("backup")? {
            self.conn.execute_batch(include_str!("schema.sql"))?;
            self.set_schema_version(SCHEMA_VERSION)?;
            debug!("SQLite schema initialized (version {})", SCHEMA_VERSION);
            return Ok(());
        }

        // Catalogs written before versioning existed carry the version 1 layout
        if version == 0 {
            version = 1;
        }
        if version < 2 {
            self.migrate_to_v2()?;
        }
        if version < 3 {
            self.migrate_to_v3()?;
        }
        if version < SCHEMA_VERSION {
            info!(
                "Catalog schema upgraded from version {} to {}",
                version, SCHEMA_VERSION
            );
        }

        self.conn.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {};", version))
    }

    fn migrate_to_v2(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch("ALTER TABLE entry ADD COLUMN name_lower TEXT NOT NULL DEFAULT '';")?;
        let names = {
            let mut stmt = tx.prepare("SELECT id, name FROM entry")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>>>()?;
            rows
        };
        {
            let mut update = tx.prepare("UPDATE entry SET name_lower = ?1 WHERE id = ?2")?;
            for (id, name) in &names {
                update.execute(params![name.to_lowercase(), id])?;
            }
        }
        tx.execute_batch("PRAGMA user_version = 2;")?;
        tx.commit()?;
        debug!("Catalog migrated to version 2 ({} entry names backfilled)", names.len());
        Ok(())
    }

    fn migrate_to_v3(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            "ALTER TABLE file_content ADD COLUMN compression TEXT NOT NULL DEFAULT 'none';
             CREATE INDEX IF NOT EXISTS idx_file_content_checksum ON file_content (checksum, length);
             PRAGMA user_version = 3;",
        )?;
        tx.commit()?;
        debug!("Catalog migrated to version 3");
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Copy the live catalog to `dest` with SQLite's online backup API.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        let mut target = Connection::open(dest)?;
        {
            let backup = OnlineBackup::new(&self.conn, &mut target)?;
            backup.run_to_completion(256, Duration::from_millis(10), None)?;
        }
        debug!("Catalog snapshot written to {}", dest.display());
        Ok(())
    }
}
