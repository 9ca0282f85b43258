use super::models::*;
use super::sqlite::Catalog;
use crate::compression::Compression;
use crate::hasher::Checksum;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use std::collections::HashSet;
use tracing::debug;

const BACKUP_COLUMNS: &str = "id, started_at, entry_count";
const ENTRY_COLUMNS: &str =
    "id, parent_id, backup_id, kind, created_at, modified_at, hidden, name, file_content_id";
const CONTENT_COLUMNS: &str = "id, path, checksum, length, compression";

fn backup_from_row(row: &Row<'_>) -> Result<Backup> {
    Ok(Backup {
        id: row.get(0)?,
        started_at: row.get(1)?,
        entry_count: row.get(2)?,
    })
}

fn entry_from_row(row: &Row<'_>) -> Result<Entry> {
    Ok(Entry {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        backup_id: row.get(2)?,
        kind: row.get(3)?,
        created: row.get(4)?,
        modified: row.get(5)?,
        hidden: row.get(6)?,
        name: row.get(7)?,
        file_content_id: row.get(8)?,
    })
}

fn content_from_row(row: &Row<'_>) -> Result<FileContent> {
    Ok(FileContent {
        id: row.get(0)?,
        path: row.get(1)?,
        checksum: row.get(2)?,
        length: row.get::<_, i64>(3)? as u64,
        compression: row.get(4)?,
    })
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

impl Catalog {
    // ── Backup ───────────────────────────────────────────────────

    pub fn create_backup(&self, started_at: DateTime<Utc>) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO backup (started_at, entry_count) VALUES (?1, NULL)",
            params![started_at],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Mark a backup completed. The count is only ever written once.
    pub fn complete_backup(&self, backup_id: i64, entry_count: i64) -> Result<bool> {
        let updated = self.connection().execute(
            "UPDATE backup SET entry_count = ?1 WHERE id = ?2 AND entry_count IS NULL",
            params![entry_count, backup_id],
        )?;
        Ok(updated == 1)
    }

    pub fn get_backup(&self, backup_id: i64) -> Result<Option<Backup>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM backup WHERE id = ?1", BACKUP_COLUMNS),
                params![backup_id],
                backup_from_row,
            )
            .optional()
    }

    /// All backups oldest first, optionally restricted to `[from, to)`.
    pub fn list_backups(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Backup>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup \
             WHERE (?1 IS NULL OR started_at >= ?1) AND (?2 IS NULL OR started_at < ?2) \
             ORDER BY started_at, id",
            BACKUP_COLUMNS
        ))?;
        let backups = stmt
            .query_map(params![from, to], backup_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(backups)
    }

    pub fn list_completed_backups(&self) -> Result<Vec<Backup>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup WHERE entry_count IS NOT NULL ORDER BY started_at, id",
            BACKUP_COLUMNS
        ))?;
        let backups = stmt
            .query_map([], backup_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(backups)
    }

    pub fn list_failed_backups(&self) -> Result<Vec<Backup>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup WHERE entry_count IS NULL ORDER BY started_at, id",
            BACKUP_COLUMNS
        ))?;
        let backups = stmt
            .query_map([], backup_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(backups)
    }

    pub fn oldest_completed_backup(&self) -> Result<Option<Backup>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM backup WHERE entry_count IS NOT NULL \
                     ORDER BY started_at, id LIMIT 1",
                    BACKUP_COLUMNS
                ),
                [],
                backup_from_row,
            )
            .optional()
    }

    /// Completed backups other than `exclude_id`, newest first.
    pub fn previous_completed_backups(&self, exclude_id: i64) -> Result<Vec<Backup>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM backup WHERE entry_count IS NOT NULL AND id != ?1 \
             ORDER BY started_at DESC, id DESC",
            BACKUP_COLUMNS
        ))?;
        let backups = stmt
            .query_map(params![exclude_id], backup_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(backups)
    }

    /// Delete a backup and its entries in one transaction, entries first.
    /// FileContent rows are left for the orphan sweep.
    pub fn delete_backup(&self, backup_id: i64) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        let entries = tx.execute("DELETE FROM entry WHERE backup_id = ?1", params![backup_id])?;
        tx.execute("DELETE FROM backup WHERE id = ?1", params![backup_id])?;
        tx.commit()?;
        debug!("Deleted backup {} ({} entries)", backup_id, entries);
        Ok(entries)
    }

    // ── Entry ────────────────────────────────────────────────────

    pub fn insert_entry(&self, entry: &NewEntry<'_>) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO entry (parent_id, backup_id, kind, created_at, modified_at, hidden, \
                                name, name_lower, file_content_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.parent_id,
                entry.backup_id,
                entry.kind,
                entry.created,
                entry.modified,
                entry.hidden,
                entry.name,
                entry.name.to_lowercase(),
                entry.file_content_id,
            ],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn get_entry(&self, entry_id: i64) -> Result<Option<Entry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM entry WHERE id = ?1", ENTRY_COLUMNS),
                params![entry_id],
                entry_from_row,
            )
            .optional()
    }

    /// Children of `parent_id` (roots when `None`), sorted by name.
    pub fn list_children(&self, backup_id: i64, parent_id: Option<i64>) -> Result<Vec<Entry>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM entry WHERE backup_id = ?1 AND parent_id IS ?2 ORDER BY name, id",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![backup_id, parent_id], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn find_child(
        &self,
        backup_id: i64,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Option<Entry>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM entry WHERE backup_id = ?1 AND parent_id IS ?2 AND name = ?3 \
                     ORDER BY id LIMIT 1",
                    ENTRY_COLUMNS
                ),
                params![backup_id, parent_id, name],
                entry_from_row,
            )
            .optional()
    }

    /// Walk `names` from a root entry down, one name per level.
    pub fn resolve_path(&self, backup_id: i64, names: &[String]) -> Result<Option<Entry>> {
        let mut current: Option<Entry> = None;
        for name in names {
            let parent_id = current.as_ref().map(|e| e.id);
            match self.find_child(backup_id, parent_id, name)? {
                Some(entry) => current = Some(entry),
                None => return Ok(None),
            }
        }
        Ok(current)
    }

    /// Names from the root down to `entry_id`, inclusive.
    pub fn entry_path(&self, entry_id: i64) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut next = Some(entry_id);
        while let Some(id) = next {
            match self.get_entry(id)? {
                Some(entry) => {
                    names.push(entry.name);
                    next = entry.parent_id;
                }
                None => break,
            }
        }
        names.reverse();
        Ok(names)
    }

    pub fn count_entries(&self, backup_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM entry WHERE backup_id = ?1",
            params![backup_id],
            |row| row.get(0),
        )
    }

    /// Case-insensitive substring search over entry names.
    pub fn search_entries(
        &self,
        backup_id: Option<i64>,
        needle: &str,
        limit: i64,
    ) -> Result<Vec<Entry>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM entry \
             WHERE name_lower LIKE ?1 ESCAPE '\\' AND (?2 IS NULL OR backup_id = ?2) \
             ORDER BY backup_id DESC, name_lower, id LIMIT ?3",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map(params![like_pattern(needle), backup_id, limit], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    // ── FileContent ──────────────────────────────────────────────

    pub fn insert_file_content(
        &self,
        path: &str,
        checksum: &Checksum,
        length: u64,
        compression: Compression,
    ) -> Result<i64> {
        self.connection().execute(
            "INSERT INTO file_content (path, checksum, length, compression) \
             VALUES (?1, ?2, ?3, ?4)",
            params![path, checksum, length as i64, compression],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    /// Oldest content row with the given checksum and length.
    pub fn find_file_content(&self, checksum: &Checksum, length: u64) -> Result<Option<FileContent>> {
        self.connection()
            .query_row(
                &format!(
                    "SELECT {} FROM file_content WHERE checksum = ?1 AND length = ?2 \
                     ORDER BY id LIMIT 1",
                    CONTENT_COLUMNS
                ),
                params![checksum, length as i64],
                content_from_row,
            )
            .optional()
    }

    pub fn get_file_content(&self, content_id: i64) -> Result<Option<FileContent>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM file_content WHERE id = ?1", CONTENT_COLUMNS),
                params![content_id],
                content_from_row,
            )
            .optional()
    }

    pub fn list_file_contents(&self) -> Result<Vec<FileContent>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM file_content ORDER BY id",
            CONTENT_COLUMNS
        ))?;
        let contents = stmt
            .query_map([], content_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(contents)
    }

    pub fn count_file_contents(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM file_content", [], |row| row.get(0))
    }

    pub fn update_checksum(&self, content_id: i64, checksum: &Checksum) -> Result<()> {
        self.connection().execute(
            "UPDATE file_content SET checksum = ?1 WHERE id = ?2",
            params![checksum, content_id],
        )?;
        Ok(())
    }

    /// Content ids sharing a (checksum, length), one group per pair with more
    /// than one member, each group sorted ascending.
    pub fn duplicate_content_groups(&self) -> Result<Vec<Vec<i64>>> {
        let mut stmt = self.connection().prepare(
            "SELECT fc.id, fc.checksum, fc.length FROM file_content fc \
             JOIN (SELECT checksum, length FROM file_content \
                   GROUP BY checksum, length HAVING COUNT(*) > 1) dup \
               ON dup.checksum = fc.checksum AND dup.length = fc.length \
             ORDER BY fc.checksum, fc.length, fc.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>>>()?;

        let mut groups: Vec<Vec<i64>> = Vec::new();
        let mut current_key: Option<(String, i64)> = None;
        for (id, checksum, length) in rows {
            let key = (checksum, length);
            if current_key.as_ref() != Some(&key) {
                groups.push(Vec::new());
                current_key = Some(key);
            }
            if let Some(group) = groups.last_mut() {
                group.push(id);
            }
        }
        Ok(groups)
    }

    /// Point every entry referencing one of `from` at `to`, committing one
    /// transaction per `batch_size` source ids. Returns the entries updated.
    pub fn repoint_entries(&self, from: &[i64], to: i64, batch_size: usize) -> Result<usize> {
        let mut updated = 0;
        for chunk in from.chunks(batch_size.max(1)) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "UPDATE entry SET file_content_id = ? WHERE file_content_id IN ({})",
                placeholders
            );
            let tx = self.connection().unchecked_transaction()?;
            let values = std::iter::once(to).chain(chunk.iter().copied());
            updated += tx.execute(&sql, params_from_iter(values))?;
            tx.commit()?;
        }
        Ok(updated)
    }

    /// Content rows no entry references any more.
    pub fn unused_file_contents(&self) -> Result<Vec<FileContent>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM file_content fc \
             WHERE NOT EXISTS (SELECT 1 FROM entry e WHERE e.file_content_id = fc.id) \
             ORDER BY fc.id",
            CONTENT_COLUMNS
        ))?;
        let contents = stmt
            .query_map([], content_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(contents)
    }

    pub fn count_content_references(&self, content_id: i64) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM entry WHERE file_content_id = ?1",
            params![content_id],
            |row| row.get(0),
        )
    }

    pub fn delete_file_content(&self, content_id: i64) -> Result<()> {
        self.connection()
            .execute("DELETE FROM file_content WHERE id = ?1", params![content_id])?;
        Ok(())
    }

    /// Every blob path the catalog knows about.
    pub fn file_content_paths(&self) -> Result<HashSet<String>> {
        let mut stmt = self.connection().prepare("SELECT path FROM file_content")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>>>()?;
        Ok(paths)
    }

    // ── Stats ────────────────────────────────────────────────────

    pub fn stats(&self) -> Result<CatalogStats> {
        let conn = self.connection();
        Ok(CatalogStats {
            backups: conn.query_row("SELECT COUNT(*) FROM backup", [], |row| row.get(0))?,
            completed_backups: conn.query_row(
                "SELECT COUNT(*) FROM backup WHERE entry_count IS NOT NULL",
                [],
                |row| row.get(0),
            )?,
            entries: conn.query_row("SELECT COUNT(*) FROM entry", [], |row| row.get(0))?,
            file_contents: conn.query_row("SELECT COUNT(*) FROM file_content", [], |row| {
                row.get(0)
            })?,
            stored_bytes: conn.query_row(
                "SELECT COALESCE(SUM(length), 0) FROM file_content",
                [],
                |row| row.get(0),
            )?,
        })
    }
}
