use crate::catalog::{Catalog, EntryKind};
use crate::compression::Compression;
use crate::content_store::ContentStore;
use crate::error::Result;
use crate::hasher::DigestWriter;
use crate::location::FileNode;
use tracing::trace;

/// How a file's content was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Reused { content_id: i64 },
    Stored { content_id: i64, length: u64 },
}

impl Resolution {
    pub fn content_id(&self) -> i64 {
        match self {
            Resolution::Reused { content_id } | Resolution::Stored { content_id, .. } => *content_id,
        }
    }
}

pub struct ContentResolver<'a> {
    catalog: &'a Catalog,
    store: &'a ContentStore,
    compression: Compression,
}

impl<'a> ContentResolver<'a> {
    pub fn new(catalog: &'a Catalog, store: &'a ContentStore, compression: Compression) -> Self {
        Self {
            catalog,
            store,
            compression,
        }
    }

    /// Hash the file, reuse any content row with the same checksum and length
    /// from any backup, store it otherwise.
    pub fn by_checksum(&self, file: &dyn FileNode) -> Result<Resolution> {
        let mut digest = DigestWriter::new();
        file.copy_to(&mut digest)?;
        let digest = digest.finalize();

        if let Some(existing) = self.catalog.find_file_content(&digest.checksum, digest.length)? {
            trace!("{} matches content {}", file.meta().display_path, existing.id);
            return Ok(Resolution::Reused {
                content_id: existing.id,
            });
        }
        self.store_new(file)
    }

    /// Reuse the content of the same logical path in an earlier backup when
    /// modification time and length match exactly. `candidates` holds the
    /// matching parent folder entry per earlier backup, newest first.
    pub fn by_timestamp(
        &self,
        file: &dyn FileNode,
        candidates: &[(i64, Option<i64>)],
    ) -> Result<Resolution> {
        let meta = file.meta();
        if meta.modified.is_some() {
            for &(backup_id, parent) in candidates {
                let Some(parent) = parent else { continue };
                let Some(previous) = self.catalog.find_child(backup_id, Some(parent), &meta.name)?
                else {
                    continue;
                };
                if previous.kind != EntryKind::File || previous.modified != meta.modified {
                    continue;
                }
                let Some(content_id) = previous.file_content_id else {
                    continue;
                };
                if let Some(content) = self.catalog.get_file_content(content_id)? {
                    if content.length == file.length() {
                        trace!(
                            "{} unchanged since backup {}",
                            meta.display_path,
                            backup_id
                        );
                        return Ok(Resolution::Reused { content_id });
                    }
                }
            }
        }
        self.store_new(file)
    }

    /// Copy the file into a new blob and record it. The row describes what
    /// was actually written, even if the file changed since it was hashed.
    pub fn store_new(&self, file: &dyn FileNode) -> Result<Resolution> {
        let blob = self
            .store
            .store(self.compression, file.length(), |sink| file.copy_to(sink).map(|_| ()))?;
        let content_id = match self.catalog.insert_file_content(
            &blob.path,
            &blob.digest.checksum,
            blob.digest.length,
            self.compression,
        ) {
            Ok(id) => id,
            Err(e) => {
                let _ = self.store.remove(&blob.path);
                return Err(e.into());
            }
        };
        Ok(Resolution::Stored {
            content_id,
            length: blob.digest.length,
        })
    }
}
