//! Blob storage under the output directory.
//!
//! A blob is written as: plain bytes → digest/count → compression → interceptors → file.
//! Its location is `<YYYY>/<MM>/<DD>/<HHMM>/<uuid>` relative to the output root; the
//! path only locates the blob, the catalog row is what gives it meaning.

use crate::compression::Compression;
use crate::error::Result;
use crate::hasher::{Digest, HashingWriter};
use crate::interceptor::InterceptorChain;
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use uuid::Uuid;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Path relative to the output root, `/`-separated.
    pub path: String,
    pub digest: Digest,
}

#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    interceptors: InterceptorChain,
    compression_level: Option<i32>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>, interceptors: InterceptorChain) -> Self {
        Self {
            root: root.into(),
            interceptors,
            compression_level: None,
        }
    }

    pub fn with_compression_level(mut self, level: Option<i32>) -> Self {
        self.compression_level = level;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_path_for(at: DateTime<Local>) -> String {
        format!("{}/{}", at.format("%Y/%m/%d/%H%M"), Uuid::new_v4().simple())
    }

    pub fn absolute_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    /// Store whatever `produce` writes into the sink it is handed.
    ///
    /// Checksum and length are only known once `produce` returns. On any failure
    /// the partial blob is deleted, empty parent folders are pruned, and the
    /// error is returned.
    pub fn store<F>(
        &self,
        compression: Compression,
        declared_length: u64,
        produce: F,
    ) -> Result<StoredBlob>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let relative = Self::blob_path_for(Local::now());
        let absolute = self.absolute_path(&relative);
        let parent = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;

        match self.write_blob(&absolute, compression, declared_length, produce) {
            Ok(digest) => {
                trace!("Stored blob {} ({} bytes)", relative, digest.length);
                Ok(StoredBlob {
                    path: relative,
                    digest,
                })
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&absolute) {
                    if remove_err.kind() != io::ErrorKind::NotFound {
                        warn!(
                            "Could not remove partial blob {}: {}",
                            absolute.display(),
                            remove_err
                        );
                    }
                }
                self.prune_empty_dirs(&parent);
                Err(e.into())
            }
        }
    }

    fn write_blob<F>(
        &self,
        absolute: &Path,
        compression: Compression,
        declared_length: u64,
        produce: F,
    ) -> io::Result<Digest>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(absolute)?;
        let chain = self.interceptors.wrap_writer(Box::new(file), declared_length)?;
        let chain = compression.wrap_writer(chain, self.compression_level)?;

        let mut tee = HashingWriter::new(chain);
        produce(&mut tee)?;
        let (chain, digest) = tee.into_parts();
        chain.finish()?;
        Ok(digest)
    }

    /// Plain byte stream of a stored blob.
    pub fn open(
        &self,
        relative: &str,
        compression: Compression,
        declared_length: u64,
    ) -> Result<Box<dyn Read>> {
        let file = File::open(self.absolute_path(relative))?;
        let reader = self
            .interceptors
            .wrap_reader(Box::new(BufReader::new(file)), declared_length)?;
        Ok(compression.wrap_reader(reader)?)
    }

    /// Delete a blob and any folders it leaves empty. A missing blob is not an error.
    pub fn remove(&self, relative: &str) -> io::Result<()> {
        let absolute = self.absolute_path(relative);
        match fs::remove_file(&absolute) {
            Ok(()) => debug!("Removed blob {}", relative),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Blob {} already gone", relative)
            }
            Err(e) => return Err(e),
        }
        if let Some(parent) = absolute.parent() {
            self.prune_empty_dirs(parent);
        }
        Ok(())
    }

    /// Remove `dir` and its ancestors while they are empty, never touching the root.
    pub fn prune_empty_dirs(&self, dir: &Path) {
        let mut current = Some(dir);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            let is_empty = match fs::read_dir(dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => break,
            };
            if !is_empty || fs::remove_dir(dir).is_err() {
                break;
            }
            trace!("Pruned empty folder {}", dir.display());
            current = dir.parent();
        }
    }

    /// Relative paths of every blob on disk. Only the date partitions are
    /// walked; folders that cannot be read are logged and skipped.
    pub fn list_blobs(&self) -> Vec<String> {
        let mut blobs = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(PARTITION_WIDTHS.len() + 1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || e.depth() > PARTITION_WIDTHS.len()
                    || (e.file_type().is_dir()
                        && is_partition(&e.file_name().to_string_lossy(), e.depth()))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable part of the content store: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                let parts: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                blobs.push(parts.join("/"));
            }
        }
        blobs
    }
}

/// Digit widths of the `YYYY/MM/DD/HHMM` partition folders.
const PARTITION_WIDTHS: [usize; 4] = [4, 2, 2, 4];

/// Whether `name` fits the partition level at `depth` (1-based).
fn is_partition(name: &str, depth: usize) -> bool {
    depth
        .checked_sub(1)
        .and_then(|level| PARTITION_WIDTHS.get(level))
        .is_some_and(|&len| name.len() == len && name.bytes().all(|b| b.is_ascii_digit()))
}
