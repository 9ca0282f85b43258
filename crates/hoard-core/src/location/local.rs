use super::retry::{is_transient, RetryPolicy};
use super::{FileNode, Folder, Location, Node, NodeMeta};
use crate::platform;
use chrono::{DateTime, Utc};
use std::fs::{self, File, Metadata};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A location on a locally mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalLocation {
    uri: String,
    root: PathBuf,
    retry: RetryPolicy,
}

impl LocalLocation {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            uri: root.to_string_lossy().into_owned(),
            root,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Location for LocalLocation {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn root(&self) -> io::Result<Box<dyn Folder>> {
        let metadata = self.retry.run(
            "read location root",
            || fs::metadata(&self.root),
            is_transient,
            || Ok(()),
        )?;
        if !metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a folder", self.root.display()),
            ));
        }
        // `..` and `.` are resolved so the root is named after the folder it reaches.
        let resolved = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        Ok(Box::new(LocalFolder {
            meta: node_meta(&resolved, &metadata),
            path: self.root.clone(),
            retry: self.retry,
        }))
    }
}

struct LocalFolder {
    path: PathBuf,
    meta: NodeMeta,
    retry: RetryPolicy,
}

impl Folder for LocalFolder {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn children(&self) -> io::Result<Vec<Node>> {
        let entries = self.retry.run(
            "list folder",
            || fs::read_dir(&self.path)?.collect::<io::Result<Vec<_>>>(),
            is_transient,
            || Ok(()),
        )?;

        let mut children = Vec::with_capacity(entries.len());
        for entry in entries {
            let path = entry.path();
            let metadata = match fs::symlink_metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} vanished while listing", path.display());
                    continue;
                }
                Err(e) => return Err(e),
            };
            let file_type = metadata.file_type();
            if file_type.is_symlink() {
                trace!("Skipping symlink {}", path.display());
                continue;
            }
            let meta = node_meta(&path, &metadata);
            if file_type.is_dir() {
                children.push(Node::Folder(Box::new(LocalFolder {
                    path,
                    meta,
                    retry: self.retry,
                })));
            } else if file_type.is_file() {
                children.push(Node::File(Box::new(LocalFile {
                    path,
                    meta,
                    length: metadata.len(),
                    retry: self.retry,
                })));
            }
        }
        Ok(children)
    }
}

struct LocalFile {
    path: PathBuf,
    meta: NodeMeta,
    length: u64,
    retry: RetryPolicy,
}

impl FileNode for LocalFile {
    fn meta(&self) -> &NodeMeta {
        &self.meta
    }

    fn length(&self) -> u64 {
        self.length
    }

    fn copy_to(&self, sink: &mut dyn Write) -> io::Result<u64> {
        let mut file = self.retry.run(
            "open file",
            || File::open(&self.path),
            is_transient,
            || Ok(()),
        )?;
        io::copy(&mut file, sink)
    }
}

fn node_meta(path: &Path, metadata: &Metadata) -> NodeMeta {
    NodeMeta {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        display_path: path.to_string_lossy().into_owned(),
        hidden: platform::is_hidden(path, metadata),
        created: metadata.created().ok().map(DateTime::<Utc>::from),
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
    }
}
