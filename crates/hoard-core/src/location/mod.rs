//! The location capability: a traversable tree of folders and files, local or
//! remote. The runner only ever sees these traits.

pub mod local;
pub mod registry;
pub mod retry;

use chrono::{DateTime, Utc};
use std::io::{self, Write};
use std::path::{Component, Path};

pub use local::LocalLocation;
pub use registry::LocationRegistry;
pub use retry::RetryPolicy;

/// Attributes shared by folders and files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMeta {
    pub name: String,
    /// Absolute path for display and error reporting.
    pub display_path: String,
    pub hidden: bool,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

pub trait Folder {
    fn meta(&self) -> &NodeMeta;

    /// Immediate children, in no particular order.
    fn children(&self) -> io::Result<Vec<Node>>;
}

pub trait FileNode {
    fn meta(&self) -> &NodeMeta;

    fn length(&self) -> u64;

    /// Stream the file's bytes into `sink`, returning how many were copied.
    fn copy_to(&self, sink: &mut dyn Write) -> io::Result<u64>;
}

pub enum Node {
    Folder(Box<dyn Folder>),
    File(Box<dyn FileNode>),
}

impl Node {
    pub fn meta(&self) -> &NodeMeta {
        match self {
            Node::Folder(folder) => folder.meta(),
            Node::File(file) => file.meta(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }
}

pub trait Location: Send + Sync {
    fn uri(&self) -> &str;

    fn root(&self) -> io::Result<Box<dyn Folder>>;
}

/// Children sorted by name, giving traversal a deterministic order.
pub fn sorted_children(folder: &dyn Folder) -> io::Result<Vec<Node>> {
    let mut children = folder.children()?;
    children.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(children)
}

/// Whether `name` can stand for one entry: exactly one plain path component.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Entry name derived from a path or URI that is not a plain name itself.
/// Separators, drive markers and scheme punctuation become `_`.
pub fn sanitized_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "root".to_string()
    } else {
        trimmed.to_string()
    }
}
